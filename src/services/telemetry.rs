use log::warn;
use std::fmt::Debug;

use crate::core::error::ErrorKind;

pub type Tags = Vec<(&'static str, String)>;

/// Receives failures the pipeline absorbed. Implementations must return
/// quickly; the pipeline calls this inline.
pub trait TelemetrySink: Send + Sync + Debug {
    fn report(&self, error: &ErrorKind, tags: &Tags);
}

#[derive(Debug, Default)]
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn report(&self, error: &ErrorKind, tags: &Tags) {
        warn!("[{}] {} ({})", error.label(), error, format_tags(tags));
    }
}

pub fn format_tags(tags: &Tags) -> String {
    tags.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}
