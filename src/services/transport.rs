use log::{info, warn};
use std::time::Duration;

use crate::core::config::BackendConfig;
use crate::core::error::ErrorKind;
use crate::services::backend::StoryBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Local backend, one blocking call.
    Direct,
    /// Remote backend answered the health check.
    Stream,
    /// Remote backend unreachable; skip the network entirely.
    Fallback(ErrorKind),
}

/// Local -> Direct, remote reachable -> Stream, remote unreachable -> Fallback.
#[derive(Debug, Clone)]
pub struct TransportSelector {
    local: bool,
    health_timeout: Duration,
}

impl TransportSelector {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            local: config.is_local(),
            health_timeout: config.health_timeout(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub async fn select(&self, backend: &dyn StoryBackend) -> Transport {
        if self.local {
            info!("Local backend, using direct call");
            return Transport::Direct;
        }

        match tokio::time::timeout(self.health_timeout, backend.health()).await {
            Ok(Ok(())) => {
                info!("Backend reachable, streaming story");
                Transport::Stream
            }
            Ok(Err(e)) => {
                warn!("Health check failed: {:#}", e);
                Transport::Fallback(ErrorKind::TransportUnreachable(format!("{:#}", e)))
            }
            Err(_) => {
                warn!("Health check timed out after {:?}", self.health_timeout);
                Transport::Fallback(ErrorKind::TransportUnreachable(format!(
                    "health check timed out after {}s",
                    self.health_timeout.as_secs()
                )))
            }
        }
    }
}
