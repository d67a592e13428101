use thiserror::Error;

/// Failure taxonomy of a generation attempt.
///
/// Only `InvalidInput`, `GenerationUnavailable` and `Cancelled` ever reach the
/// caller of the pipeline. The transport-level kinds are absorbed by the
/// fallback path and only show up in telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("invalid {field}: {message}")]
    InvalidInput { field: &'static str, message: String },

    #[error("backend unreachable: {0}")]
    TransportUnreachable(String),

    #[error("story stream failed: {0}")]
    StreamFailed(String),

    #[error("story generation unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("asset fetch failed: {0}")]
    AssetFetchFailed(String),

    #[error("generation cancelled")]
    Cancelled,
}

impl ErrorKind {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            message: message.into(),
        }
    }

    /// Short stable label, used as a telemetry tag.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::TransportUnreachable(_) => "transport_unreachable",
            Self::StreamFailed(_) => "stream_failed",
            Self::GenerationUnavailable(_) => "generation_unavailable",
            Self::AssetFetchFailed(_) => "asset_fetch_failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the user can do something about it (edit input or retry).
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::GenerationUnavailable(_) | Self::Cancelled
        )
    }
}
