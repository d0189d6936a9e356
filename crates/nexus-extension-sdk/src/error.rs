//! SDK error types.

/// Errors raised on the extension side of an RPC session.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Invalid arguments for '{target}': {reason}")]
    InvalidArguments { target: String, reason: String },

    #[error("Unknown target '{0}'")]
    UnknownTarget(String),

    /// Failure reported by a handler; sent to the host as the completion error.
    #[error("{0}")]
    Handler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SdkError {
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    pub(crate) fn arguments(target: &str, reason: impl ToString) -> Self {
        Self::InvalidArguments {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error ends the session rather than a single invocation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Handshake(_) | Self::Protocol(_) | Self::Io(_))
    }
}

/// SDK result type
pub type SdkResult<T> = std::result::Result<T, SdkError>;
