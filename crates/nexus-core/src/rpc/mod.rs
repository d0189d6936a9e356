//! Out-of-process extensions.
//!
//! An RPC extension is a child process that speaks line-delimited JSON on its
//! stdin/stdout and writes structured log lines to stderr. [`RpcCommunicator`]
//! owns one such session; [`RpcDataSource`] exposes it through the ordinary
//! [`crate::datasource::DataSource`] contract.

pub mod communicator;
pub mod data_source;
pub mod protocol;

use std::time::Duration;

pub use communicator::RpcCommunicator;
pub use data_source::RpcDataSource;
pub use protocol::{Close, Completion, HandshakeRequest, HandshakeResponse, Invocation, LogLevel, LogMessage};

/// Lifecycle of one RPC session.
///
/// `Disconnected -> Connecting -> Connected -> Closing -> Disconnected`.
/// A session that has been connected once never reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcSessionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl std::fmt::Display for RpcSessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// RPC error types
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("The extension reported an error: {0}")]
    Remote(String),

    #[error("The connection to the extension was lost: {0}")]
    Disconnected(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    pub(crate) fn protocol(what: &str, expected: impl std::fmt::Debug, received: impl std::fmt::Debug) -> Self {
        Self::Protocol(format!("expected {} {:?}, received {:?}", what, expected, received))
    }

    /// Whether the session is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Disconnected(_) | Self::Timeout { .. } | Self::Spawn { .. } | Self::Io(_) | Self::Handshake(_)
        )
    }
}

/// Result type for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
