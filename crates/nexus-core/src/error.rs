//! Crate-level error type.
//!
//! Each module owns a focused error enum; this type unifies them for the
//! orchestration layer and the data source contract.

use crate::extension::ExtensionError;
use crate::package::PackageError;
use crate::rpc::RpcError;

/// Unified error for host-facing operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Extension(#[from] ExtensionError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Extension not found: {0}")]
    ExtensionNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error came from a broken RPC session that cannot be reused.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::Rpc(e) if e.is_fatal())
    }
}
