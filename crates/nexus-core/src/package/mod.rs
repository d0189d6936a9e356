//! Package discovery and restore.
//!
//! A [`PackageReference`] names a provider and carries that provider's
//! configuration. The [`PackageController`] resolves the provider through a
//! [`ProviderRegistry`] and either lists the available versions or restores
//! one version into a deterministic folder below a restore root.
//!
//! Built-in providers:
//! - `local`: version folders below a local path
//! - `github-releases`: release assets of a GitHub project
//! - `gitlab-packages-generic-v4`: files of a GitLab generic package

pub mod archive;
pub mod controller;
pub mod http;
pub mod provider;
pub mod reference;

use std::path::PathBuf;

pub use controller::PackageController;
pub use http::ProviderContext;
pub use provider::{ProviderRegistry, ProviderStrategy};
pub use reference::PackageReference;

/// Package error types
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("The '{key}' parameter is missing in the package reference (provider '{provider}')")]
    Configuration { provider: String, key: String },

    #[error("The '{key}' parameter of provider '{provider}' is invalid: {reason}")]
    InvalidConfiguration {
        provider: String,
        key: String,
        reason: String,
    },

    #[error("The provider '{0}' is not supported")]
    UnsupportedProvider(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request to {url} failed with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("No asset of provider '{provider}' matches the selector '{selector}'")]
    AssetNotFound { provider: String, selector: String },

    #[error("Version '{version}' could not be found (provider '{provider}')")]
    VersionNotFound { provider: String, version: String },

    #[error("The source directory '{0}' does not exist")]
    SourceNotFound(PathBuf),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid registry response: {0}")]
    Json(#[from] serde_json::Error),
}

impl PackageError {
    pub fn configuration(provider: &str, key: &str) -> Self {
        Self::Configuration {
            provider: provider.to_string(),
            key: key.to_string(),
        }
    }

    pub fn invalid(provider: &str, key: &str, reason: impl ToString) -> Self {
        Self::InvalidConfiguration {
            provider: provider.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for package operations
pub type Result<T> = std::result::Result<T, PackageError>;
