//! Core traits and types for Nexus.
//!
//! This crate implements the extension acquisition and communication path of the
//! Nexus data host:
//! - [`package`]: discovering and restoring versioned extension packages from
//!   local folders, GitHub releases and GitLab generic packages
//! - [`extension`]: loading restored native packages into unloadable units and
//!   orchestrating them through the [`extension::ExtensionHive`]
//! - [`rpc`]: the line-delimited JSON protocol used to drive out-of-process
//!   extensions over a child's stdio, and the data source adapter built on it

pub mod config;
pub mod datasource;
pub mod error;
pub mod extension;
pub mod package;
pub mod rpc;

pub use datasource::{
    CatalogItem, DataSource, DataSourceContext, ReadRequest, ResourceCatalog, TimeRange,
};
pub use error::{Error, Result};
pub use extension::{ExtensionHive, ExtensionLoadContext, ExtensionModule};
pub use package::{PackageController, PackageReference, ProviderRegistry};
pub use rpc::{RpcCommunicator, RpcDataSource, RpcSessionState};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{endpoints, env_vars};
    pub use crate::datasource::{DataSource, DataSourceContext, ReadRequest};
    pub use crate::error::{Error, Result};
    pub use crate::extension::{ExtensionError, ExtensionHive};
    pub use crate::package::{PackageController, PackageError, PackageReference};
    pub use crate::rpc::{RpcCommunicator, RpcError};
}
