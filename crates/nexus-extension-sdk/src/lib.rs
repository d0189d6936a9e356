//! Nexus Extension SDK
//!
//! Tools for building Nexus data source extensions in Rust, either as a
//! child process driven over stdio or as a native package.
//!
//! # RPC extension
//!
//! ```rust,no_run
//! use nexus_extension_sdk::prelude::*;
//!
//! #[derive(Default)]
//! struct MySource;
//!
//! #[async_trait]
//! impl RpcDataSourceHandler for MySource {
//!     async fn get_catalogs(&self) -> SdkResult<Vec<ResourceCatalog>> {
//!         Ok(vec![ResourceCatalog::new("/MY/CATALOG")])
//!     }
//!     // remaining methods ...
//! #   async fn get_time_range(&self, _: &str) -> SdkResult<TimeRange> { unimplemented!() }
//! #   async fn get_availability(&self, _: &str, _: DateTime<Utc>, _: DateTime<Utc>) -> SdkResult<f64> { Ok(1.0) }
//! #   async fn read_single(&self, _: &str, _: usize, _: DateTime<Utc>, _: DateTime<Utc>) -> SdkResult<ReadResult> { unimplemented!() }
//! }
//!
//! #[tokio::main]
//! async fn main() -> SdkResult<()> {
//!     serve(MySource).await
//! }
//! ```
//!
//! # Native package
//!
//! Export [`nexus_core::DataSource`] implementations with
//! [`export_data_sources!`] and build the crate as a `cdylib`.

pub mod error;
pub mod handler;
pub mod logger;
#[macro_use]
pub mod macros;
pub mod peer;

pub use error::{SdkError, SdkResult};
pub use handler::{ReadResult, RpcDataSourceHandler};
pub use logger::StderrLogger;
pub use peer::{serve, Incoming, Peer};

pub use nexus_core::datasource::{
    CatalogItem, DataSource, DataSourceContext, NexusDataType, ReadRequest, Representation,
    Resource, ResourceCatalog, TimeRange,
};
pub use nexus_core::extension::{DataSourceBox, ExtensionDescriptor, NATIVE_ABI_VERSION};
pub use nexus_core::rpc::protocol::{Completion, Invocation, LogLevel};

#[doc(hidden)]
pub use serde_json as __serde_json;

/// Prelude module with common imports
pub mod prelude {
    pub use crate::error::{SdkError, SdkResult};
    pub use crate::handler::{ReadResult, RpcDataSourceHandler};
    pub use crate::logger::StderrLogger;
    pub use crate::peer::serve;
    pub use crate::{
        NexusDataType, Representation, Resource, ResourceCatalog, TimeRange,
    };
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use serde_json::Value;
}
