//! The data source interface implemented by RPC extensions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nexus_core::datasource::{ResourceCatalog, TimeRange};

use crate::error::SdkResult;

/// Raw segments returned by a read: sample bytes, then one status byte per
/// sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadResult {
    pub data: Vec<u8>,
    pub status: Vec<u8>,
}

impl ReadResult {
    pub fn new(data: Vec<u8>, status: Vec<u8>) -> Self {
        Self { data, status }
    }
}

/// Extension-side counterpart of [`nexus_core::DataSource`].
///
/// Each method answers one invocation target. Errors are reported to the
/// host as the completion's `error` and do not end the session.
#[async_trait]
pub trait RpcDataSourceHandler: Send + Sync {
    /// `SetParameters` notification, sent once before any other call.
    async fn set_parameters(
        &mut self,
        _resource_locator: String,
        _configuration: HashMap<String, String>,
    ) -> SdkResult<()> {
        Ok(())
    }

    /// `GetCatalogs`
    async fn get_catalogs(&self) -> SdkResult<Vec<ResourceCatalog>>;

    /// `GetTimeRange`
    async fn get_time_range(&self, catalog_id: &str) -> SdkResult<TimeRange>;

    /// `GetAvailability`
    async fn get_availability(
        &self,
        catalog_id: &str,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SdkResult<f64>;

    /// `ReadSingle`: `length` samples of the representation at `path`.
    async fn read_single(
        &self,
        path: &str,
        length: usize,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SdkResult<ReadResult>;
}
