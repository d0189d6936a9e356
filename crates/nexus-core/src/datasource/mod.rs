//! Data source contract.
//!
//! Every extension that serves time-series data implements [`DataSource`],
//! whether it lives in a native package loaded into the host or in a child
//! process reached through [`crate::rpc::RpcDataSource`]. The host cannot tell
//! the two apart.
//!
//! The catalog model here is thin: enough structure to route a
//! read request, with free-form properties carried as JSON.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// Contract
// ============================================================================

/// Generic data source contract shared by in-process and RPC-backed extensions.
///
/// `set_context` must complete before any data call; implementations reject
/// data calls made earlier. Cancellation is cooperative: dropping a returned
/// future abandons the call.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Activate the source with its resource locator and configuration.
    async fn set_context(&mut self, context: DataSourceContext) -> Result<()>;

    /// List the catalogs this source provides.
    async fn get_catalogs(&self) -> Result<Vec<ResourceCatalog>>;

    /// Time span covered by a catalog.
    async fn get_time_range(&self, catalog_id: &str) -> Result<TimeRange>;

    /// Fraction (0..=1) of the interval for which data exists.
    async fn get_availability(
        &self,
        catalog_id: &str,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64>;

    /// Fill `request.data` and `request.status` for the interval.
    async fn read_single(
        &self,
        request: &mut ReadRequest<'_>,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()>;
}

/// Starter package handed to a data source on activation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceContext {
    pub resource_locator: String,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
}

impl DataSourceContext {
    pub fn new(resource_locator: impl Into<String>) -> Self {
        Self {
            resource_locator: resource_locator.into(),
            configuration: HashMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).map(String::as_str)
    }
}

// ============================================================================
// Catalog model
// ============================================================================

/// A catalog of resources exposed by a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCatalog {
    #[serde(alias = "Id")]
    pub id: String,
    #[serde(default, alias = "Properties", skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
    #[serde(default, alias = "Resources")]
    pub resources: Vec<Resource>,
}

impl ResourceCatalog {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: None,
            resources: Vec::new(),
        }
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }
}

/// A single channel within a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(alias = "Id")]
    pub id: String,
    #[serde(default, alias = "Properties", skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
    #[serde(default, alias = "Representations")]
    pub representations: Vec<Representation>,
}

impl Resource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: None,
            representations: Vec::new(),
        }
    }

    pub fn with_representation(mut self, representation: Representation) -> Self {
        self.representations.push(representation);
        self
    }
}

/// One stored form of a resource (sample period plus element type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Representation {
    #[serde(alias = "Id")]
    pub id: String,
    #[serde(alias = "DataType")]
    pub data_type: NexusDataType,
}

impl Representation {
    pub fn new(id: impl Into<String>, data_type: NexusDataType) -> Self {
        Self {
            id: id.into(),
            data_type,
        }
    }
}

/// Element types a representation can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NexusDataType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    Int64,
    Float32,
    Float64,
}

impl NexusDataType {
    /// Size in bytes of one element.
    pub fn element_size(self) -> usize {
        match self {
            Self::Uint8 | Self::Int8 => 1,
            Self::Uint16 | Self::Int16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float32 => 4,
            Self::Uint64 | Self::Int64 | Self::Float64 => 8,
        }
    }
}

/// Fully qualified address of one representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub catalog_id: String,
    pub resource_id: String,
    pub representation: Representation,
}

impl CatalogItem {
    pub fn new(
        catalog_id: impl Into<String>,
        resource_id: impl Into<String>,
        representation: Representation,
    ) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            resource_id: resource_id.into(),
            representation,
        }
    }

    /// `/catalog/resource/representation` path used on the wire.
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.catalog_id, self.resource_id, self.representation.id
        )
    }

    pub fn element_size(&self) -> usize {
        self.representation.data_type.element_size()
    }
}

/// Time span of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// ============================================================================
// Read request
// ============================================================================

/// Buffers to fill for one catalog item.
///
/// `status` holds one byte per element; `0x01` marks a valid sample.
#[derive(Debug)]
pub struct ReadRequest<'a> {
    pub item: CatalogItem,
    pub data: &'a mut [u8],
    pub status: &'a mut [u8],
}

impl<'a> ReadRequest<'a> {
    pub fn new(item: CatalogItem, data: &'a mut [u8], status: &'a mut [u8]) -> Self {
        Self { item, data, status }
    }

    /// Number of elements requested.
    pub fn length(&self) -> usize {
        self.status.len()
    }

    /// Whether the data buffer matches `length * element_size`.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.length() * self.item.element_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> CatalogItem {
        CatalogItem::new(
            "/A/B/C",
            "T1",
            Representation::new("1_s", NexusDataType::Float64),
        )
    }

    #[test]
    fn test_catalog_item_path() {
        assert_eq!(item().path(), "/A/B/C/T1/1_s");
        assert_eq!(item().element_size(), 8);
    }

    #[test]
    fn test_read_request_length() {
        let mut data = vec![0u8; 16];
        let mut status = vec![0u8; 2];
        let request = ReadRequest::new(item(), &mut data, &mut status);
        assert_eq!(request.length(), 2);
        assert!(request.is_consistent());
    }

    #[test]
    fn test_read_request_inconsistent() {
        let mut data = vec![0u8; 10];
        let mut status = vec![0u8; 2];
        let request = ReadRequest::new(item(), &mut data, &mut status);
        assert!(!request.is_consistent());
    }

    #[test]
    fn test_catalog_accepts_pascal_case() {
        let json = r#"{
            "Id": "/A/B/C",
            "Resources": [
                { "Id": "T1", "Representations": [ { "Id": "1_s", "DataType": "FLOAT32" } ] }
            ]
        }"#;
        let catalog: ResourceCatalog = serde_json::from_str(json).unwrap();
        assert_eq!(catalog.id, "/A/B/C");
        assert_eq!(
            catalog.resources[0].representations[0].data_type,
            NexusDataType::Float32
        );
    }

    #[test]
    fn test_context_builder() {
        let context = DataSourceContext::new("file:///data").with_config("command", "python");
        assert_eq!(context.get("command"), Some("python"));
        assert_eq!(context.get("missing"), None);
    }
}
