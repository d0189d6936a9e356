//! [`DataSource`] backed by an RPC extension process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::protocol::{format_time, AvailabilityResponse, CatalogsResponse, TimeRangeResponse};
use super::{RpcCommunicator, RpcError};
use crate::config;
use crate::datasource::{DataSource, DataSourceContext, ReadRequest, ResourceCatalog, TimeRange};
use crate::error::{Error, Result};

/// Configuration key naming the extension executable.
pub const COMMAND_KEY: &str = "command";
/// Configuration key with whitespace separated arguments.
pub const ARGUMENTS_KEY: &str = "arguments";

/// Data source that forwards every contract method to a child process.
///
/// `set_context` spawns the process, performs the handshake and sends the
/// `SetParameters` notification. Failures are returned as-is; there are no
/// retries at this level.
pub struct RpcDataSource {
    communicator: Option<Arc<RpcCommunicator>>,
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl RpcDataSource {
    pub fn new() -> Self {
        Self {
            communicator: None,
            connect_timeout: config::rpc::CONNECT_TIMEOUT,
            call_timeout: config::rpc_call_timeout(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// The live session, once activated.
    pub fn communicator(&self) -> Option<&Arc<RpcCommunicator>> {
        self.communicator.as_ref()
    }

    fn session(&self) -> Result<&RpcCommunicator> {
        self.communicator.as_deref().ok_or_else(|| {
            RpcError::InvalidOperation("the data source has not been activated".to_string()).into()
        })
    }

    /// Close the session gracefully.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(communicator) = self.communicator.take() {
            communicator.close(config::rpc::CLOSE_TIMEOUT).await?;
        }
        Ok(())
    }
}

impl Default for RpcDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RpcDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcDataSource")
            .field("communicator", &self.communicator)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

#[async_trait]
impl DataSource for RpcDataSource {
    async fn set_context(&mut self, context: DataSourceContext) -> Result<()> {
        if self.communicator.is_some() {
            return Err(RpcError::InvalidOperation("the data source is already activated".to_string()).into());
        }

        let command = context
            .get(COMMAND_KEY)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::Configuration(format!("the '{}' configuration key is required", COMMAND_KEY)))?
            .to_string();

        let arguments: Vec<String> = context
            .get(ARGUMENTS_KEY)
            .map(|a| a.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let communicator = RpcCommunicator::new(command, arguments);
        communicator.connect(self.connect_timeout).await?;

        communicator
            .notify(
                "SetParameters",
                vec![
                    Value::String(context.resource_locator.clone()),
                    serde_json::to_value(&context.configuration).map_err(RpcError::from)?,
                ],
                self.call_timeout,
            )
            .await?;

        tracing::debug!(
            command = %communicator.command(),
            locator = %context.resource_locator,
            "RPC data source activated"
        );

        self.communicator = Some(Arc::new(communicator));
        Ok(())
    }

    async fn get_catalogs(&self) -> Result<Vec<ResourceCatalog>> {
        let response: CatalogsResponse = self
            .session()?
            .call("GetCatalogs", vec![], self.call_timeout)
            .await?;
        Ok(response.catalogs)
    }

    async fn get_time_range(&self, catalog_id: &str) -> Result<TimeRange> {
        let response: TimeRangeResponse = self
            .session()?
            .call("GetTimeRange", vec![json!(catalog_id)], self.call_timeout)
            .await?;

        Ok(TimeRange {
            begin: response.begin,
            end: response.end,
        })
    }

    async fn get_availability(
        &self,
        catalog_id: &str,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64> {
        let response: AvailabilityResponse = self
            .session()?
            .call(
                "GetAvailability",
                vec![json!(catalog_id), json!(format_time(&begin)), json!(format_time(&end))],
                self.call_timeout,
            )
            .await?;
        Ok(response.availability)
    }

    async fn read_single(
        &self,
        request: &mut ReadRequest<'_>,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        if !request.is_consistent() {
            return Err(Error::DataSource(format!(
                "buffer sizes do not match the element size of {}",
                request.item.path()
            )));
        }

        let arguments = vec![
            json!(request.item.path()),
            json!(request.length()),
            json!(format_time(&begin)),
            json!(format_time(&end)),
        ];

        let ReadRequest { data, status, .. } = request;
        let _: Value = self
            .session()?
            .call_with_raw("ReadSingle", arguments, &mut [&mut **data, &mut **status], self.call_timeout)
            .await?;

        Ok(())
    }
}
