//! Sample RPC extension serving two fixed catalogs.
//!
//! Besides the data source targets it answers a few diagnostic targets used
//! by the host's integration tests: `Ping`, `Echo`, `Record`, and targets that
//! deliberately misbehave (`Both`, `WrongId`, `Hang`, `Exit`, `Garbage`).

use std::collections::HashMap;

use chrono::TimeZone;
use nexus_extension_sdk::prelude::*;
use nexus_extension_sdk::{Completion, Incoming, Invocation, Peer};
use serde_json::json;

const ACCESSIBLE: &str = "/SAMPLE/ACCESSIBLE";
const RESTRICTED: &str = "/SAMPLE/RESTRICTED";

struct SampleSource {
    logger: StderrLogger,
    locator: Option<String>,
    catalogs: Vec<ResourceCatalog>,
}

impl SampleSource {
    fn new() -> Self {
        let catalogs = vec![
            ResourceCatalog::new(ACCESSIBLE).with_resource(
                Resource::new("T1")
                    .with_representation(Representation::new("1_s", NexusDataType::Float64)),
            ),
            ResourceCatalog::new(RESTRICTED).with_resource(
                Resource::new("V1")
                    .with_representation(Representation::new("1_s", NexusDataType::Int32)),
            ),
        ];

        Self {
            logger: StderrLogger::new(),
            locator: None,
            catalogs,
        }
    }

    fn data_type(&self, path: &str) -> Option<NexusDataType> {
        self.catalogs.iter().find_map(|catalog| {
            catalog.resources.iter().find_map(|resource| {
                resource.representations.iter().find_map(|representation| {
                    let candidate = format!("{}/{}/{}", catalog.id, resource.id, representation.id);
                    (candidate == path).then_some(representation.data_type)
                })
            })
        })
    }

    fn has_catalog(&self, catalog_id: &str) -> bool {
        self.catalogs.iter().any(|catalog| catalog.id == catalog_id)
    }
}

#[async_trait]
impl RpcDataSourceHandler for SampleSource {
    async fn set_parameters(
        &mut self,
        resource_locator: String,
        configuration: HashMap<String, String>,
    ) -> SdkResult<()> {
        self.logger.info(format!(
            "Activated for '{}' with {} configuration entries",
            resource_locator,
            configuration.len()
        ));
        self.locator = Some(resource_locator);
        Ok(())
    }

    async fn get_catalogs(&self) -> SdkResult<Vec<ResourceCatalog>> {
        Ok(self.catalogs.clone())
    }

    async fn get_time_range(&self, catalog_id: &str) -> SdkResult<TimeRange> {
        if !self.has_catalog(catalog_id) {
            return Err(SdkError::handler(format!("Unknown catalog {}", catalog_id)));
        }

        match (
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single(),
            Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).single(),
        ) {
            (Some(begin), Some(end)) => Ok(TimeRange { begin, end }),
            _ => Err(SdkError::handler("invalid time range")),
        }
    }

    async fn get_availability(
        &self,
        catalog_id: &str,
        _begin: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> SdkResult<f64> {
        if !self.has_catalog(catalog_id) {
            return Err(SdkError::handler(format!("Unknown catalog {}", catalog_id)));
        }
        Ok(0.9)
    }

    async fn read_single(
        &self,
        path: &str,
        length: usize,
        _begin: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> SdkResult<ReadResult> {
        let data_type = self
            .data_type(path)
            .ok_or_else(|| SdkError::handler(format!("Unknown resource path {}", path)))?;

        self.logger.debug(format!("Reading {} samples of {}", length, path));

        let mut data = Vec::with_capacity(length * data_type.element_size());
        for i in 0..length {
            match data_type {
                NexusDataType::Float64 => data.extend_from_slice(&(i as f64).to_le_bytes()),
                NexusDataType::Int32 => data.extend_from_slice(&(i as i32).to_le_bytes()),
                _ => data.resize(data.len() + data_type.element_size(), 0),
            }
        }

        Ok(ReadResult::new(data, vec![1; length]))
    }
}

/// Answer a diagnostic target; `None` when `invocation` is a data source call.
async fn diagnostic<R, W>(peer: &mut Peer<R, W>, invocation: &Invocation) -> SdkResult<Option<()>>
where
    R: tokio::io::AsyncRead + Unpin + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    let id = invocation.invocation_id.clone();

    let completion = match invocation.target.as_str() {
        "Ping" => Completion::result(id, json!("pong")),
        "Echo" => Completion::result(id, invocation.arguments.first().cloned().unwrap_or(Value::Null)),
        "Record" => Completion::result(id, json!(peer.last_line())),
        "Both" => Completion {
            error: Some("and an error".to_string()),
            ..Completion::result(id, json!("a result"))
        },
        "WrongId" => Completion::result(Some("wrong".to_string()), json!("pong")),
        "Hang" => return Ok(Some(())),
        "Exit" => std::process::exit(0),
        "Garbage" => {
            eprintln!("this line is not a log record");
            Completion::result(id, json!("pong"))
        }
        _ => return Ok(None),
    };

    peer.send(&completion).await?;
    Ok(Some(()))
}

#[tokio::main]
async fn main() -> SdkResult<()> {
    let mut source = SampleSource::new();
    let mut peer = Peer::stdio();

    peer.accept_handshake().await?;
    source.logger.info("Logging works!");

    while let Some(message) = peer.next_message().await? {
        let invocation = match message {
            Incoming::Invocation(invocation) => invocation,
            Incoming::Close(_) => break,
        };

        if diagnostic(&mut peer, &invocation).await?.is_none() {
            peer.dispatch(&mut source, invocation).await?;
        }
    }

    source.logger.info(format!(
        "Session for '{}' closed",
        source.locator.as_deref().unwrap_or("<none>")
    ));
    Ok(())
}
