//! Wire messages of the RPC protocol.
//!
//! One JSON object per line on the child's stdin/stdout. The framing follows
//! the SignalR hub protocol numbering
//! (<https://github.com/dotnet/aspnetcore/blob/main/src/SignalR/docs/specs/HubProtocol.md>)
//! so existing client libraries can be reused by extension authors. Bulk
//! payloads travel as raw bytes right after the completion that announced them.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::rpc::{PROTOCOL, PROTOCOL_VERSION};
use crate::datasource::ResourceCatalog;

/// `type` discriminators.
pub mod message_type {
    pub const INVOCATION: u8 = 1;
    pub const COMPLETION: u8 = 3;
    pub const CLOSE: u8 = 7;
}

/// `type` field of a raw message, if present.
pub fn message_type_of(value: &Value) -> Option<u8> {
    value
        .get("type")
        .and_then(Value::as_u64)
        .and_then(|t| u8::try_from(t).ok())
}

// ============================================================================
// Handshake
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            version: PROTOCOL_VERSION,
        }
    }
}

impl HandshakeRequest {
    pub fn is_supported(&self) -> bool {
        self.protocol == PROTOCOL && self.version == PROTOCOL_VERSION
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// Hub messages
// ============================================================================

/// A call (with id) or a notification (`invocationId: null`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    #[serde(rename = "type")]
    pub message_type: u8,
    pub invocation_id: Option<String>,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl Invocation {
    pub fn call(invocation_id: impl Into<String>, target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            message_type: message_type::INVOCATION,
            invocation_id: Some(invocation_id.into()),
            target: target.into(),
            arguments,
        }
    }

    pub fn notification(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            message_type: message_type::INVOCATION,
            invocation_id: None,
            target: target.into(),
            arguments,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.invocation_id.is_none()
    }
}

/// Answer to a call. Carries at most one of `result` and `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<u8>,
    #[serde(default)]
    pub invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Completion {
    pub fn result(invocation_id: Option<String>, result: Value) -> Self {
        Self {
            message_type: Some(message_type::COMPLETION),
            invocation_id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(invocation_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            message_type: Some(message_type::COMPLETION),
            invocation_id,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Graceful end of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Close {
    #[serde(rename = "type")]
    pub message_type: u8,
    #[serde(default)]
    pub error: Option<String>,
}

impl Default for Close {
    fn default() -> Self {
        Self {
            message_type: message_type::CLOSE,
            error: None,
        }
    }
}

// ============================================================================
// Log records (stderr)
// ============================================================================

/// Severity of a log record written by a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(alias = "trace")]
    Trace,
    #[serde(alias = "debug")]
    Debug,
    #[serde(alias = "information", alias = "info", alias = "Info")]
    Information,
    #[serde(alias = "warning", alias = "warn", alias = "Warn")]
    Warning,
    #[serde(alias = "error")]
    Error,
    #[serde(alias = "critical")]
    Critical,
    #[serde(alias = "none")]
    None,
}

/// One stderr line of a child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMessage {
    #[serde(alias = "LogLevel")]
    pub log_level: LogLevel,
    #[serde(alias = "Message")]
    pub message: String,
}

impl LogMessage {
    pub fn new(log_level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            log_level,
            message: message.into(),
        }
    }

    /// Forward to the host's tracing subscriber.
    pub fn emit(&self, source: &str) {
        let message = self.message.as_str();
        match self.log_level {
            LogLevel::Trace => tracing::trace!(target: "nexus::extension", source, "{}", message),
            LogLevel::Debug => tracing::debug!(target: "nexus::extension", source, "{}", message),
            LogLevel::Information => {
                tracing::info!(target: "nexus::extension", source, "{}", message)
            }
            LogLevel::Warning => tracing::warn!(target: "nexus::extension", source, "{}", message),
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(target: "nexus::extension", source, "{}", message)
            }
            LogLevel::None => {}
        }
    }
}

// ============================================================================
// Data source payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogsResponse {
    #[serde(alias = "Catalogs")]
    pub catalogs: Vec<ResourceCatalog>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRangeResponse {
    #[serde(alias = "Begin", deserialize_with = "deserialize_utc")]
    pub begin: DateTime<Utc>,
    #[serde(alias = "End", deserialize_with = "deserialize_utc")]
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    #[serde(alias = "Availability")]
    pub availability: f64,
}

/// Wire format of time arguments.
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parse an RFC 3339 time; a missing offset is read as UTC.
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn deserialize_utc<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_time(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", value)))
}
