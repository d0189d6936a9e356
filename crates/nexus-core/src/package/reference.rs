//! Package reference descriptor.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{PackageError, Result};

/// Immutable descriptor of where to fetch an extension package.
///
/// Keys are provider specific and are only validated when an operation
/// actually needs them. Equality and hashing are by value, so references can
/// key caches directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageReference {
    provider: String,
    #[serde(default)]
    configuration: BTreeMap<String, String>,
}

impl PackageReference {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            configuration: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }

    pub fn from_parts(provider: impl Into<String>, configuration: BTreeMap<String, String>) -> Self {
        Self {
            provider: provider.into(),
            configuration,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn configuration(&self) -> &BTreeMap<String, String> {
        &self.configuration
    }

    /// Optional key; blank values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.configuration
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Required key, failing with the provider and key name.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| PackageError::configuration(&self.provider, key))
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.provider)?;
        for (key, value) in &self.configuration {
            // tokens stay out of logs
            if key.eq_ignore_ascii_case("token") {
                write!(f, " {}=***", key)?;
            } else {
                write!(f, " {}={}", key, value)?;
            }
        }
        Ok(())
    }
}
