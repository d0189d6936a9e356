//! Shared configuration defaults.
//!
//! Constants used across the package, extension and RPC modules, plus helpers
//! that read overrides from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Default endpoint constants
pub mod endpoints {
    pub const GITHUB_API: &str = "https://api.github.com";
}

/// Package provider constants
pub mod package {
    /// Hard cap on the number of listing pages visited per discovery.
    pub const MAX_PAGES: usize = 20;
    /// Page size requested from registries.
    pub const PER_PAGE: usize = 100;
    pub const USER_AGENT: &str = "Nexus";
    pub const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
    pub const OCTET_STREAM: &str = "application/octet-stream";
    pub const DEFAULT_RESTORE_ROOT: &str = ".nexus/packages";
}

/// RPC session constants
pub mod rpc {
    use std::time::Duration;

    pub const PROTOCOL: &str = "json";
    pub const PROTOCOL_VERSION: u32 = 1;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(60);
    pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Environment variable names
pub mod env_vars {
    pub const PACKAGES_PATH: &str = "NEXUS_PACKAGES_PATH";
    pub const GITHUB_API: &str = "NEXUS_GITHUB_API";
    pub const LOG_JSON: &str = "NEXUS_LOG_JSON";
    pub const RPC_CALL_TIMEOUT_SECS: &str = "NEXUS_RPC_CALL_TIMEOUT_SECS";
}

/// Restore root from `NEXUS_PACKAGES_PATH`, or the default relative folder.
pub fn restore_root() -> PathBuf {
    std::env::var(env_vars::PACKAGES_PATH)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(package::DEFAULT_RESTORE_ROOT))
}

/// GitHub API base from `NEXUS_GITHUB_API`, or the public endpoint.
pub fn github_api() -> String {
    std::env::var(env_vars::GITHUB_API)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(normalize_endpoint)
        .unwrap_or_else(|| endpoints::GITHUB_API.to_string())
}

/// Steady-state RPC call timeout, overridable through the environment.
pub fn rpc_call_timeout() -> Duration {
    std::env::var(env_vars::RPC_CALL_TIMEOUT_SECS)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(rpc::CALL_TIMEOUT)
}

/// Whether logs should be emitted as JSON lines.
pub fn log_json() -> bool {
    std::env::var(env_vars::LOG_JSON)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(false)
}

/// Strip trailing slashes so paths can be appended with `format!`.
pub fn normalize_endpoint(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("http://localhost:8080/".to_string()),
            "http://localhost:8080"
        );
        assert_eq!(
            normalize_endpoint("https://api.github.com".to_string()),
            "https://api.github.com"
        );
    }

    #[test]
    fn test_protocol_constants() {
        assert_eq!(package::MAX_PAGES, 20);
        assert_eq!(package::PER_PAGE, 100);
        assert_eq!(rpc::CONNECT_TIMEOUT, Duration::from_secs(10));
        assert_eq!(rpc::CALL_TIMEOUT, Duration::from_secs(60));
    }
}
