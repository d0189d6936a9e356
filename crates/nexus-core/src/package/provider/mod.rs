//! Provider strategies and their registry.
//!
//! Providers are selected by their string tag. Adding a provider means
//! registering one more [`ProviderStrategy`]; callers never change.

pub mod github;
pub mod gitlab;
pub mod local;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::http::ProviderContext;
use super::reference::PackageReference;
use super::{PackageError, Result};

pub use github::GitHubReleasesProvider;
pub use gitlab::GitLabPackagesGenericProvider;
pub use local::LocalProvider;

/// A named way of discovering and restoring packages.
#[async_trait]
pub trait ProviderStrategy: Send + Sync {
    /// Tag used in [`PackageReference::provider`].
    fn name(&self) -> &'static str;

    /// Available version identifiers, newest first.
    async fn discover(
        &self,
        context: &ProviderContext,
        reference: &PackageReference,
    ) -> Result<Vec<String>>;

    /// Restore the referenced version below `provider_root` and return the
    /// restored folder. `provider_root` is `<restore root>/<provider tag>`.
    async fn restore(
        &self,
        context: &ProviderContext,
        reference: &PackageReference,
        provider_root: &Path,
    ) -> Result<PathBuf>;
}

/// Table of provider strategies keyed by tag.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn ProviderStrategy>>,
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registry with the built-in providers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalProvider));
        registry.register(Arc::new(GitHubReleasesProvider));
        registry.register(Arc::new(GitLabPackagesGenericProvider));
        registry
    }

    /// Add or replace a provider.
    pub fn register(&mut self, provider: Arc<dyn ProviderStrategy>) {
        self.providers.insert(provider.name(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderStrategy>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| PackageError::UnsupportedProvider(name.to_string()))
    }

    /// Registered tags, sorted.
    pub fn providers(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.providers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

/// Folder name for a project path: `/` becomes `_`, lowercased.
pub(crate) fn normalize_project_path(project_path: &str) -> String {
    project_path.replace('/', "_").to_lowercase()
}

/// Validate a value used as a single folder name below the restore root.
pub(crate) fn path_segment<'a>(provider: &str, key: &str, value: &'a str) -> Result<&'a str> {
    let mut components = Path::new(value).components();

    match (components.next(), components.next()) {
        (Some(std::path::Component::Normal(_)), None) => Ok(value),
        _ => Err(PackageError::invalid(
            provider,
            key,
            format!("'{}' is not a plain folder name", value),
        )),
    }
}

/// Compile an `AssetSelector`, reporting bad patterns as configuration errors.
pub(crate) fn asset_selector(provider: &str, pattern: &str) -> Result<regex::Regex> {
    regex::Regex::new(pattern).map_err(|e| PackageError::invalid(provider, "AssetSelector", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_providers() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(
            registry.providers(),
            vec!["github-releases", "gitlab-packages-generic-v4", "local"]
        );
        assert!(registry.contains("local"));
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::with_defaults();
        assert!(matches!(
            registry.get("gitlab-releases-v4"),
            Err(PackageError::UnsupportedProvider(name)) if name == "gitlab-releases-v4"
        ));
    }

    #[test]
    fn test_normalize_project_path() {
        assert_eq!(normalize_project_path("Nexus-Org/Demo"), "nexus-org_demo");
        assert_eq!(normalize_project_path("a/b/c"), "a_b_c");
    }

    #[test]
    fn test_path_segment() {
        assert_eq!(path_segment("local", "Version", "1.2.0").unwrap(), "1.2.0");
        assert!(path_segment("local", "Version", "../escape").is_err());
        assert!(path_segment("local", "Version", "a/b").is_err());
        assert!(path_segment("local", "Version", "/abs").is_err());
    }

    #[test]
    fn test_invalid_asset_selector() {
        assert!(matches!(
            asset_selector("github-releases", "(unclosed"),
            Err(PackageError::InvalidConfiguration { key, .. }) if key == "AssetSelector"
        ));
    }
}
