//! Package controller: discover, restore and load one package reference.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use super::http::ProviderContext;
use super::provider::ProviderRegistry;
use super::reference::PackageReference;
use super::Result;
use crate::extension::{ExtensionError, ExtensionLoadContext, ExtensionModule};

/// Drives one [`PackageReference`] through its provider.
///
/// Discovery and restore are stateless and may run concurrently for
/// different references. Loading keeps the current load unit so it can be
/// unloaded later.
pub struct PackageController {
    reference: PackageReference,
    registry: Arc<ProviderRegistry>,
    context: ProviderContext,
    load_context: Option<ExtensionLoadContext>,
}

impl PackageController {
    pub fn new(reference: PackageReference) -> Self {
        Self {
            reference,
            registry: Arc::new(ProviderRegistry::with_defaults()),
            context: ProviderContext::new(),
            load_context: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_context(mut self, context: ProviderContext) -> Self {
        self.context = context;
        self
    }

    pub fn reference(&self) -> &PackageReference {
        &self.reference
    }

    /// Available versions, newest first in the provider's native order.
    pub async fn discover(&self) -> Result<Vec<String>> {
        let provider = self.registry.get(self.reference.provider())?;

        tracing::debug!(reference = %self.reference, "Discovering package versions");
        provider.discover(&self.context, &self.reference).await
    }

    /// Restore the referenced version below `restore_root` and return its folder.
    ///
    /// Returns immediately when the deterministic target is already populated.
    pub async fn restore(&self, restore_root: &Path) -> Result<PathBuf> {
        let provider = self.registry.get(self.reference.provider())?;
        let provider_root = restore_root.join(provider.name());

        provider
            .restore(&self.context, &self.reference, &provider_root)
            .await
    }

    /// Restore the package and open it in a fresh load unit.
    pub async fn load(&mut self, restore_root: &Path) -> crate::Result<Arc<ExtensionModule>> {
        if self.is_loaded() {
            return Err(ExtensionError::AlreadyLoaded.into());
        }

        let folder = self.restore(restore_root).await?;

        let mut load_context = ExtensionLoadContext::new();
        let module = load_context.load(&folder)?;
        self.load_context = Some(load_context);

        tracing::info!(
            reference = %self.reference,
            entry = %module.entry_path().display(),
            "Package loaded"
        );

        Ok(module)
    }

    /// Unload the current load unit; it is discarded afterwards.
    pub fn unload(&mut self) -> crate::Result<Weak<ExtensionModule>> {
        let mut load_context = self.load_context.take().ok_or(ExtensionError::NotLoaded)?;
        Ok(load_context.unload()?)
    }

    pub fn is_loaded(&self) -> bool {
        self.load_context
            .as_ref()
            .map(ExtensionLoadContext::is_loaded)
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for PackageController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageController")
            .field("reference", &self.reference)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
