//! Extension hive: the set of currently loaded extension packages.
//!
//! The hive provides:
//! - Reloading a whole package list (old load units are released first)
//! - A descriptor index over every loaded package
//! - Data source instantiation, native or RPC-backed

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use super::{ExtensionDescriptor, ExtensionModule};
use crate::datasource::DataSource;
use crate::error::{Error, Result};
use crate::package::{PackageController, PackageReference, ProviderContext, ProviderRegistry};
use crate::rpc::RpcDataSource;

/// Id of the built-in data source that drives an extension process.
pub const RPC_DATA_SOURCE_ID: &str = "nexus.rpc";

/// A registered extension type and the module that provides it.
struct HiveEntry {
    descriptor: ExtensionDescriptor,
    module: Arc<ExtensionModule>,
}

/// Owns the package controllers of all loaded packages.
pub struct ExtensionHive {
    restore_root: PathBuf,
    registry: Arc<ProviderRegistry>,
    context: ProviderContext,
    controllers: Vec<PackageController>,
    entries: HashMap<String, HiveEntry>,
}

impl ExtensionHive {
    pub fn new(restore_root: impl Into<PathBuf>) -> Self {
        Self {
            restore_root: restore_root.into(),
            registry: Arc::new(ProviderRegistry::with_defaults()),
            context: ProviderContext::new(),
            controllers: Vec::new(),
            entries: HashMap::new(),
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

    pub fn restore_root(&self) -> &Path {
        &self.restore_root
    }

    /// Replace the loaded package set with `references`.
    ///
    /// Previously loaded packages are unloaded first; their weak handles are
    /// returned so the caller can check that they were released. A package
    /// that fails to load is logged and skipped.
    pub async fn load_packages(&mut self, references: &[PackageReference]) -> Vec<Weak<ExtensionModule>> {
        let released = self.unload_all();

        for reference in references {
            let mut controller = PackageController::new(reference.clone())
                .with_registry(Arc::clone(&self.registry))
                .with_context(self.context.clone());

            let module = match controller.load(&self.restore_root).await {
                Ok(module) => module,
                Err(e) => {
                    tracing::error!(reference = %reference, error = %e, "Failed to load package");
                    continue;
                }
            };

            match module.descriptors() {
                Ok(descriptors) => {
                    for descriptor in descriptors {
                        self.register(descriptor, &module);
                    }
                    self.controllers.push(controller);
                }
                Err(e) => {
                    tracing::error!(reference = %reference, error = %e, "Package exports no usable extensions");
                    drop(module);
                    if let Err(e) = controller.unload() {
                        tracing::debug!(error = %e, "Unload after failed inspection");
                    }
                }
            }
        }

        tracing::info!(
            packages = self.controllers.len(),
            extensions = self.entries.len(),
            "Extension packages loaded"
        );

        released
    }

    fn register(&mut self, descriptor: ExtensionDescriptor, module: &Arc<ExtensionModule>) {
        if descriptor.id == RPC_DATA_SOURCE_ID || self.entries.contains_key(&descriptor.id) {
            tracing::warn!(id = %descriptor.id, entry = %module.entry_path().display(), "Duplicate extension id ignored");
            return;
        }

        self.entries.insert(
            descriptor.id.clone(),
            HiveEntry {
                descriptor,
                module: Arc::clone(module),
            },
        );
    }

    fn unload_all(&mut self) -> Vec<Weak<ExtensionModule>> {
        // The index holds strong handles too; release those first.
        self.entries.clear();

        let mut released = Vec::with_capacity(self.controllers.len());
        for mut controller in self.controllers.drain(..) {
            match controller.unload() {
                Ok(weak) => {
                    tracing::debug!(
                        reference = %controller.reference(),
                        alive = weak.strong_count(),
                        "Released package"
                    );
                    released.push(weak);
                }
                Err(e) => tracing::warn!(reference = %controller.reference(), error = %e, "Failed to unload package"),
            }
        }

        released
    }

    /// Descriptors of every available extension, built-ins first.
    pub fn extensions(&self) -> Vec<ExtensionDescriptor> {
        let mut loaded: Vec<ExtensionDescriptor> =
            self.entries.values().map(|entry| entry.descriptor.clone()).collect();
        loaded.sort_by(|a, b| a.id.cmp(&b.id));

        let mut all = vec![rpc_descriptor()];
        all.extend(loaded);
        all
    }

    /// Create a fresh, not yet activated data source instance.
    pub fn get_data_source(&self, id: &str) -> Result<Box<dyn DataSource>> {
        if id == RPC_DATA_SOURCE_ID {
            return Ok(Box::new(RpcDataSource::new()));
        }

        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| Error::ExtensionNotFound(id.to_string()))?;

        Ok(entry.module.create_data_source(id)?)
    }

    pub fn loaded_packages(&self) -> Vec<&PackageReference> {
        self.controllers.iter().map(PackageController::reference).collect()
    }
}

impl std::fmt::Debug for ExtensionHive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHive")
            .field("restore_root", &self.restore_root)
            .field("packages", &self.controllers.len())
            .field("extensions", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn rpc_descriptor() -> ExtensionDescriptor {
    ExtensionDescriptor::new(
        RPC_DATA_SOURCE_ID,
        "RPC data source",
        "Runs a data source in a child process and talks to it over stdio",
    )
}
