//! Load units for restored native packages.

pub mod native;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

pub use native::{DataSourceBox, ExtensionModule};

use super::{manifest, ExtensionError, Result};

enum LoadState {
    Empty,
    Loaded(Arc<ExtensionModule>),
    Unloaded,
}

/// One isolated, single-use load of a package.
///
/// `Empty -> Loaded -> Unloaded`. A context is never reused: loading another
/// version means creating a new context.
pub struct ExtensionLoadContext {
    state: LoadState,
    restore_folder: Option<PathBuf>,
}

impl ExtensionLoadContext {
    pub fn new() -> Self {
        Self {
            state: LoadState::Empty,
            restore_folder: None,
        }
    }

    /// Resolve the manifest in `restore_folder` and open its libraries.
    pub fn load(&mut self, restore_folder: &Path) -> Result<Arc<ExtensionModule>> {
        match self.state {
            LoadState::Loaded(_) => return Err(ExtensionError::AlreadyLoaded),
            LoadState::Unloaded => return Err(ExtensionError::Unloaded),
            LoadState::Empty => {}
        }

        let resolved = manifest::resolve(restore_folder)?;
        tracing::debug!(
            manifest = %resolved.manifest_path.display(),
            entry = %resolved.entry_path.display(),
            "Loading extension package"
        );

        let module = Arc::new(ExtensionModule::open(resolved)?);

        self.restore_folder = Some(restore_folder.to_path_buf());
        self.state = LoadState::Loaded(Arc::clone(&module));

        Ok(module)
    }

    /// Release this context's handle and return a weak reference to the module.
    ///
    /// The libraries close once every outstanding strong handle (including
    /// data sources created from the module) is dropped.
    pub fn unload(&mut self) -> Result<Weak<ExtensionModule>> {
        match std::mem::replace(&mut self.state, LoadState::Unloaded) {
            LoadState::Loaded(module) => {
                let weak = Arc::downgrade(&module);
                drop(module);

                tracing::debug!(
                    folder = ?self.restore_folder,
                    alive = weak.strong_count(),
                    "Unloaded extension package"
                );

                Ok(weak)
            }
            previous => {
                self.state = previous;
                Err(ExtensionError::NotLoaded)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, LoadState::Loaded(_))
    }

    pub fn module(&self) -> Option<Arc<ExtensionModule>> {
        match &self.state {
            LoadState::Loaded(module) => Some(Arc::clone(module)),
            _ => None,
        }
    }

    pub fn restore_folder(&self) -> Option<&Path> {
        self.restore_folder.as_deref()
    }
}

impl Default for ExtensionLoadContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unload_before_load() {
        let mut context = ExtensionLoadContext::new();
        assert!(matches!(context.unload(), Err(ExtensionError::NotLoaded)));
        assert!(!context.is_loaded());
    }

    #[test]
    fn test_failed_load_leaves_context_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = ExtensionLoadContext::new();

        assert!(matches!(
            context.load(dir.path()),
            Err(ExtensionError::ManifestNotFound { .. })
        ));
        assert!(!context.is_loaded());
        assert!(context.module().is_none());
    }
}
