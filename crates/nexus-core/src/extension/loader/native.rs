//! Native library handles of one loaded package.

use std::ffi::{c_char, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libloading::Library;

use crate::datasource::{DataSource, DataSourceContext, ReadRequest, ResourceCatalog, TimeRange};
use crate::extension::manifest::{ExtensionManifest, ResolvedManifest};
use crate::extension::{symbols, ExtensionDescriptor, ExtensionError, Result, NATIVE_ABI_VERSION};

/// What `nexus_data_source_create` hands back, boxed once more for a thin pointer.
pub type DataSourceBox = Box<dyn DataSource>;

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type DescriptorsFn = unsafe extern "C" fn() -> *const c_char;
type CreateDataSourceFn = unsafe extern "C" fn(*const c_char) -> *mut DataSourceBox;

/// A package's entry library plus its private dependencies.
///
/// Dependencies are opened first and closed last.
pub struct ExtensionModule {
    entry_path: PathBuf,
    manifest: ExtensionManifest,
    entry: Option<Library>,
    dependencies: Vec<Library>,
}

impl ExtensionModule {
    /// Open every library named by a resolved manifest.
    pub(crate) fn open(resolved: ResolvedManifest) -> Result<Self> {
        let mut module = Self {
            entry_path: resolved.entry_path,
            manifest: resolved.manifest,
            entry: None,
            dependencies: Vec::with_capacity(resolved.dependency_paths.len()),
        };

        // On failure, `module` drops whatever was opened so far in reverse.
        for path in &resolved.dependency_paths {
            module.dependencies.push(open_library(path)?);
        }
        module.entry = Some(open_library(&module.entry_path)?);

        tracing::debug!(
            entry = %module.entry_path.display(),
            dependencies = module.dependencies.len(),
            "Opened extension libraries"
        );

        Ok(module)
    }

    pub fn entry_path(&self) -> &Path {
        &self.entry_path
    }

    pub fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    fn entry(&self) -> Result<&Library> {
        self.entry.as_ref().ok_or(ExtensionError::NotLoaded)
    }

    fn symbol<T>(&self, name: &[u8]) -> Result<libloading::Symbol<'_, T>> {
        let library = self.entry()?;
        // SAFETY: callers pair each symbol name with its exported signature.
        unsafe { library.get::<T>(name) }.map_err(|_| {
            ExtensionError::SymbolNotFound(String::from_utf8_lossy(name).trim_end_matches('\0').to_string())
        })
    }

    /// ABI version reported by the entry library.
    pub fn abi_version(&self) -> Result<u32> {
        let abi_version = self.symbol::<AbiVersionFn>(symbols::ABI_VERSION)?;
        // SAFETY: the symbol takes no arguments and returns a plain integer.
        Ok(unsafe { abi_version() })
    }

    fn check_abi(&self) -> Result<()> {
        let actual = self.abi_version()?;
        if actual != NATIVE_ABI_VERSION {
            return Err(ExtensionError::IncompatibleAbi {
                expected: NATIVE_ABI_VERSION,
                actual,
            });
        }
        Ok(())
    }

    /// Extension types exported by this package.
    pub fn descriptors(&self) -> Result<Vec<ExtensionDescriptor>> {
        self.check_abi()?;
        let descriptors = self.symbol::<DescriptorsFn>(symbols::DESCRIPTORS)?;

        // SAFETY: the export returns a NUL-terminated static string or null.
        let raw = unsafe { descriptors() };
        if raw.is_null() {
            return Ok(Vec::new());
        }
        let json = unsafe { CStr::from_ptr(raw) }.to_string_lossy();

        serde_json::from_str(&json).map_err(|e| ExtensionError::InvalidManifest {
            path: self.entry_path.clone(),
            reason: format!("invalid descriptor list: {}", e),
        })
    }

    /// Instantiate a data source exported by this package.
    ///
    /// The returned instance keeps the module alive until it is dropped.
    pub fn create_data_source(self: &Arc<Self>, id: &str) -> Result<Box<dyn DataSource>> {
        self.check_abi()?;
        let create = self.symbol::<CreateDataSourceFn>(symbols::CREATE_DATA_SOURCE)?;
        let c_id = CString::new(id).map_err(|_| ExtensionError::UnknownExtension(id.to_string()))?;

        // SAFETY: ownership of the returned box passes to the host.
        let raw = unsafe { create(c_id.as_ptr()) };
        if raw.is_null() {
            return Err(ExtensionError::UnknownExtension(id.to_string()));
        }
        let inner: DataSourceBox = *unsafe { Box::from_raw(raw) };

        Ok(Box::new(ModuleDataSource {
            inner,
            _module: Arc::clone(self),
        }))
    }
}

impl Drop for ExtensionModule {
    fn drop(&mut self) {
        drop(self.entry.take());
        while let Some(library) = self.dependencies.pop() {
            drop(library);
        }
        tracing::debug!(entry = %self.entry_path.display(), "Closed extension libraries");
    }
}

impl std::fmt::Debug for ExtensionModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionModule")
            .field("entry_path", &self.entry_path)
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

fn open_library(path: &Path) -> Result<Library> {
    // SAFETY: loading runs the library's initializers; packages are trusted
    // once restored.
    unsafe { Library::new(path) }.map_err(|e| ExtensionError::LoadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Data source from a native package, pinning the package while alive.
///
/// Field order matters: the instance is dropped before the module.
struct ModuleDataSource {
    inner: DataSourceBox,
    _module: Arc<ExtensionModule>,
}

#[async_trait]
impl DataSource for ModuleDataSource {
    async fn set_context(&mut self, context: DataSourceContext) -> crate::Result<()> {
        self.inner.set_context(context).await
    }

    async fn get_catalogs(&self) -> crate::Result<Vec<ResourceCatalog>> {
        self.inner.get_catalogs().await
    }

    async fn get_time_range(&self, catalog_id: &str) -> crate::Result<TimeRange> {
        self.inner.get_time_range(catalog_id).await
    }

    async fn get_availability(
        &self,
        catalog_id: &str,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> crate::Result<f64> {
        self.inner.get_availability(catalog_id, begin, end).await
    }

    async fn read_single(
        &self,
        request: &mut ReadRequest<'_>,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> crate::Result<()> {
        self.inner.read_single(request, begin, end).await
    }
}
