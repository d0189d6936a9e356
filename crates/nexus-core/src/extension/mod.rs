//! Native extension loading.
//!
//! A restored package folder contains exactly one `<name>.manifest.json`
//! next to the entry library `<name>` (platform file name, e.g.
//! `lib<name>.so`). The manifest lists private dependency libraries that are
//! opened before the entry library.
//!
//! Each load happens in a fresh [`ExtensionLoadContext`], which owns every
//! library handle of that package. Unloading drops the handles and hands out a
//! [`std::sync::Weak`] so callers can observe when the last user is gone.
//!
//! # Native ABI
//!
//! The entry library exports:
//! - `nexus_extension_abi_version() -> u32`
//! - `nexus_extension_descriptors() -> *const c_char` (JSON array)
//! - `nexus_data_source_create(id: *const c_char) -> *mut DataSourceBox`
//!
//! Trait objects cross the boundary, so extensions must be built with the
//! same toolchain and `nexus-core` version as the host. Extensions that cannot
//! meet that run out of process through [`crate::rpc`].

pub mod hive;
pub mod loader;
pub mod manifest;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use hive::{ExtensionHive, RPC_DATA_SOURCE_ID};
pub use loader::{DataSourceBox, ExtensionLoadContext, ExtensionModule};
pub use manifest::{ExtensionManifest, ResolvedManifest, MANIFEST_SUFFIX};

/// Native ABI version expected from entry libraries.
pub const NATIVE_ABI_VERSION: u32 = 1;

/// Exported symbol names (NUL-terminated for `libloading`).
pub mod symbols {
    pub const ABI_VERSION: &[u8] = b"nexus_extension_abi_version\0";
    pub const DESCRIPTORS: &[u8] = b"nexus_extension_descriptors\0";
    pub const CREATE_DATA_SOURCE: &[u8] = b"nexus_data_source_create\0";
}

/// Identification of one extension type exported by a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ExtensionDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Extension loading error types
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("Could not find a dependency manifest (*{suffix}) in folder {folder}")]
    ManifestNotFound { folder: PathBuf, suffix: &'static str },

    #[error("Found {count} dependency manifests in folder {folder}, expected one")]
    AmbiguousManifest { folder: PathBuf, count: usize },

    #[error("Invalid manifest {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("Entry artifact not found: {0}")]
    EntryArtifactNotFound(PathBuf),

    #[error("Dependency not found: {0}")]
    DependencyNotFound(PathBuf),

    #[error("The extension is already loaded")]
    AlreadyLoaded,

    #[error("The extension is not loaded")]
    NotLoaded,

    #[error("The load context has been unloaded and cannot be reused")]
    Unloaded,

    #[error("Failed to load library {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Incompatible ABI version: expected {expected}, got {actual}")]
    IncompatibleAbi { expected: u32, actual: u32 },

    #[error("Extension '{0}' is not provided by this package")]
    UnknownExtension(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for extension operations
pub type Result<T> = std::result::Result<T, ExtensionError>;

/// Check if a file is a native library for any supported platform.
pub fn is_native_library(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("so") | Some("dylib") | Some("dll")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_native_library() {
        assert!(is_native_library(Path::new("libdemo.so")));
        assert!(is_native_library(Path::new("demo.dll")));
        assert!(is_native_library(Path::new("libdemo.dylib")));
        assert!(!is_native_library(Path::new("demo.manifest.json")));
        assert!(!is_native_library(Path::new("demo")));
    }

    #[test]
    fn test_symbol_names_are_nul_terminated() {
        for symbol in [symbols::ABI_VERSION, symbols::DESCRIPTORS, symbols::CREATE_DATA_SOURCE] {
            assert_eq!(symbol.last(), Some(&0));
        }
    }

    #[test]
    fn test_descriptor_defaults() {
        let descriptor: ExtensionDescriptor = serde_json::from_str(r#"{"id":"demo.source"}"#).unwrap();
        assert_eq!(descriptor.id, "demo.source");
        assert!(descriptor.name.is_empty());
    }
}
