//! `local` provider: version folders below a local path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{path_segment, ProviderStrategy};
use crate::package::archive;
use crate::package::http::ProviderContext;
use crate::package::reference::PackageReference;
use crate::package::{PackageError, Result};

const NAME: &str = "local";

/// Versions are the subfolders of `Path`; restore copies `Path/Version`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalProvider;

impl LocalProvider {
    /// Stable folder name for a source path: the first 16 bytes of its
    /// SHA-256 digest, formatted as a UUID.
    pub fn path_hash(path: &str) -> String {
        let digest = Sha256::digest(path.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        uuid::Uuid::from_bytes(bytes).to_string()
    }
}

#[async_trait]
impl ProviderStrategy for LocalProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn discover(
        &self,
        _context: &ProviderContext,
        reference: &PackageReference,
    ) -> Result<Vec<String>> {
        let path = PathBuf::from(reference.require("Path")?);

        if !path.is_dir() {
            return Err(PackageError::SourceNotFound(path));
        }

        let mut versions = Vec::new();
        let mut entries = tokio::fs::read_dir(&path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                versions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        // Plain lexical order, reversed; not semantic version order.
        versions.sort();
        versions.reverse();

        Ok(versions)
    }

    async fn restore(
        &self,
        _context: &ProviderContext,
        reference: &PackageReference,
        provider_root: &Path,
    ) -> Result<PathBuf> {
        let path = reference.require("Path")?;
        let version = path_segment(NAME, "Version", reference.require("Version")?)?;

        let source = Path::new(path).join(version);

        if !source.is_dir() {
            return Err(PackageError::SourceNotFound(source));
        }

        let target = provider_root.join(Self::path_hash(path)).join(version);

        if archive::is_populated(&target) {
            tracing::info!(target = %target.display(), "Package already restored");
            return Ok(target);
        }

        tracing::info!(
            source = %source.display(),
            target = %target.display(),
            "Restoring local package"
        );

        let destination = target.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let staging = archive::staging_dir(&destination);

            if let Err(e) = archive::copy_dir(&source, &staging) {
                archive::discard(&staging);
                return Err(e.into());
            }

            archive::commit(&staging, &destination)
        })
        .await
        .map_err(|e| PackageError::Io(std::io::Error::other(e)))??;

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_path_hash_is_stable() {
        let a = LocalProvider::path_hash("/pkgs/demo");
        let b = LocalProvider::path_hash("/pkgs/demo");
        let c = LocalProvider::path_hash("/pkgs/other");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[tokio::test]
    async fn test_discover_reverse_lexical() {
        let source = tempfile::tempdir().unwrap();
        for version in ["1.10.0", "1.2.0", "1.9.0"] {
            fs::create_dir_all(source.path().join(version)).unwrap();
        }
        fs::write(source.path().join("README.md"), b"not a version").unwrap();

        let reference = PackageReference::new(NAME)
            .with_config("Path", source.path().to_string_lossy());
        let versions = LocalProvider
            .discover(&ProviderContext::new(), &reference)
            .await
            .unwrap();

        assert_eq!(versions, vec!["1.9.0", "1.2.0", "1.10.0"]);
    }

    #[tokio::test]
    async fn test_discover_missing_path() {
        let reference = PackageReference::new(NAME).with_config("Path", "/nonexistent/nexus/pkgs");
        let result = LocalProvider
            .discover(&ProviderContext::new(), &reference)
            .await;

        assert!(matches!(result, Err(PackageError::SourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_restore_requires_version() {
        let root = tempfile::tempdir().unwrap();
        let reference = PackageReference::new(NAME).with_config("Path", "/pkgs/demo");
        let result = LocalProvider
            .restore(&ProviderContext::new(), &reference, root.path())
            .await;

        match result {
            Err(PackageError::Configuration { provider, key }) => {
                assert_eq!(provider, "local");
                assert_eq!(key, "Version");
            }
            other => panic!("Expected configuration error, got {:?}", other),
        }
    }
}
