//! Restore target handling: staging, archive extraction and folder copies.
//!
//! Content is always written into a fresh sibling staging folder and renamed
//! into place once complete, so a populated target is never half-written.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::header::HeaderMap;
use tokio::io::AsyncWriteExt;

use super::http::ProviderContext;
use super::{PackageError, Result};

/// Supported package archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Decide the format from an asset name or URL.
    pub fn from_name(name: &str) -> Result<Self> {
        let lower = name.to_ascii_lowercase();

        if lower.ends_with(".zip") {
            Ok(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Ok(Self::TarGz)
        } else {
            Err(PackageError::Extraction(format!(
                "Only assets of type .zip or .tar.gz are supported, got '{}'",
                name
            )))
        }
    }
}

/// Whether `path` is an existing, non-empty directory.
pub fn is_populated(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Fresh sibling folder used to assemble `target`.
pub fn staging_dir(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "package".to_string());
    let staging = format!(".{}.partial-{}", name, uuid::Uuid::new_v4().simple());

    match target.parent() {
        Some(parent) => parent.join(staging),
        None => PathBuf::from(staging),
    }
}

/// Move a completed staging folder into place.
///
/// An empty leftover target is replaced. If another writer populated the
/// target first, their copy wins and the staging folder is discarded.
pub fn commit(staging: &Path, target: &Path) -> Result<()> {
    if target.exists() && !is_populated(target) {
        fs::remove_dir(target)?;
    }

    match fs::rename(staging, target) {
        Ok(()) => Ok(()),
        Err(_) if is_populated(target) => {
            discard(staging);
            Ok(())
        }
        Err(e) => {
            discard(staging);
            Err(e.into())
        }
    }
}

/// Best-effort removal of a file or folder.
pub fn discard(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    if let Err(e) = result {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "Failed to clean up");
        }
    }
}

/// Recursively copy `source` into `target`, creating `target`.
pub fn copy_dir(source: &Path, target: &Path) -> io::Result<()> {
    fs::create_dir_all(target)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let destination = target.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &destination)?;
        } else {
            fs::copy(entry.path(), &destination)?;
        }
    }

    Ok(())
}

/// Unpack an archive file into `target`.
pub fn extract(kind: ArchiveKind, archive: &Path, target: &Path) -> Result<()> {
    fs::create_dir_all(target)?;
    let file = File::open(archive)?;

    match kind {
        ArchiveKind::Zip => {
            let mut zip = zip::ZipArchive::new(file)
                .map_err(|e| PackageError::Extraction(format!("Invalid zip archive: {}", e)))?;
            zip.extract(target)
                .map_err(|e| PackageError::Extraction(format!("Invalid zip archive: {}", e)))?;
        }
        ArchiveKind::TarGz => {
            let decoder = flate2::read::GzDecoder::new(file);
            tar::Archive::new(decoder)
                .unpack(target)
                .map_err(|e| PackageError::Extraction(format!("Invalid tar.gz archive: {}", e)))?;
        }
    }

    // An empty target would never count as restored.
    if !is_populated(target) {
        return Err(PackageError::Extraction("archive is empty".to_string()));
    }

    Ok(())
}

/// Download `url` and extract it into `target`.
///
/// The archive format is taken from `asset_name`, and unsupported formats are
/// rejected before any bytes are fetched.
pub async fn download_and_extract(
    context: &ProviderContext,
    asset_name: &str,
    url: &str,
    headers: &HeaderMap,
    target: &Path,
) -> Result<()> {
    let kind = ArchiveKind::from_name(asset_name)?;

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let staging = staging_dir(target);
    let mut download = staging.clone().into_os_string();
    download.push(".download");
    let download = PathBuf::from(download);

    let result: Result<()> = async {
        let response = context.get(url, headers).await?;
        let mut file = tokio::fs::File::create(&download).await?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);

        tracing::debug!(asset = %asset_name, "Extracting package archive");

        let (archive, staged, final_target) =
            (download.clone(), staging.clone(), target.to_path_buf());
        tokio::task::spawn_blocking(move || {
            extract(kind, &archive, &staged)?;
            commit(&staged, &final_target)
        })
        .await
        .map_err(|e| PackageError::Extraction(format!("Extraction task failed: {}", e)))?
    }
    .await;

    discard(&download);
    if result.is_err() {
        discard(&staging);
    }

    result
}
