//! Dependency manifest discovery and resolution.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{ExtensionError, Result};

/// File name suffix of a dependency manifest.
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Contents of `<name>.manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Private libraries, relative to the manifest folder, in load order.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A manifest with every path resolved and checked to exist.
#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    pub manifest_path: PathBuf,
    pub entry_path: PathBuf,
    pub dependency_paths: Vec<PathBuf>,
    pub manifest: ExtensionManifest,
}

/// Find the single manifest below `folder` (searched recursively).
pub fn find_manifest(folder: &Path) -> Result<PathBuf> {
    let mut found = Vec::new();
    collect_manifests(folder, &mut found)?;

    match found.len() {
        0 => Err(ExtensionError::ManifestNotFound {
            folder: folder.to_path_buf(),
            suffix: MANIFEST_SUFFIX,
        }),
        1 => Ok(found.remove(0)),
        count => Err(ExtensionError::AmbiguousManifest {
            folder: folder.to_path_buf(),
            count,
        }),
    }
}

fn collect_manifests(folder: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            collect_manifests(&path, found)?;
        } else if entry.file_name().to_string_lossy().ends_with(MANIFEST_SUFFIX) {
            found.push(path);
        }
    }

    Ok(())
}

/// Locate and parse the manifest, then resolve the entry and dependencies.
pub fn resolve(folder: &Path) -> Result<ResolvedManifest> {
    let manifest_path = find_manifest(folder)?;

    let invalid = |reason: String| ExtensionError::InvalidManifest {
        path: manifest_path.clone(),
        reason,
    };

    let content = fs::read_to_string(&manifest_path)?;
    let manifest: ExtensionManifest =
        serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;

    let file_name = manifest_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name.strip_suffix(MANIFEST_SUFFIX).unwrap_or(&file_name);

    if stem.is_empty() {
        return Err(invalid("manifest file name has no stem".to_string()));
    }

    let base = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| folder.to_path_buf());

    let entry_path = base.join(libloading::library_filename(stem));
    if !entry_path.is_file() {
        return Err(ExtensionError::EntryArtifactNotFound(entry_path));
    }

    let mut dependency_paths = Vec::with_capacity(manifest.dependencies.len());
    for dependency in &manifest.dependencies {
        let relative = Path::new(dependency);
        let contained = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));

        if !contained {
            return Err(invalid(format!(
                "dependency '{}' must be a relative path inside the package",
                dependency
            )));
        }

        let path = base.join(relative);
        if !path.is_file() {
            return Err(ExtensionError::DependencyNotFound(path));
        }
        dependency_paths.push(path);
    }

    Ok(ResolvedManifest {
        manifest_path,
        entry_path,
        dependency_paths,
        manifest,
    })
}
