//! `github-releases` provider: assets attached to GitHub releases.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use super::{asset_selector, normalize_project_path, path_segment, ProviderStrategy};
use crate::config::package::{GITHUB_ACCEPT, OCTET_STREAM, PER_PAGE, USER_AGENT};
use crate::package::archive;
use crate::package::http::{self, ProviderContext};
use crate::package::reference::PackageReference;
use crate::package::{PackageError, Result};

const NAME: &str = "github-releases";

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    url: String,
    #[serde(default)]
    browser_download_url: Option<String>,
}

/// Releases of `ProjectPath`; restore downloads the asset matching
/// `AssetSelector` from release `Tag`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitHubReleasesProvider;

impl GitHubReleasesProvider {
    fn headers(reference: &PackageReference, accept: &'static str) -> Result<HeaderMap> {
        let authorization = reference.get("Token").map(|token| format!("token {}", token));

        let mut entries = vec![("user-agent", USER_AGENT), ("accept", accept)];
        if let Some(authorization) = authorization.as_deref() {
            entries.push(("authorization", authorization));
        }

        http::headers(NAME, entries)
    }
}

#[async_trait]
impl ProviderStrategy for GitHubReleasesProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn discover(
        &self,
        context: &ProviderContext,
        reference: &PackageReference,
    ) -> Result<Vec<String>> {
        let project_path = reference.require("ProjectPath")?;
        let headers = Self::headers(reference, GITHUB_ACCEPT)?;

        let url = format!(
            "{}/repos/{}/releases?per_page={}&page=1",
            context.github_api(),
            project_path,
            PER_PAGE
        );

        // GitHub lists newest first already; keep visited order.
        context
            .paginate(url, &headers)
            .await?
            .into_iter()
            .map(|release| {
                serde_json::from_value::<GitHubRelease>(release)
                    .map(|release| release.tag_name)
                    .map_err(PackageError::from)
            })
            .collect()
    }

    async fn restore(
        &self,
        context: &ProviderContext,
        reference: &PackageReference,
        provider_root: &Path,
    ) -> Result<PathBuf> {
        let project_path = reference.require("ProjectPath")?;
        let tag = path_segment(NAME, "Tag", reference.require("Tag")?)?;
        let selector_pattern = reference.require("AssetSelector")?;
        let selector = asset_selector(NAME, selector_pattern)?;

        let project_folder = normalize_project_path(project_path);
        let target = provider_root
            .join(path_segment(NAME, "ProjectPath", &project_folder)?)
            .join(tag);

        if archive::is_populated(&target) {
            tracing::info!(target = %target.display(), "Package already restored");
            return Ok(target);
        }

        let url = format!(
            "{}/repos/{}/releases/tags/{}",
            context.github_api(),
            project_path,
            urlencoding::encode(tag)
        );

        let headers = Self::headers(reference, GITHUB_ACCEPT)?;
        let release: GitHubRelease = serde_json::from_value(context.get_json(&url, &headers).await?)?;

        let asset = release
            .assets
            .iter()
            .find(|asset| selector.is_match(&asset.name))
            .ok_or_else(|| PackageError::AssetNotFound {
                provider: NAME.to_string(),
                selector: selector_pattern.to_string(),
            })?;

        tracing::info!(
            project = %project_path,
            tag = %release.tag_name,
            asset = %asset.name,
            "Restoring GitHub release asset"
        );

        let kind_hint = asset.browser_download_url.as_deref().unwrap_or(&asset.name);
        let download_headers = Self::headers(reference, OCTET_STREAM)?;

        archive::download_and_extract(context, kind_hint, &asset.url, &download_headers, &target)
            .await?;

        Ok(target)
    }
}
