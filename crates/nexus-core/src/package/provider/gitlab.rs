//! `gitlab-packages-generic-v4` provider: GitLab generic package registry.
//!
//! Listing: <https://docs.gitlab.com/ee/api/packages.html#within-a-project>,
//! download: <https://docs.gitlab.com/ee/user/packages/generic_packages/>.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use super::{asset_selector, normalize_project_path, path_segment, ProviderStrategy};
use crate::config::{self, package::PER_PAGE, package::USER_AGENT};
use crate::package::archive;
use crate::package::http::{self, ProviderContext};
use crate::package::reference::PackageReference;
use crate::package::{PackageError, Result};

const NAME: &str = "gitlab-packages-generic-v4";

#[derive(Debug, Deserialize)]
struct GitLabPackage {
    id: u64,
    version: String,
}

#[derive(Debug, Deserialize)]
struct GitLabPackageFile {
    file_name: String,
}

/// Versions of generic package `Package` in project `ProjectPath` on `Server`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitLabPackagesGenericProvider;

/// Connection details shared by discovery and restore.
struct GitLabProject<'a> {
    server: String,
    project_path: &'a str,
    package: &'a str,
    headers: HeaderMap,
}

impl<'a> GitLabProject<'a> {
    fn from_reference(reference: &'a PackageReference) -> Result<Self> {
        let server = config::normalize_endpoint(reference.require("Server")?.to_string());
        let project_path = reference.require("ProjectPath")?;
        let package = reference.require("Package")?;

        let mut entries = vec![("user-agent", USER_AGENT)];
        if let Some(token) = reference.get("Token") {
            entries.push(("private-token", token));
        }

        Ok(Self {
            server,
            project_path,
            package,
            headers: http::headers(NAME, entries)?,
        })
    }

    fn project_url(&self) -> String {
        format!(
            "{}/api/v4/projects/{}",
            self.server,
            urlencoding::encode(self.project_path)
        )
    }

    async fn packages(&self, context: &ProviderContext) -> Result<Vec<GitLabPackage>> {
        let url = format!(
            "{}/packages?package_type=generic&package_name={}&per_page={}&page=1",
            self.project_url(),
            urlencoding::encode(self.package),
            PER_PAGE
        );

        context
            .paginate(url, &self.headers)
            .await?
            .into_iter()
            .map(|entry| serde_json::from_value(entry).map_err(PackageError::from))
            .collect()
    }
}

#[async_trait]
impl ProviderStrategy for GitLabPackagesGenericProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn discover(
        &self,
        context: &ProviderContext,
        reference: &PackageReference,
    ) -> Result<Vec<String>> {
        let project = GitLabProject::from_reference(reference)?;

        // GitLab lists oldest first.
        let mut versions: Vec<String> = project
            .packages(context)
            .await?
            .into_iter()
            .map(|package| package.version)
            .collect();
        versions.reverse();

        Ok(versions)
    }

    async fn restore(
        &self,
        context: &ProviderContext,
        reference: &PackageReference,
        provider_root: &Path,
    ) -> Result<PathBuf> {
        let project = GitLabProject::from_reference(reference)?;
        let version = path_segment(NAME, "Version", reference.require("Version")?)?;
        let selector_pattern = reference.require("AssetSelector")?;
        let selector = asset_selector(NAME, selector_pattern)?;

        let project_folder = normalize_project_path(project.project_path);
        let target = provider_root
            .join(path_segment(NAME, "ProjectPath", &project_folder)?)
            .join(version);

        if archive::is_populated(&target) {
            tracing::info!(target = %target.display(), "Package already restored");
            return Ok(target);
        }

        // A re-published version shows up more than once; the last entry wins.
        let package = project
            .packages(context)
            .await?
            .into_iter()
            .rev()
            .find(|package| package.version == version)
            .ok_or_else(|| PackageError::VersionNotFound {
                provider: NAME.to_string(),
                version: version.to_string(),
            })?;

        let files_url = format!("{}/packages/{}/package_files", project.project_url(), package.id);
        let files: Vec<GitLabPackageFile> =
            serde_json::from_value(context.get_json(&files_url, &project.headers).await?)?;

        let file = files
            .iter()
            .find(|file| selector.is_match(&file.file_name))
            .ok_or_else(|| PackageError::AssetNotFound {
                provider: NAME.to_string(),
                selector: selector_pattern.to_string(),
            })?;

        tracing::info!(
            project = %project.project_path,
            package = %project.package,
            version = %version,
            file = %file.file_name,
            "Restoring GitLab generic package"
        );

        let download_url = format!(
            "{}/packages/generic/{}/{}/{}",
            project.project_url(),
            urlencoding::encode(project.package),
            urlencoding::encode(version),
            urlencoding::encode(&file.file_name)
        );

        archive::download_and_extract(
            context,
            &file.file_name,
            &download_url,
            &project.headers,
            &target,
        )
        .await?;

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_url_encodes_path() {
        let reference = PackageReference::new(NAME)
            .with_config("Server", "https://gitlab.example.com/")
            .with_config("ProjectPath", "group/sub/project")
            .with_config("Package", "nexus-ext");
        let project = GitLabProject::from_reference(&reference).unwrap();

        assert_eq!(
            project.project_url(),
            "https://gitlab.example.com/api/v4/projects/group%2Fsub%2Fproject"
        );
        assert!(project.headers.get("private-token").is_none());
    }

    #[test]
    fn test_token_sent_as_private_token() {
        let reference = PackageReference::new(NAME)
            .with_config("Server", "https://gitlab.example.com")
            .with_config("ProjectPath", "group/project")
            .with_config("Package", "nexus-ext")
            .with_config("Token", "glpat-123");
        let project = GitLabProject::from_reference(&reference).unwrap();

        assert_eq!(project.headers["private-token"], "glpat-123");
        assert!(project.headers.get("authorization").is_none());
    }

    #[test]
    fn test_missing_package_key() {
        let reference = PackageReference::new(NAME)
            .with_config("Server", "https://gitlab.example.com")
            .with_config("ProjectPath", "group/project");

        assert!(matches!(
            GitLabProject::from_reference(&reference),
            Err(PackageError::Configuration { key, .. }) if key == "Package"
        ));
    }
}
