//! HTTP plumbing shared by the registry providers.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LINK};
use serde_json::Value;

use super::{PackageError, Result};
use crate::config::{self, package::MAX_PAGES, package::USER_AGENT};

/// One connection-pooling client for every provider call in the process.
static SHARED_CLIENT: Lazy<reqwest::Client> =
    Lazy::new(|| client_or_default(reqwest::Client::builder().user_agent(USER_AGENT).build()));

static NEXT_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<(https?:[^>]*)>;\s*rel="next""#).expect("valid next-link pattern"));

/// The shared HTTP client.
pub fn shared_client() -> reqwest::Client {
    SHARED_CLIENT.clone()
}

/// Fall back to a default client when the configured one cannot be built.
fn client_or_default(built: reqwest::Result<reqwest::Client>) -> reqwest::Client {
    built.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to build the HTTP client, using defaults");
        reqwest::Client::new()
    })
}

/// Everything a provider needs besides the reference itself.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    client: reqwest::Client,
    github_api: String,
    max_pages: usize,
}

impl ProviderContext {
    /// Context from the environment, using the shared client.
    pub fn new() -> Self {
        Self {
            client: shared_client(),
            github_api: config::github_api(),
            max_pages: MAX_PAGES,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_github_api(mut self, base: impl Into<String>) -> Self {
        self.github_api = config::normalize_endpoint(base.into());
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn github_api(&self) -> &str {
        &self.github_api
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// GET `url`, failing with [`PackageError::HttpStatus`] on non-2xx.
    pub async fn get(&self, url: &str, headers: &HeaderMap) -> Result<reqwest::Response> {
        tracing::debug!(url = %url, "GET");

        let response = self.client.get(url).headers(headers.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(PackageError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }

    /// GET `url` and parse the body as JSON.
    pub async fn get_json(&self, url: &str, headers: &HeaderMap) -> Result<Value> {
        let response = self.get(url, headers).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Walk a paginated JSON-array listing by following `Link: rel="next"`.
    ///
    /// Never issues more than `max_pages` requests. Entries are returned in
    /// the order the pages were visited.
    pub async fn paginate(&self, first_url: String, headers: &HeaderMap) -> Result<Vec<Value>> {
        let mut entries = Vec::new();
        let mut url = first_url;

        for page in 1..=self.max_pages {
            let response = self.get(&url, headers).await?;
            let next = next_link(response.headers());
            let body = response.bytes().await?;
            let items: Vec<Value> = serde_json::from_slice(&body)?;

            entries.extend(items);

            match next {
                Some(next) => url = next,
                None => return Ok(entries),
            }

            if page == self.max_pages {
                tracing::warn!(
                    max_pages = self.max_pages,
                    "Stopped following pagination links at the page cap"
                );
            }
        }

        Ok(entries)
    }
}

impl Default for ProviderContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the `rel="next"` target from the `Link` headers, if any.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter(|entry| entry.contains("rel=\"next\""))
        .find_map(|entry| {
            NEXT_LINK
                .captures(entry)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str().to_string())
        })
}

/// Build a header map, rejecting values that are not valid header text.
pub fn headers<'a>(
    provider: &str,
    entries: impl IntoIterator<Item = (&'static str, &'a str)>,
) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();

    for (name, value) in entries {
        let value = HeaderValue::from_str(value)
            .map_err(|e| PackageError::invalid(provider, name, e))?;
        map.insert(HeaderName::from_static(name), value);
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_headers(value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(LINK, HeaderValue::from_str(value).unwrap());
        map
    }

    #[test]
    fn test_next_link_github_style() {
        let headers = link_headers(
            r#"<https://api.github.com/repositories/1/releases?per_page=100&page=2>; rel="next", <https://api.github.com/repositories/1/releases?per_page=100&page=5>; rel="last""#,
        );
        assert_eq!(
            next_link(&headers).as_deref(),
            Some("https://api.github.com/repositories/1/releases?per_page=100&page=2")
        );
    }

    #[test]
    fn test_next_link_absent_on_last_page() {
        let headers = link_headers(
            r#"<https://api.github.com/repositories/1/releases?page=1>; rel="prev", <https://api.github.com/repositories/1/releases?page=1>; rel="first""#,
        );
        assert!(next_link(&headers).is_none());
        assert!(next_link(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_next_link_plain_http() {
        let headers = link_headers(r#"<http://127.0.0.1:4000/page2>; rel="next""#);
        assert_eq!(
            next_link(&headers).as_deref(),
            Some("http://127.0.0.1:4000/page2")
        );
    }

    #[test]
    fn test_headers_rejects_invalid_value() {
        let result = headers("github-releases", [("authorization", "token a\nb")]);
        assert!(matches!(
            result,
            Err(PackageError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_client_falls_back_on_builder_error() {
        let built = reqwest::Client::builder().user_agent("bad\nagent").build();
        assert!(built.is_err());

        // A usable client is still returned.
        let _client = client_or_default(built);
        let _shared = shared_client();
    }

    #[test]
    fn test_context_builder() {
        let context = ProviderContext::new()
            .with_github_api("http://localhost:9000/")
            .with_max_pages(0);
        assert_eq!(context.github_api(), "http://localhost:9000");
        assert_eq!(context.max_pages(), 1);
    }
}
