//! Remote HTTP registry package source
//!
//! Talks to a JSON registry API:
//!
//! ```text
//! GET {url}/packages?page=&pageSize=            ← paginated index
//! GET {url}/packages/{id}                       ← package payload (404 → None)
//! GET {url}/packages/{id}/versions              ← available versions
//! GET {url}/packages/{id}/versions/{version}    ← specific version payload
//! GET {url}/packages/search?q=&category=&minLevel=&page=&pageSize=
//! ```
//!
//! Package ids and versions are percent-encoded as single path segments.
//!
//! Index and package responses are cached for 5 minutes by default. When
//! the registry cannot be reached, the last successfully fetched index is
//! served even if it has expired.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{PackageSource, PackageSourceConfig};
use crate::error::{PackageError, Result};
use crate::package::{PackageData, PackageMetadata};

/// Default cache TTL (5 minutes)
pub const DEFAULT_REMOTE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

const INDEX_PAGE_SIZE: u32 = 100;
const MAX_INDEX_PAGES: u32 = 100;

/// A cached response and when it was fetched
#[derive(Debug, Clone)]
struct Cached<T> {
    fetched_at: Instant,
    value: T,
}

impl<T> Cached<T> {
    fn new(value: T) -> Self {
        Self {
            fetched_at: Instant::now(),
            value,
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// One page of the registry index
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexPage {
    #[serde(default)]
    packages: Vec<PackageMetadata>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VersionsResponse {
    Wrapped { versions: Vec<String> },
    List(Vec<String>),
}

/// Server-side search filters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub category: Option<String>,
    pub min_level: Option<u32>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// A page of search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    #[serde(default)]
    pub packages: Vec<PackageMetadata>,
    #[serde(default)]
    pub total: usize,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

/// Package source backed by an HTTP registry
pub struct RemotePackageSource {
    config: PackageSourceConfig,
    client: reqwest::Client,
    base_url: Url,
    cache_ttl: Duration,
    index_cache: RwLock<Option<Cached<Vec<PackageMetadata>>>>,
    package_cache: RwLock<HashMap<String, Cached<PackageData>>>,
}

impl RemotePackageSource {
    pub fn new(config: PackageSourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("parcel/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                PackageError::source_unavailable(
                    &config.id,
                    format!("Failed to create HTTP client: {e}"),
                )
            })?;

        let cache_ttl = config
            .cache_ttl_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REMOTE_CACHE_TTL);
        let base_url = Url::parse(config.url.trim()).map_err(|e| {
            PackageError::source_unavailable(
                &config.id,
                format!("Invalid registry URL '{}': {e}", config.url),
            )
        })?;
        if base_url.cannot_be_a_base() {
            return Err(PackageError::source_unavailable(
                &config.id,
                format!("Registry URL '{}' cannot carry a path", config.url),
            ));
        }

        Ok(Self {
            config,
            client,
            base_url,
            cache_ttl,
            index_cache: RwLock::new(None),
            package_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Override the cache expiry
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Registry URL with `segments` appended, each one escaped
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                self.unavailable(format!("Registry URL '{}' cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: Url) -> RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(ACCEPT, "application/json");

        match &self.config.auth_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    fn unavailable(&self, message: impl Into<String>) -> PackageError {
        PackageError::source_unavailable(&self.config.id, message)
    }

    async fn fetch_index_pages(&self) -> Result<Vec<PackageMetadata>> {
        let index_url = self.endpoint(&["packages"])?;
        let mut packages = Vec::new();

        for page in 1..=MAX_INDEX_PAGES {
            let response = self
                .get(index_url.clone())
                .query(&[("page", page), ("pageSize", INDEX_PAGE_SIZE)])
                .send()
                .await
                .map_err(|e| self.unavailable(format!("Failed to fetch index: {e}")))?;

            if !response.status().is_success() {
                return Err(self.unavailable(format!(
                    "Failed to fetch index: HTTP {}",
                    response.status()
                )));
            }

            let body: IndexPage = response
                .json()
                .await
                .map_err(|e| self.unavailable(format!("Failed to parse index: {e}")))?;

            debug!(
                "Fetched index page {} from '{}': {} packages",
                page,
                self.config.id,
                body.packages.len()
            );
            packages.extend(body.packages);

            if !body.has_more {
                return Ok(packages);
            }
        }

        warn!(
            "Index of '{}' exceeded {} pages; truncating",
            self.config.id, MAX_INDEX_PAGES
        );
        Ok(packages)
    }

    /// Checksum advertised by the index for a package, if already known
    ///
    /// The index only describes the current version, so a pinned `version`
    /// gets a checksum only when it is that version.
    async fn indexed_checksum(&self, package_id: &str, version: Option<&str>) -> Option<String> {
        self.index_cache.read().await.as_ref().and_then(|cached| {
            cached
                .value
                .iter()
                .find(|entry| entry.package_id == package_id)
                .filter(|entry| version.map_or(true, |v| entry.version == v))
                .and_then(|entry| entry.checksum.clone())
        })
    }

    fn verify_checksum(&self, bytes: &[u8], expected: &str) -> Result<()> {
        let actual = format!("sha256:{}", hex::encode(Sha256::digest(bytes)));
        if actual != expected {
            return Err(self.unavailable(format!(
                "Checksum mismatch: expected {expected}, got {actual}"
            )));
        }
        Ok(())
    }

    async fn fetch_package(
        &self,
        url: Url,
        package_id: &str,
        checksum: Option<&str>,
    ) -> Result<Option<PackageData>> {
        let response = self
            .get(url)
            .send()
            .await
            .map_err(|e| self.unavailable(format!("Failed to fetch '{package_id}': {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.unavailable(format!(
                "Failed to fetch '{package_id}': HTTP {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.unavailable(format!("Failed to read '{package_id}': {e}")))?;

        if let Some(expected) = checksum {
            self.verify_checksum(&bytes, expected)?;
            debug!("Verified checksum of '{}': {}", package_id, expected);
        }

        let mut data: PackageData = serde_json::from_slice(&bytes)
            .map_err(|e| self.unavailable(format!("Failed to parse '{package_id}': {e}")))?;
        data.metadata.source_id = self.config.id.clone();
        Ok(Some(data))
    }

    async fn load_cached(
        &self,
        cache_key: &str,
        url: Url,
        package_id: &str,
        checksum: Option<String>,
    ) -> Result<Option<PackageData>> {
        if let Some(cached) = self.package_cache.read().await.get(cache_key) {
            if cached.is_fresh(self.cache_ttl) {
                return Ok(Some(cached.value.clone()));
            }
        }

        let data = self
            .fetch_package(url, package_id, checksum.as_deref())
            .await?;
        if let Some(data) = &data {
            self.package_cache
                .write()
                .await
                .insert(cache_key.to_string(), Cached::new(data.clone()));
        }
        Ok(data)
    }

    /// Load a specific version of a package
    pub async fn load_package_version(
        &self,
        package_id: &str,
        version: &str,
    ) -> Result<Option<PackageData>> {
        let url = self.endpoint(&["packages", package_id, "versions", version])?;
        let checksum = self.indexed_checksum(package_id, Some(version)).await;
        self.load_cached(&format!("{package_id}@{version}"), url, package_id, checksum)
            .await
    }

    /// Search the registry with server-side filtering
    pub async fn search_packages(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<SearchResults> {
        let mut params: Vec<(&str, String)> = vec![("q", query.to_string())];
        if let Some(category) = &filters.category {
            params.push(("category", category.clone()));
        }
        if let Some(min_level) = filters.min_level {
            params.push(("minLevel", min_level.to_string()));
        }
        if let Some(page) = filters.page {
            params.push(("page", page.to_string()));
        }
        if let Some(page_size) = filters.page_size {
            params.push(("pageSize", page_size.to_string()));
        }

        let response = self
            .get(self.endpoint(&["packages", "search"])?)
            .query(&params)
            .send()
            .await
            .map_err(|e| self.unavailable(format!("Search failed: {e}")))?;

        if !response.status().is_success() {
            return Err(self.unavailable(format!(
                "Search failed: HTTP {}",
                response.status()
            )));
        }

        let mut results: SearchResults = response
            .json()
            .await
            .map_err(|e| self.unavailable(format!("Failed to parse search results: {e}")))?;
        for entry in &mut results.packages {
            entry.source_id = self.config.id.clone();
        }
        Ok(results)
    }
}

#[async_trait]
impl PackageSource for RemotePackageSource {
    fn config(&self) -> &PackageSourceConfig {
        &self.config
    }

    async fn fetch_index(&self) -> Vec<PackageMetadata> {
        if let Some(cached) = self.index_cache.read().await.as_ref() {
            if cached.is_fresh(self.cache_ttl) {
                debug!("Using cached index for '{}'", self.config.id);
                return cached.value.clone();
            }
        }

        match self.fetch_index_pages().await {
            Ok(entries) => {
                let entries: Vec<PackageMetadata> = entries
                    .into_iter()
                    .map(|entry| entry.with_source(&self.config.id))
                    .collect();
                *self.index_cache.write().await = Some(Cached::new(entries.clone()));
                entries
            }
            Err(e) => {
                e.log_if_source_failure();
                match self.index_cache.read().await.as_ref() {
                    Some(stale) => {
                        warn!("Serving stale index for '{}'", self.config.id);
                        stale.value.clone()
                    }
                    None => Vec::new(),
                }
            }
        }
    }

    async fn load_package(&self, package_id: &str) -> Result<Option<PackageData>> {
        let url = self.endpoint(&["packages", package_id])?;
        let checksum = self.indexed_checksum(package_id, None).await;
        self.load_cached(package_id, url, package_id, checksum).await
    }

    async fn get_versions(&self, package_id: &str) -> Result<Vec<String>> {
        let response = self
            .get(self.endpoint(&["packages", package_id, "versions"])?)
            .send()
            .await
            .map_err(|e| self.unavailable(format!("Failed to fetch versions: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(self.unavailable(format!(
                "Failed to fetch versions: HTTP {}",
                response.status()
            )));
        }

        let versions: VersionsResponse = response
            .json()
            .await
            .map_err(|e| self.unavailable(format!("Failed to parse versions: {e}")))?;

        Ok(match versions {
            VersionsResponse::Wrapped { versions } => versions,
            VersionsResponse::List(versions) => versions,
        })
    }

    async fn clear_cache(&self) {
        *self.index_cache.write().await = None;
        self.package_cache.write().await.clear();
    }

    fn as_remote(&self) -> Option<&RemotePackageSource> {
        Some(self)
    }
}
