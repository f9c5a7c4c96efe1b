//! Package registry client.
//!
//! This module provides:
//! - The [`Registry`] contract the resolver and lock builder query
//! - A narrow [`PackageMetadata`] type instead of the raw registry payload
//! - An HTTP client for PyPI-compatible JSON APIs
//! - A per-run cache so each package's metadata is fetched once

use crate::requirement::parse_release_version;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry has no package with this name.
    #[error("package '{0}' not found in the registry")]
    PackageNotFound(String),

    /// The registry could not be reached or answered with an error status.
    #[error("registry unavailable while querying '{package}': {reason}")]
    Unavailable { package: String, reason: String },

    /// The registry answered but the payload could not be understood.
    #[error("invalid registry response for '{package}': {reason}")]
    InvalidResponse { package: String, reason: String },
}

/// One downloadable artifact of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Content digest published by the registry.
    pub digest: String,
}

/// A published release and its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Version string exactly as published.
    pub version: String,
    /// Artifacts; may be empty for yanked or still-processing releases.
    pub artifacts: Vec<Artifact>,
}

/// Everything the engine needs to know about a package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    /// Artifacts of the latest release.
    pub latest: Vec<Artifact>,
    /// Releases ascending by parsed version, unparseable versions last.
    ///
    /// [`HttpRegistry`] sorts them; [`PackageMetadata::release`] appends, so
    /// callers add releases oldest first.
    pub releases: Vec<Release>,
    /// Requirement expressions the package declares.
    pub dependencies: Vec<String>,
}

impl PackageMetadata {
    /// Create metadata whose latest artifact has the given digest.
    #[must_use]
    pub fn with_latest(digest: impl Into<String>) -> Self {
        Self {
            latest: vec![Artifact {
                digest: digest.into(),
            }],
            ..Self::default()
        }
    }

    /// Add a release with a single artifact.
    #[must_use]
    pub fn release(mut self, version: impl Into<String>, digest: impl Into<String>) -> Self {
        self.releases.push(Release {
            version: version.into(),
            artifacts: vec![Artifact {
                digest: digest.into(),
            }],
        });
        self
    }

    /// Add a declared dependency expression.
    #[must_use]
    pub fn depends_on(mut self, expression: impl Into<String>) -> Self {
        self.dependencies.push(expression.into());
        self
    }
}

/// Source of package metadata.
///
/// Implementations must be safe to call from several worker threads at once.
pub trait Registry: Send + Sync {
    /// Fetch metadata for one package name.
    fn package_metadata(&self, name: &str) -> Result<Arc<PackageMetadata>, RegistryError>;
}

impl<R: Registry + ?Sized> Registry for Arc<R> {
    fn package_metadata(&self, name: &str) -> Result<Arc<PackageMetadata>, RegistryError> {
        (**self).package_metadata(name)
    }
}

/// Configuration for the HTTP registry client.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL of the JSON API; `{index_url}/{name}/json` is queried.
    pub index_url: String,
    /// Upper bound for a single metadata request.
    pub timeout: Duration,
    /// User agent for HTTP requests.
    pub user_agent: String,
}

/// Default JSON API endpoint.
pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/pypi";

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

impl Default for RegistryConfig {
    fn default() -> Self {
        let timeout = std::env::var("OWPM_TIMEOUT_SECS")
            .ok()
            .and_then(|secs| secs.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self {
            index_url: std::env::var("OWPM_INDEX_URL")
                .unwrap_or_else(|_| DEFAULT_INDEX_URL.to_string()),
            timeout: Duration::from_secs(timeout),
            user_agent: format!("owpm/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RegistryConfig {
    /// Use a different index URL.
    #[must_use]
    pub fn with_index_url(mut self, url: impl Into<String>) -> Self {
        self.index_url = url.into();
        self
    }

    /// Use a different request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Metadata URL for a package.
    #[must_use]
    pub fn package_url(&self, name: &str) -> String {
        format!("{}/{}/json", self.index_url.trim_end_matches('/'), name)
    }
}

/// Raw JSON payload of a PyPI-compatible API.
#[derive(Debug, Deserialize)]
struct PypiPayload {
    #[serde(default)]
    info: PypiInfo,
    #[serde(default)]
    urls: Vec<PypiFile>,
    #[serde(default)]
    releases: BTreeMap<String, Vec<PypiFile>>,
}

#[derive(Debug, Default, Deserialize)]
struct PypiInfo {
    #[serde(default)]
    requires_dist: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct PypiFile {
    #[serde(default)]
    md5_digest: Option<String>,
    #[serde(default)]
    digests: Option<PypiDigests>,
}

#[derive(Debug, Deserialize)]
struct PypiDigests {
    #[serde(default)]
    sha256: Option<String>,
}

impl PypiFile {
    fn into_artifact(self) -> Option<Artifact> {
        self.digests
            .and_then(|d| d.sha256)
            .or(self.md5_digest)
            .map(|digest| Artifact { digest })
    }
}

impl From<PypiPayload> for PackageMetadata {
    fn from(payload: PypiPayload) -> Self {
        let latest = payload
            .urls
            .into_iter()
            .filter_map(PypiFile::into_artifact)
            .collect();

        let mut releases: Vec<Release> = payload
            .releases
            .into_iter()
            .map(|(version, files)| Release {
                version,
                artifacts: files.into_iter().filter_map(PypiFile::into_artifact).collect(),
            })
            .collect();
        // JSON object order is lost; put releases back in publication order
        releases.sort_by_cached_key(|r| {
            let parsed = parse_release_version(&r.version);
            (parsed.is_none(), parsed)
        });

        Self {
            latest,
            releases,
            dependencies: payload.info.requires_dist.unwrap_or_default(),
        }
    }
}

/// Client for a PyPI-compatible JSON registry.
pub struct HttpRegistry {
    config: RegistryConfig,
    http_client: reqwest::blocking::Client,
}

impl HttpRegistry {
    /// Create a new registry client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self, RegistryError> {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry client with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_config(config: RegistryConfig) -> Result<Self, RegistryError> {
        let http_client = reqwest::blocking::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .build()
            .map_err(|e| RegistryError::Unavailable {
                package: String::new(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Registry for HttpRegistry {
    fn package_metadata(&self, name: &str) -> Result<Arc<PackageMetadata>, RegistryError> {
        let url = self.config.package_url(name);
        debug!(package = name, %url, "querying registry");

        let unavailable = |reason: String| RegistryError::Unavailable {
            package: name.to_string(),
            reason,
        };

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::PackageNotFound(name.to_string()));
        }

        if !response.status().is_success() {
            return Err(unavailable(format!(
                "registry returned status {}",
                response.status()
            )));
        }

        let payload: PypiPayload = response.json().map_err(|e| RegistryError::InvalidResponse {
            package: name.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Arc::new(payload.into()))
    }
}

/// Registry wrapper that remembers every successful answer.
///
/// Failures are not cached, so a later call queries the inner registry again.
pub struct CachedRegistry<'a> {
    inner: &'a dyn Registry,
    cache: Mutex<HashMap<String, Arc<PackageMetadata>>>,
}

impl<'a> CachedRegistry<'a> {
    /// Wrap a registry with an empty cache.
    #[must_use]
    pub fn new(inner: &'a dyn Registry) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of packages currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if nothing has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Registry for CachedRegistry<'_> {
    fn package_metadata(&self, name: &str) -> Result<Arc<PackageMetadata>, RegistryError> {
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Arc::clone(hit));
        }

        // The lock is not held across the query so workers fetch different
        // packages concurrently.
        let metadata = self.inner.package_metadata(name)?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&metadata));
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRegistry {
        calls: AtomicUsize,
    }

    impl Registry for CountingRegistry {
        fn package_metadata(&self, name: &str) -> Result<Arc<PackageMetadata>, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if name == "missing" {
                return Err(RegistryError::PackageNotFound(name.to_string()));
            }
            Ok(Arc::new(PackageMetadata::with_latest("abc")))
        }
    }

    #[test]
    fn test_package_url() {
        let config = RegistryConfig::default().with_index_url("https://example.com/pypi/");
        assert_eq!(
            config.package_url("requests"),
            "https://example.com/pypi/requests/json"
        );
    }

    #[test]
    fn test_cache_queries_once_per_name() {
        let inner = CountingRegistry {
            calls: AtomicUsize::new(0),
        };
        let cached = CachedRegistry::new(&inner);

        cached.package_metadata("alpha").unwrap();
        cached.package_metadata("alpha").unwrap();
        cached.package_metadata("beta").unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.len(), 2);
    }

    #[test]
    fn test_cache_does_not_remember_failures() {
        let inner = CountingRegistry {
            calls: AtomicUsize::new(0),
        };
        let cached = CachedRegistry::new(&inner);

        assert!(cached.package_metadata("missing").is_err());
        assert!(cached.package_metadata("missing").is_err());

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert!(cached.is_empty());
    }

    #[test]
    fn test_pypi_payload_conversion() {
        let json = r#"{
            "info": {"requires_dist": ["idna (<3,>=2.5)", "chardet"]},
            "urls": [{"md5_digest": "latest-md5", "digests": {"sha256": "latest-sha"}}],
            "releases": {
                "1.10.0": [{"md5_digest": "m110"}],
                "1.2.0": [{"md5_digest": "m12"}],
                "0.9": []
            }
        }"#;
        let payload: PypiPayload = serde_json::from_str(json).unwrap();
        let metadata = PackageMetadata::from(payload);

        assert_eq!(metadata.latest[0].digest, "latest-sha");
        let versions: Vec<_> = metadata.releases.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions, vec!["0.9", "1.2.0", "1.10.0"]);
        assert!(metadata.releases[0].artifacts.is_empty());
        assert_eq!(metadata.releases[1].artifacts[0].digest, "m12");
        assert_eq!(metadata.dependencies.len(), 2);
    }

    #[test]
    fn test_pypi_payload_null_requires_dist() {
        let json = r#"{"info": {"requires_dist": null}, "urls": [], "releases": {}}"#;
        let payload: PypiPayload = serde_json::from_str(json).unwrap();
        let metadata = PackageMetadata::from(payload);
        assert!(metadata.dependencies.is_empty());
        assert!(metadata.latest.is_empty());
    }
}
