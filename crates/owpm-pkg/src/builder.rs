//! Lock store construction.
//!
//! Fingerprinting is the only parallel stage of locking: every resolved
//! package is independent, so each one becomes a task on a bounded worker
//! pool. All tasks finish before [`LockBuilder::build`] returns, and a build
//! with any failed task leaves no store behind.

use crate::fingerprint::fingerprint;
use crate::manifest::ManifestError;
use crate::registry::Registry;
use crate::resolve::{ResolveError, ResolvedPackage};
use crate::store::{LockEntry, LockStore, StoreError};
use rayon::prelude::*;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound for the default worker count.
pub const MAX_DEFAULT_WORKERS: usize = 16;

/// Errors that can occur while locking a project.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("lock store error: {0}")]
    Store(#[from] StoreError),

    /// One or more packages could not be fingerprinted or stored.
    #[error("lock incomplete, failed packages: {}", .failed.join(", "))]
    Incomplete { failed: Vec<String> },

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration for lock builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Number of fingerprinting workers.
    pub workers: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        let workers = std::env::var("OWPM_WORKERS")
            .ok()
            .and_then(|n| n.parse().ok())
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map_or(1, |n| n.get())
                    .min(MAX_DEFAULT_WORKERS)
            });
        Self {
            workers: workers.max(1),
        }
    }
}

impl LockConfig {
    /// Set the number of fingerprinting workers (at least one).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// Builds a lock store from resolved packages.
pub struct LockBuilder<'r> {
    registry: &'r dyn Registry,
    config: LockConfig,
}

impl<'r> LockBuilder<'r> {
    /// Create a builder that fingerprints through `registry`.
    #[must_use]
    pub fn new(registry: &'r dyn Registry, config: LockConfig) -> Self {
        Self { registry, config }
    }

    /// Create a fresh store at `store_path` and lock every package into it.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Incomplete`] naming every package whose task
    /// failed. The partially written store is deleted in that case; a failed
    /// delete is logged and does not replace the error.
    pub fn build(
        &self,
        packages: &[ResolvedPackage],
        store_path: &Path,
    ) -> Result<LockStore, LockError> {
        let store = LockStore::create(store_path)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|i| format!("owpm-lock-{i}"))
            .build()
            .map_err(|e| LockError::WorkerPool(e.to_string()))?;

        // `collect` only returns once every task has run to completion.
        let failures: Vec<(String, LockError)> = pool.install(|| {
            packages
                .par_iter()
                .filter_map(|package| {
                    self.lock_package(package, &store)
                        .err()
                        .map(|e| (package.name.clone(), e))
                })
                .collect()
        });

        if failures.is_empty() {
            info!(
                packages = packages.len(),
                path = %store_path.display(),
                "lock store written"
            );
            return Ok(store);
        }

        for (name, error) in &failures {
            warn!(package = %name, %error, "failed to lock package");
        }
        drop(store);
        if let Err(error) = LockStore::delete(store_path) {
            warn!(path = %store_path.display(), %error, "failed to discard partial lock store");
        }

        let mut failed: Vec<String> = failures.into_iter().map(|(name, _)| name).collect();
        failed.sort();
        failed.dedup();
        Err(LockError::Incomplete { failed })
    }

    /// Fingerprint one package and record it. Returns true if a new row was added.
    fn lock_package(&self, package: &ResolvedPackage, store: &LockStore) -> Result<bool, LockError> {
        debug!(package = %package, "locking");

        let metadata = self
            .registry
            .package_metadata(&package.name)
            .map_err(ResolveError::from)?;
        let digest = fingerprint(package, &metadata)?;

        let inserted = store.insert(&LockEntry {
            name: package.name.clone(),
            version: package.version_label().to_string(),
            digest,
            is_dev: package.is_dev,
            is_dep: package.is_transitive,
        })?;
        if !inserted {
            debug!(package = %package, "merged into an existing digest");
        }
        Ok(inserted)
    }
}
