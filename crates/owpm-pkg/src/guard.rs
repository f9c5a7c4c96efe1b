//! Lock consistency and the top-level lock operation.
//!
//! A manifest remembers the digest of the lock store it was last locked
//! against. While that digest matches the store on disk the project is up to
//! date and locking is skipped; any change to the requirements clears the
//! digest and forces the next lock to rebuild.

use crate::builder::{LockBuilder, LockConfig, LockError};
use crate::manifest::Manifest;
use crate::registry::{CachedRegistry, Registry};
use crate::resolve::{Resolver, VersionConflict};
use crate::store::{LockStore, STORE_EXT};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const BUF_SIZE: usize = 64 * 1024;

/// Locations of a project's manifest and lock store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    /// The `.owpm` manifest.
    pub manifest: PathBuf,
    /// The `.owpmlock` store.
    pub store: PathBuf,
}

impl ProjectPaths {
    /// Paths for a manifest, with the store next to it under the same stem.
    #[must_use]
    pub fn for_manifest(manifest: impl Into<PathBuf>) -> Self {
        let manifest = manifest.into();
        let store = manifest.with_extension(STORE_EXT);
        Self { manifest, store }
    }
}

/// What a lock call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The store already matched the manifest.
    Skipped,
    /// The store was rebuilt from scratch.
    Rebuilt {
        /// Rows written to the new store.
        entries: usize,
        /// Packages that resolved to more than one version.
        conflicts: Vec<VersionConflict>,
    },
}

/// SHA-256 of a store file's bytes, hex encoded.
pub fn digest_of(store_path: impl AsRef<Path>) -> io::Result<String> {
    let mut file = File::open(store_path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Whether the store exists and matches the digest recorded in the manifest.
///
/// A store that cannot be read counts as out of date.
pub fn is_up_to_date(manifest: &Manifest, store_path: impl AsRef<Path>) -> bool {
    if manifest.is_unlocked() {
        return false;
    }
    match digest_of(store_path) {
        Ok(digest) => digest == manifest.store_digest(),
        Err(e) => {
            debug!(error = %e, "lock store unreadable, treating as stale");
            false
        }
    }
}

/// Record the current store digest in the manifest and save it.
pub fn stamp(manifest: &mut Manifest, paths: &ProjectPaths) -> Result<String, LockError> {
    let digest = digest_of(&paths.store)?;
    manifest.set_store_digest(digest.clone());
    manifest.save(&paths.manifest)?;
    Ok(digest)
}

/// Resolves and locks projects against one registry.
pub struct Locker<'r> {
    registry: &'r dyn Registry,
    config: LockConfig,
}

impl<'r> Locker<'r> {
    /// Create a locker with default configuration.
    #[must_use]
    pub fn new(registry: &'r dyn Registry) -> Self {
        Self::with_config(registry, LockConfig::default())
    }

    /// Create a locker with custom configuration.
    #[must_use]
    pub fn with_config(registry: &'r dyn Registry, config: LockConfig) -> Self {
        Self { registry, config }
    }

    /// Lock a project unless it is already up to date.
    ///
    /// With `force` the store is always rebuilt. On failure no store is left
    /// on disk and the manifest is not re-stamped.
    pub fn lock(
        &self,
        manifest: &mut Manifest,
        paths: &ProjectPaths,
        force: bool,
    ) -> Result<LockOutcome, LockError> {
        if !force && is_up_to_date(manifest, &paths.store) {
            info!(project = %manifest.name, "lock store is up to date");
            return Ok(LockOutcome::Skipped);
        }

        LockStore::delete(&paths.store)?;

        // One cache per run: resolution warms it and the builder reuses it.
        let registry = CachedRegistry::new(self.registry);
        let resolution = Resolver::new(&registry).resolve(manifest.requirements())?;
        let store = LockBuilder::new(&registry, self.config.clone())
            .build(&resolution.packages, &paths.store)?;

        let entries = store.select_all()?.len();
        store.close()?;
        stamp(manifest, paths)?;

        info!(project = %manifest.name, entries, "locked project");
        Ok(LockOutcome::Rebuilt {
            entries,
            conflicts: resolution.conflicts,
        })
    }
}
