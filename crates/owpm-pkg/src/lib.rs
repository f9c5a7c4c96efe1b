//! Dependency locking for owpm projects.
//!
//! This crate provides:
//! - Parsing and saving of `.owpm` project manifests
//! - Transitive dependency resolution against a package registry
//! - Parallel fingerprinting of resolved packages into a lock store
//! - A consistency guard that skips locking when nothing changed
//!
//! Every operation takes explicit paths; nothing here searches the working
//! directory for a project.

pub mod builder;
pub mod fingerprint;
pub mod guard;
pub mod manifest;
pub mod registry;
pub mod requirement;
pub mod resolve;
pub mod store;

pub use builder::{LockBuilder, LockConfig, LockError};
pub use fingerprint::{fingerprint, select_release, Selection};
pub use guard::{digest_of, is_up_to_date, stamp, LockOutcome, Locker, ProjectPaths};
pub use manifest::{Manifest, ManifestError, PackageRequirement, DEFAULT_DESCRIPTION, MANIFEST_EXT};
pub use registry::{
    Artifact, CachedRegistry, HttpRegistry, PackageMetadata, Registry, RegistryConfig,
    RegistryError, Release,
};
pub use requirement::{Constraint, RequirementExpr, ANY};
pub use resolve::{
    ConflictingPick, Resolution, ResolveError, ResolvedPackage, Resolver, VersionConflict,
};
pub use store::{LockEntry, LockStore, StoreError, SCHEMA_VERSION, STORE_EXT};
