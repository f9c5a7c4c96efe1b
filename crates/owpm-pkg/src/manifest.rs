//! Project manifest (`<name>.owpm`) parsing and persistence.
//!
//! ```toml
//! description = "A sample project"
//! version = "0.1.0"
//! store_digest = ""
//!
//! [packages]
//! requests = "*"
//!
//! [dev_packages]
//! pytest = ">=7"
//! ```

use crate::requirement::ANY;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use thiserror::Error;

/// File extension of project manifests.
pub const MANIFEST_EXT: &str = "owpm";

/// Description used when a manifest does not provide one.
pub const DEFAULT_DESCRIPTION: &str = "No description given";

/// Errors that can occur when working with manifests.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest not found: {0}")]
    NotFound(String),

    #[error("manifest is corrupt: {0}")]
    Corrupt(#[from] toml::de::Error),

    #[error("manifest is missing the required `version` field")]
    MissingVersion,

    #[error("invalid package name '{0}': {1}")]
    InvalidName(String, &'static str),

    #[error("failed to access manifest file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// A requirement on a package, as declared or discovered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRequirement {
    /// Package name.
    pub name: String,
    /// Version constraint expression; `*` means any version.
    pub constraint: String,
    /// Only needed for development.
    pub is_dev: bool,
    /// Discovered through another package rather than declared.
    pub is_transitive: bool,
}

impl PackageRequirement {
    /// A top-level runtime requirement.
    #[must_use]
    pub fn new(name: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: constraint.into(),
            is_dev: false,
            is_transitive: false,
        }
    }

    /// A top-level requirement on any version.
    #[must_use]
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, ANY)
    }

    /// A top-level development requirement.
    #[must_use]
    pub fn dev(name: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            is_dev: true,
            ..Self::new(name, constraint)
        }
    }

    /// A requirement discovered as a dependency of `parent`.
    ///
    /// It inherits the parent's development flag.
    #[must_use]
    pub fn transitive(
        parent: &PackageRequirement,
        name: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            constraint: constraint.into(),
            is_dev: parent.is_dev,
            is_transitive: true,
        }
    }
}

impl std::fmt::Display for PackageRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}':{}", self.name, self.constraint)
    }
}

/// On-disk shape of a manifest.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    description: Option<String>,

    #[serde(default)]
    version: Option<String>,

    #[serde(default)]
    store_digest: String,

    #[serde(default)]
    packages: BTreeMap<String, String>,

    #[serde(default)]
    dev_packages: BTreeMap<String, String>,
}

/// A project's declared requirements and lock stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Project name, taken from the manifest file stem.
    pub name: String,
    /// Short description.
    pub description: String,
    /// Declared project version.
    pub version: String,
    store_digest: String,
    requirements: Vec<PackageRequirement>,
}

impl Manifest {
    /// Create an empty, never-locked manifest.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: version.into(),
            store_digest: String::new(),
            requirements: Vec::new(),
        }
    }

    /// Load a manifest from a file path.
    ///
    /// The project name is the file stem.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ManifestError::NotFound(path.display().to_string())
            } else {
                ManifestError::Io(e)
            }
        })?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::parse(name, &content)
    }

    /// Parse a manifest from a TOML string.
    pub fn parse(name: impl Into<String>, content: &str) -> Result<Self, ManifestError> {
        let file: ManifestFile = toml::from_str(content)?;
        let version = file.version.ok_or(ManifestError::MissingVersion)?;

        let requirements = file
            .packages
            .into_iter()
            .map(|(name, constraint)| PackageRequirement::new(name, constraint))
            .chain(
                file.dev_packages
                    .into_iter()
                    .map(|(name, constraint)| PackageRequirement::dev(name, constraint)),
            )
            .collect::<Vec<_>>();

        for requirement in &requirements {
            validate_name(&requirement.name)?;
        }

        Ok(Self {
            name: name.into(),
            description: file
                .description
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            version,
            store_digest: file.store_digest,
            requirements,
        })
    }

    /// Serialize the manifest to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, ManifestError> {
        let mut file = ManifestFile {
            description: Some(self.description.clone()),
            version: Some(self.version.clone()),
            store_digest: self.store_digest.clone(),
            packages: BTreeMap::new(),
            dev_packages: BTreeMap::new(),
        };
        for requirement in &self.requirements {
            let section = if requirement.is_dev {
                &mut file.dev_packages
            } else {
                &mut file.packages
            };
            section.insert(requirement.name.clone(), requirement.constraint.clone());
        }
        Ok(toml::to_string_pretty(&file)?)
    }

    /// Write the manifest to a file path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Digest of the lock store this manifest was last locked against.
    ///
    /// Empty when the project has never been locked or has changed since.
    #[must_use]
    pub fn store_digest(&self) -> &str {
        &self.store_digest
    }

    pub(crate) fn set_store_digest(&mut self, digest: String) {
        self.store_digest = digest;
    }

    /// Returns true if no lock stamp is recorded.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.store_digest.is_empty()
    }

    /// All declared requirements in declaration order.
    #[must_use]
    pub fn requirements(&self) -> &[PackageRequirement] {
        &self.requirements
    }

    /// Declared runtime requirements.
    pub fn packages(&self) -> impl Iterator<Item = &PackageRequirement> {
        self.requirements.iter().filter(|r| !r.is_dev)
    }

    /// Declared development requirements.
    pub fn dev_packages(&self) -> impl Iterator<Item = &PackageRequirement> {
        self.requirements.iter().filter(|r| r.is_dev)
    }

    /// Add a requirement, replacing one with the same name in the same section.
    ///
    /// Always clears the store digest.
    pub fn add_requirement(&mut self, requirement: PackageRequirement) -> Result<(), ManifestError> {
        validate_name(&requirement.name)?;
        self.store_digest.clear();

        if let Some(existing) = self
            .requirements
            .iter_mut()
            .find(|r| r.name == requirement.name && r.is_dev == requirement.is_dev)
        {
            *existing = requirement;
        } else {
            self.requirements.push(requirement);
        }
        Ok(())
    }

    /// Remove a requirement by name from one section.
    ///
    /// Always clears the store digest. Returns true if anything was removed.
    pub fn remove_requirement(&mut self, name: &str, is_dev: bool) -> bool {
        self.store_digest.clear();
        let before = self.requirements.len();
        self.requirements
            .retain(|r| !(r.name == name && r.is_dev == is_dev));
        self.requirements.len() != before
    }
}

/// Validate a requirement name.
fn validate_name(name: &str) -> Result<(), ManifestError> {
    if name.is_empty() {
        return Err(ManifestError::InvalidName(
            name.to_string(),
            "name cannot be empty",
        ));
    }

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '.') {
            return Err(ManifestError::InvalidName(
                name.to_string(),
                "name can only contain letters, numbers, dots, hyphens, and underscores",
            ));
        }
    }

    Ok(())
}
