//! Dependency resolution.
//!
//! This module provides:
//! - Expansion of top-level requirements into the full transitive set
//! - Deduplication of packages reached through several paths
//! - Detection of packages that resolved to different versions
//!
//! Resolution is not a constraint solver. Each requirement is resolved on its
//! own, so the same package can appear once per distinct constraint. Such
//! cases are reported as [`VersionConflict`]s instead of being reconciled.

use crate::fingerprint::select_release;
use crate::manifest::PackageRequirement;
use crate::registry::{Registry, RegistryError};
use crate::requirement::{Constraint, RequirementExpr, ANY};
use std::collections::{BTreeMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during dependency resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The registry lookup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// No published release satisfies the constraint.
    #[error("no release of '{package}' satisfies '{constraint}'")]
    VersionNotFound { package: String, constraint: String },

    /// A requirement expression could not be parsed.
    #[error("invalid requirement '{expression}': {reason}")]
    InvalidRequirement { expression: String, reason: String },
}

/// A package selected for one requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPackage {
    /// Package name.
    pub name: String,
    /// Constraint the package was required with.
    pub constraint: String,
    /// Release that satisfied the constraint; `None` for "any".
    pub resolved_version: Option<String>,
    /// Only needed for development.
    pub is_dev: bool,
    /// Reached through another package.
    pub is_transitive: bool,
}

impl ResolvedPackage {
    /// Version label recorded in the lock store.
    #[must_use]
    pub fn version_label(&self) -> &str {
        self.resolved_version.as_deref().unwrap_or(ANY)
    }
}

impl std::fmt::Display for ResolvedPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}':{}", self.name, self.constraint)?;
        if let Some(version) = &self.resolved_version {
            write!(f, " ({version})")?;
        }
        Ok(())
    }
}

/// One way a conflicting package was required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictingPick {
    /// The constraint as written.
    pub constraint: String,
    /// The version it resolved to.
    pub version: String,
}

/// A package that resolved to more than one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConflict {
    /// Package name.
    pub package: String,
    /// Every constraint/version pair seen for the package.
    pub picks: Vec<ConflictingPick>,
}

impl std::fmt::Display for VersionConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let picks = self
            .picks
            .iter()
            .map(|p| format!("{} -> {}", p.constraint, p.version))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "'{}' resolved to several versions: {picks}", self.package)
    }
}

/// The result of dependency resolution.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Resolved packages in discovery order.
    pub packages: Vec<ResolvedPackage>,
    /// Packages that resolved to more than one version.
    pub conflicts: Vec<VersionConflict>,
}

impl Resolution {
    /// Returns true if no packages were resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Returns the number of resolved packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Get the first resolved package with a name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResolvedPackage> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Iterate over all resolved packages.
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedPackage> {
        self.packages.iter()
    }
}

/// Expands requirements against a registry.
pub struct Resolver<'r> {
    registry: &'r dyn Registry,
}

impl<'r> Resolver<'r> {
    /// Create a resolver that queries `registry`.
    #[must_use]
    pub fn new(registry: &'r dyn Registry) -> Self {
        Self { registry }
    }

    /// Resolve top-level requirements and everything they depend on.
    ///
    /// Runtime requirements are expanded before development ones, so a
    /// package reachable from both is recorded as a runtime package.
    ///
    /// # Errors
    ///
    /// Any registry failure, unsatisfiable constraint or malformed
    /// requirement aborts the whole pass.
    pub fn resolve(&self, requirements: &[PackageRequirement]) -> Result<Resolution, ResolveError> {
        let mut packages = Vec::new();
        let mut digests = Vec::new();
        let mut expanded: HashSet<(String, String)> = HashSet::new();

        let (runtime, dev): (Vec<_>, Vec<_>) = requirements.iter().partition(|r| !r.is_dev);
        for phase in [runtime, dev] {
            let mut worklist: VecDeque<PackageRequirement> = phase.into_iter().cloned().collect();
            while let Some(requirement) = worklist.pop_front() {
                if !expanded.insert((requirement.name.clone(), requirement.constraint.clone())) {
                    continue;
                }
                let (resolved, digest, discovered) = self.expand(&requirement)?;
                packages.push(resolved);
                digests.push(digest);
                worklist.extend(discovered);
            }
        }

        let conflicts = find_conflicts(&packages, &digests);
        for conflict in &conflicts {
            warn!("{conflict}");
        }

        Ok(Resolution {
            packages,
            conflicts,
        })
    }

    /// Resolve one requirement, returning the package, the digest of its
    /// selected artifact and the requirements it introduces.
    fn expand(
        &self,
        requirement: &PackageRequirement,
    ) -> Result<(ResolvedPackage, String, Vec<PackageRequirement>), ResolveError> {
        debug!(package = %requirement, "pulling dependencies");

        let constraint = Constraint::parse(&requirement.constraint)?;
        let metadata = self.registry.package_metadata(&requirement.name)?;
        let selection = select_release(&requirement.name, &constraint, &metadata)?;

        let mut discovered = Vec::new();
        for expression in &metadata.dependencies {
            let expr = RequirementExpr::parse(expression)?;
            // extras are never requested, so their dependencies are not needed
            if expr.optional_extra {
                debug!(package = %requirement, dependency = %expression, "skipping extra");
                continue;
            }
            discovered.push(PackageRequirement::transitive(
                requirement,
                expr.name,
                expr.constraint,
            ));
        }

        let resolved = ResolvedPackage {
            name: requirement.name.clone(),
            constraint: requirement.constraint.clone(),
            resolved_version: selection.version.map(str::to_string),
            is_dev: requirement.is_dev,
            is_transitive: requirement.is_transitive,
        };
        Ok((resolved, selection.artifact.digest.clone(), discovered))
    }
}

/// Collect packages whose requirements selected different artifacts.
///
/// `digests[i]` is the artifact selected for `packages[i]`. Requirements
/// that land on the same artifact, such as `*` and a range matching the
/// latest release, do not conflict.
fn find_conflicts(packages: &[ResolvedPackage], digests: &[String]) -> Vec<VersionConflict> {
    let mut by_name: BTreeMap<&str, Vec<(&ResolvedPackage, &str)>> = BTreeMap::new();
    for (package, digest) in packages.iter().zip(digests) {
        by_name
            .entry(package.name.as_str())
            .or_default()
            .push((package, digest.as_str()));
    }

    by_name
        .into_iter()
        .filter(|(_, picks)| {
            let artifacts: HashSet<_> = picks.iter().map(|(_, digest)| *digest).collect();
            artifacts.len() > 1
        })
        .map(|(name, picks)| VersionConflict {
            package: name.to_string(),
            picks: picks
                .into_iter()
                .map(|(p, _)| ConflictingPick {
                    constraint: p.constraint.clone(),
                    version: p.version_label().to_string(),
                })
                .collect(),
        })
        .collect()
}
