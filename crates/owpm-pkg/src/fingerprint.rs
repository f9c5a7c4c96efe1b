//! Content fingerprints for resolved packages.
//!
//! Fingerprinting is pure: it picks a digest out of metadata that was already
//! fetched, so the same metadata serves resolution and locking.

use crate::registry::{Artifact, PackageMetadata};
use crate::requirement::Constraint;
use crate::resolve::{ResolveError, ResolvedPackage};

/// The artifact chosen for a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<'m> {
    /// Release version, `None` when the latest artifact was taken.
    pub version: Option<&'m str>,
    /// The first artifact of the selected release.
    pub artifact: &'m Artifact,
}

/// Select the artifact a constraint resolves to.
///
/// "Any" takes the first latest artifact. A range takes the first release in
/// registry order that satisfies it; a matching release without artifacts is
/// an error rather than a reason to keep looking.
pub fn select_release<'m>(
    name: &str,
    constraint: &Constraint,
    metadata: &'m PackageMetadata,
) -> Result<Selection<'m>, ResolveError> {
    let not_found = || ResolveError::VersionNotFound {
        package: name.to_string(),
        constraint: constraint.to_string(),
    };

    match constraint {
        Constraint::Any => metadata
            .latest
            .first()
            .map(|artifact| Selection {
                version: None,
                artifact,
            })
            .ok_or_else(not_found),
        Constraint::Range(_) => {
            let release = metadata
                .releases
                .iter()
                .find(|r| constraint.matches_release(&r.version))
                .ok_or_else(not_found)?;
            release
                .artifacts
                .first()
                .map(|artifact| Selection {
                    version: Some(release.version.as_str()),
                    artifact,
                })
                .ok_or_else(not_found)
        }
    }
}

/// Compute the lock digest of a resolved package.
pub fn fingerprint(
    package: &ResolvedPackage,
    metadata: &PackageMetadata,
) -> Result<String, ResolveError> {
    let selection = match package.resolved_version.as_deref() {
        Some(target) => {
            let release = metadata
                .releases
                .iter()
                .find(|r| r.version == target)
                .ok_or_else(|| ResolveError::VersionNotFound {
                    package: package.name.clone(),
                    constraint: format!("=={target}"),
                })?;
            Selection {
                version: Some(release.version.as_str()),
                artifact: release.artifacts.first().ok_or_else(|| {
                    ResolveError::VersionNotFound {
                        package: package.name.clone(),
                        constraint: format!("=={target}"),
                    }
                })?,
            }
        }
        None => select_release(
            &package.name,
            &Constraint::parse(&package.constraint)?,
            metadata,
        )?,
    };
    Ok(selection.artifact.digest.clone())
}
