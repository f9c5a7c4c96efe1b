//! Locating the project in the working directory.

use anyhow::{anyhow, Context, Result};
use owpm_pkg::{ProjectPaths, MANIFEST_EXT};
use std::path::Path;
use std::{env, fs};
use tracing::debug;

/// Find the project in the current directory.
pub fn current_project() -> Result<ProjectPaths> {
    let dir = env::current_dir().context("Failed to get current directory")?;
    find_project(&dir)
}

/// Find the first `.owpm` manifest in `dir`, by file name order.
pub fn find_project(dir: &Path) -> Result<ProjectPaths> {
    let mut manifests = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file() && path.extension().is_some_and(|ext| ext == MANIFEST_EXT)
        })
        .collect::<Vec<_>>();
    manifests.sort();

    let manifest = manifests.into_iter().next().ok_or_else(|| {
        anyhow!(
            "No .{MANIFEST_EXT} project found in {}. Run `owpm init` first.",
            dir.display()
        )
    })?;
    debug!(manifest = %manifest.display(), "found project");
    Ok(ProjectPaths::for_manifest(manifest))
}
