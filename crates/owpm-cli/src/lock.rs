//! Implementation of the `owpm lock` command.

use anyhow::{Context, Result};
use owpm_pkg::{HttpRegistry, LockOutcome, Locker, Manifest, ProjectPaths, Registry};
use tracing::debug;

use crate::project;

/// Lock the project in the current directory against the configured index.
pub fn lock_project(force: bool) -> Result<()> {
    let paths = project::current_project()?;
    let registry = HttpRegistry::new().context("Failed to create registry client")?;
    debug!(index = %registry.config().index_url, "using package index");

    println!("Locking project..");
    let outcome = lock_project_with(&registry, &paths, force)?;

    let store_name = paths.store.display();
    match outcome {
        LockOutcome::Skipped => {
            println!(
                "Did not lock project, '{store_name}' is up-to-date! (try -f for forceful lock)"
            );
        }
        LockOutcome::Rebuilt { entries, conflicts } => {
            for conflict in &conflicts {
                eprintln!("warning: {conflict}");
            }
            println!("Locked {entries} package(s) as '{store_name}'!");
        }
    }
    Ok(())
}

/// Lock the project at `paths` through `registry`.
pub fn lock_project_with(
    registry: &dyn Registry,
    paths: &ProjectPaths,
    force: bool,
) -> Result<LockOutcome> {
    let mut manifest = Manifest::load(&paths.manifest).context("Failed to read manifest")?;
    let outcome = Locker::new(registry)
        .lock(&mut manifest, paths, force)
        .with_context(|| format!("Failed to lock project '{}'", manifest.name))?;
    Ok(outcome)
}
