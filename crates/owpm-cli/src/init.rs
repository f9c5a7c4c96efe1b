//! Project initialization for `owpm init`.

use anyhow::{bail, Context, Result};
use owpm_pkg::{Manifest, MANIFEST_EXT};
use std::env;
use std::path::{Path, PathBuf};

/// Options for project initialization.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Project name; also the manifest's file stem.
    pub name: String,
    /// Brief description.
    pub description: String,
    /// Base version of the project.
    pub version: String,
}

/// Create a new project in the current directory.
pub fn init_project(options: InitOptions) -> Result<()> {
    let current_dir = env::current_dir().context("Failed to get current directory")?;
    let path = init_project_in(&current_dir, options)?;
    println!("Saved project as '{}'!", path.display());
    Ok(())
}

/// Create a new project manifest inside `dir`.
pub fn init_project_in(dir: &Path, options: InitOptions) -> Result<PathBuf> {
    validate_project_name(&options.name)?;
    if options.version.trim().is_empty() {
        bail!("Project version cannot be empty");
    }

    let manifest_path = dir.join(format!("{}.{MANIFEST_EXT}", options.name));
    if manifest_path.exists() {
        bail!(
            "Cannot initialize: `{}` already exists",
            manifest_path.display()
        );
    }

    Manifest::new(&options.name, options.description, options.version)
        .save(&manifest_path)
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;

    Ok(manifest_path)
}

/// Project names become file names, so they are kept to a safe alphabet.
fn validate_project_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Project name cannot be empty");
    }

    if name.starts_with('.') {
        bail!("Project name cannot start with a dot");
    }

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '.') {
            bail!(
                "Invalid project name `{name}`: names can only contain letters, numbers, dots, hyphens, and underscores"
            );
        }
    }

    Ok(())
}
