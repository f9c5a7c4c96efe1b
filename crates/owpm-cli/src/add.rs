//! Implementation of the `owpm add` command.

use anyhow::{Context, Result};
use owpm_pkg::{Constraint, Manifest, PackageRequirement, RequirementExpr, ANY};
use std::path::Path;

use crate::project;

/// Options for adding packages.
#[derive(Debug)]
pub struct AddOptions {
    /// Package names, each optionally carrying its own constraint.
    pub names: Vec<String>,
    /// Add to the development section.
    pub dev: bool,
    /// Constraint for names that do not carry one.
    pub constraint: String,
}

/// Add packages to the project in the current directory.
pub fn add_packages(options: &AddOptions) -> Result<()> {
    let paths = project::current_project()?;

    if options.dev {
        println!("Adding development package(s)..");
    } else {
        println!("Adding package(s)..");
    }

    let added = add_packages_at(&paths.manifest, options)?;
    for requirement in &added {
        println!("\tAdded {requirement}!");
    }
    println!(
        "Project saved to '{}' with {} package(s) added!",
        paths.manifest.display(),
        added.len()
    );
    Ok(())
}

/// Add packages to the manifest at `manifest_path` and save it.
///
/// Nothing is written unless every name parses.
pub fn add_packages_at(manifest_path: &Path, options: &AddOptions) -> Result<Vec<PackageRequirement>> {
    let mut manifest = Manifest::load(manifest_path).context("Failed to read manifest")?;

    let requirements = options
        .names
        .iter()
        .map(|spec| parse_package_spec(spec, &options.constraint, options.dev))
        .collect::<Result<Vec<_>>>()?;

    for requirement in &requirements {
        manifest
            .add_requirement(requirement.clone())
            .with_context(|| format!("Failed to add {requirement}"))?;
    }

    manifest
        .save(manifest_path)
        .context("Failed to write manifest")?;
    Ok(requirements)
}

/// Parse a package specification like `requests` or `requests>=2.0`.
fn parse_package_spec(spec: &str, default_constraint: &str, dev: bool) -> Result<PackageRequirement> {
    let expr = RequirementExpr::parse(spec)
        .with_context(|| format!("Invalid package specification `{spec}`"))?;

    let constraint = if expr.constraint == ANY {
        default_constraint.trim()
    } else {
        expr.constraint.as_str()
    };
    Constraint::parse(constraint)
        .with_context(|| format!("Invalid version constraint for `{}`", expr.name))?;

    let constraint = constraint.to_string();
    Ok(if dev {
        PackageRequirement::dev(expr.name, constraint)
    } else {
        PackageRequirement::new(expr.name, constraint)
    })
}
