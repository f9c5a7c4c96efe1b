//! Implementation of the `owpm remove` command.

use anyhow::{Context, Result};
use owpm_pkg::Manifest;
use std::path::Path;

use crate::project;

/// Options for removing packages.
#[derive(Debug)]
pub struct RemoveOptions {
    /// Package names to remove.
    pub names: Vec<String>,
    /// Remove from the development section instead of the runtime one.
    pub dev: bool,
}

/// Remove packages from the project in the current directory.
pub fn remove_packages(options: &RemoveOptions) -> Result<()> {
    let paths = project::current_project()?;

    if options.dev {
        println!("Removing development package(s)..");
    } else {
        println!("Removing package(s)..");
    }

    let removed = remove_packages_at(&paths.manifest, options)?;
    if removed.is_empty() {
        let names = options
            .names
            .iter()
            .map(|name| format!("'{name}'"))
            .collect::<Vec<_>>()
            .join(", ");
        println!("No packages named {names} were found so nothing was removed!");
    } else {
        for name in &removed {
            println!("\tRemoved '{name}'");
        }
        println!(
            "Removed {} package(s) from '{}'!",
            removed.len(),
            paths.manifest.display()
        );
    }
    Ok(())
}

/// Remove packages from the manifest at `manifest_path` and save it.
///
/// Returns the names that were present. The lock stamp is cleared even when
/// nothing matched.
pub fn remove_packages_at(manifest_path: &Path, options: &RemoveOptions) -> Result<Vec<String>> {
    let mut manifest = Manifest::load(manifest_path).context("Failed to read manifest")?;

    let removed = options
        .names
        .iter()
        .filter(|name| manifest.remove_requirement(name, options.dev))
        .cloned()
        .collect::<Vec<_>>();

    manifest
        .save(manifest_path)
        .context("Failed to write manifest")?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
version = "0.1.0"
store_digest = "abc123"

[packages]
requests = "*"
flask = ">=2"

[dev_packages]
pytest = "*"
requests = "*"
"#;

    fn setup_test_manifest(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let manifest_path = dir.path().join("demo.owpm");
        fs::write(&manifest_path, content).unwrap();
        manifest_path
    }

    fn options(names: &[&str], dev: bool) -> RemoveOptions {
        RemoveOptions {
            names: names.iter().map(ToString::to_string).collect(),
            dev,
        }
    }

    #[test]
    fn test_remove_from_packages() {
        let dir = TempDir::new().unwrap();
        let manifest_path = setup_test_manifest(&dir, MANIFEST);

        let removed = remove_packages_at(&manifest_path, &options(&["requests"], false)).unwrap();
        assert_eq!(removed, vec!["requests"]);

        let manifest = Manifest::load(&manifest_path).unwrap();
        let names: Vec<_> = manifest.packages().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["flask"]);
        // the dev entry with the same name is untouched
        assert_eq!(manifest.dev_packages().count(), 2);
        assert!(manifest.is_unlocked());
    }

    #[test]
    fn test_remove_from_dev_packages() {
        let dir = TempDir::new().unwrap();
        let manifest_path = setup_test_manifest(&dir, MANIFEST);

        let removed =
            remove_packages_at(&manifest_path, &options(&["pytest", "flask"], true)).unwrap();
        assert_eq!(removed, vec!["pytest"]);

        let manifest = Manifest::load(&manifest_path).unwrap();
        assert_eq!(manifest.packages().count(), 2);
        assert_eq!(manifest.dev_packages().count(), 1);
    }

    #[test]
    fn test_remove_nonexistent_package_still_unlocks() {
        let dir = TempDir::new().unwrap();
        let manifest_path = setup_test_manifest(&dir, MANIFEST);

        let removed = remove_packages_at(&manifest_path, &options(&["numpy"], false)).unwrap();
        assert!(removed.is_empty());
        assert!(Manifest::load(&manifest_path).unwrap().is_unlocked());
    }
}
