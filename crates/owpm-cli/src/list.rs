//! Implementation of the `owpm list` command.

use anyhow::{Context, Result};
use owpm_pkg::{is_up_to_date, LockStore, Manifest, ProjectPaths};

use crate::project;

/// Print the project's declared packages, or its lock store with `locked`.
pub fn list_packages(locked: bool) -> Result<()> {
    let paths = project::current_project()?;
    for line in list_lines(&paths, locked)? {
        println!("{line}");
    }
    Ok(())
}

/// Lines describing the project at `paths`.
pub fn list_lines(paths: &ProjectPaths, locked: bool) -> Result<Vec<String>> {
    let manifest = Manifest::load(&paths.manifest).context("Failed to read manifest")?;
    let mut lines = vec![format!(
        "{} {} - {}",
        manifest.name, manifest.version, manifest.description
    )];

    if locked {
        let store = LockStore::open(&paths.store)
            .context("Failed to open lock store (run `owpm lock` to create it)")?;
        if !is_up_to_date(&manifest, &paths.store) {
            lines.push("(lock store is out of date, run `owpm lock`)".to_string());
        }
        for entry in store.select_all().context("Failed to read lock store")? {
            let mut flags = Vec::new();
            if entry.is_dev {
                flags.push("dev");
            }
            if entry.is_dep {
                flags.push("dep");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            lines.push(format!("  {entry}{flags}"));
        }
        return Ok(lines);
    }

    lines.push("packages:".to_string());
    lines.extend(manifest.packages().map(|r| format!("  {r}")));
    lines.push("dev_packages:".to_string());
    lines.extend(manifest.dev_packages().map(|r| format!("  {r}")));
    Ok(lines)
}
