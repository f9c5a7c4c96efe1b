//! End-to-end locking tests against an in-memory registry.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use owpm_pkg::{
    is_up_to_date, LockBuilder, LockConfig, LockEntry, LockError, LockOutcome, LockStore, Locker,
    Manifest, PackageMetadata, PackageRequirement, ProjectPaths, Registry, RegistryError,
    ResolveError, ResolvedPackage, StoreError, SCHEMA_VERSION,
};

#[derive(Default)]
struct FakeRegistry {
    packages: HashMap<String, (Arc<PackageMetadata>, Duration)>,
    unavailable: HashSet<String>,
    calls: AtomicUsize,
}

impl FakeRegistry {
    fn with(self, name: &str, metadata: PackageMetadata) -> Self {
        self.with_latency(name, metadata, Duration::ZERO)
    }

    fn with_latency(mut self, name: &str, metadata: PackageMetadata, latency: Duration) -> Self {
        self.packages
            .insert(name.to_string(), (Arc::new(metadata), latency));
        self
    }

    fn down(mut self, name: &str) -> Self {
        self.unavailable.insert(name.to_string());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Registry for FakeRegistry {
    fn package_metadata(&self, name: &str) -> Result<Arc<PackageMetadata>, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.contains(name) {
            return Err(RegistryError::Unavailable {
                package: name.to_string(),
                reason: "service unavailable".to_string(),
            });
        }
        let (metadata, latency) = self
            .packages
            .get(name)
            .ok_or_else(|| RegistryError::PackageNotFound(name.to_string()))?;
        if !latency.is_zero() {
            std::thread::sleep(*latency);
        }
        Ok(Arc::clone(metadata))
    }
}

fn write_manifest(dir: &Path, content: &str) -> (Manifest, ProjectPaths) {
    let paths = ProjectPaths::for_manifest(dir.join("demo.owpm"));
    std::fs::write(&paths.manifest, content).unwrap();
    (Manifest::load(&paths.manifest).unwrap(), paths)
}

fn entry(name: &str, version: &str, digest: &str, is_dev: bool, is_dep: bool) -> LockEntry {
    LockEntry {
        name: name.to_string(),
        version: version.to_string(),
        digest: digest.to_string(),
        is_dev,
        is_dep,
    }
}

const SCENARIO_A: &str = r#"
description = "demo project"
version = "0.1.0"
store_digest = ""

[packages]
alpha = "*"

[dev_packages]
beta = "*"
"#;

#[test]
fn scenario_a_force_lock() {
    let dir = tempfile::tempdir().unwrap();
    let (mut manifest, paths) = write_manifest(dir.path(), SCENARIO_A);
    let registry = FakeRegistry::default()
        .with("alpha", PackageMetadata::with_latest("aaa"))
        .with("beta", PackageMetadata::with_latest("bbb"));

    let outcome = Locker::new(&registry)
        .lock(&mut manifest, &paths, true)
        .unwrap();
    assert_eq!(
        outcome,
        LockOutcome::Rebuilt {
            entries: 2,
            conflicts: Vec::new()
        }
    );

    let store = LockStore::open(&paths.store).unwrap();
    assert_eq!(
        store.select_all().unwrap(),
        vec![
            entry("alpha", "*", "aaa", false, false),
            entry("beta", "*", "bbb", true, false),
        ]
    );
    drop(store);

    let calls = registry.calls();
    assert!(is_up_to_date(&manifest, &paths.store));
    assert_eq!(registry.calls(), calls);

    // The stamp was persisted, not only kept in memory.
    let reloaded = Manifest::load(&paths.manifest).unwrap();
    assert!(is_up_to_date(&reloaded, &paths.store));
}

#[test]
fn scenario_b_unavailable_registry_leaves_no_store() {
    let dir = tempfile::tempdir().unwrap();
    let (mut manifest, paths) = write_manifest(
        dir.path(),
        "version = \"0.1.0\"\n\n[packages]\ngamma = \"*\"\n",
    );
    let registry = FakeRegistry::default().down("gamma");

    let err = Locker::new(&registry)
        .lock(&mut manifest, &paths, false)
        .unwrap_err();

    assert!(matches!(
        err,
        LockError::Resolve(ResolveError::Registry(RegistryError::Unavailable { .. }))
    ));
    assert!(!paths.store.exists());
    assert!(manifest.is_unlocked());
}

#[test]
fn second_lock_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let (mut manifest, paths) = write_manifest(dir.path(), SCENARIO_A);
    let registry = FakeRegistry::default()
        .with("alpha", PackageMetadata::with_latest("aaa"))
        .with("beta", PackageMetadata::with_latest("bbb"));
    let locker = Locker::new(&registry);

    assert!(matches!(
        locker.lock(&mut manifest, &paths, false).unwrap(),
        LockOutcome::Rebuilt { .. }
    ));
    let calls = registry.calls();

    assert_eq!(
        locker.lock(&mut manifest, &paths, false).unwrap(),
        LockOutcome::Skipped
    );
    assert_eq!(registry.calls(), calls);
}

#[test]
fn mutation_makes_project_stale() {
    let dir = tempfile::tempdir().unwrap();
    let (mut manifest, paths) = write_manifest(dir.path(), SCENARIO_A);
    let registry = FakeRegistry::default()
        .with("alpha", PackageMetadata::with_latest("aaa"))
        .with("beta", PackageMetadata::with_latest("bbb"))
        .with("delta", PackageMetadata::with_latest("ddd"));
    let locker = Locker::new(&registry);

    locker.lock(&mut manifest, &paths, false).unwrap();
    manifest
        .add_requirement(PackageRequirement::any("delta"))
        .unwrap();
    assert!(!is_up_to_date(&manifest, &paths.store));

    let outcome = locker.lock(&mut manifest, &paths, false).unwrap();
    assert!(matches!(outcome, LockOutcome::Rebuilt { entries: 3, .. }));
    assert!(is_up_to_date(&manifest, &paths.store));
}

#[test]
fn force_always_rebuilds() {
    let dir = tempfile::tempdir().unwrap();
    let (mut manifest, paths) = write_manifest(dir.path(), SCENARIO_A);
    let registry = FakeRegistry::default()
        .with("alpha", PackageMetadata::with_latest("aaa"))
        .with("beta", PackageMetadata::with_latest("bbb"));
    let locker = Locker::new(&registry);

    locker.lock(&mut manifest, &paths, false).unwrap();
    let outcome = locker.lock(&mut manifest, &paths, true).unwrap();
    assert!(matches!(outcome, LockOutcome::Rebuilt { entries: 2, .. }));
    assert!(is_up_to_date(&manifest, &paths.store));
}

#[test]
fn tampered_store_is_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let (mut manifest, paths) = write_manifest(dir.path(), SCENARIO_A);
    let registry = FakeRegistry::default()
        .with("alpha", PackageMetadata::with_latest("aaa"))
        .with("beta", PackageMetadata::with_latest("bbb"));
    let locker = Locker::new(&registry);

    locker.lock(&mut manifest, &paths, false).unwrap();
    let store = LockStore::open(&paths.store).unwrap();
    store
        .insert(&entry("intruder", "*", "zzz", false, false))
        .unwrap();
    store.close().unwrap();

    assert!(!is_up_to_date(&manifest, &paths.store));
    let outcome = locker.lock(&mut manifest, &paths, false).unwrap();
    assert!(matches!(outcome, LockOutcome::Rebuilt { entries: 2, .. }));
}

#[test]
fn shared_transitive_dependency_locked_once() {
    let dir = tempfile::tempdir().unwrap();
    let (mut manifest, paths) = write_manifest(
        dir.path(),
        "version = \"0.1.0\"\n\n[packages]\nweb = \"*\"\ncli = \"*\"\n",
    );
    let registry = FakeRegistry::default()
        .with(
            "web",
            PackageMetadata::with_latest("w").depends_on("certs (>=1.0)"),
        )
        .with(
            "cli",
            PackageMetadata::with_latest("c").depends_on("certs>=1.0; python_version >= \"3\""),
        )
        .with(
            "certs",
            PackageMetadata::with_latest("c-latest").release("1.4", "c14"),
        );

    let outcome = Locker::new(&registry)
        .lock(&mut manifest, &paths, true)
        .unwrap();
    assert!(matches!(outcome, LockOutcome::Rebuilt { entries: 3, .. }));

    let store = LockStore::open(&paths.store).unwrap();
    let certs: Vec<_> = store
        .select_all()
        .unwrap()
        .into_iter()
        .filter(|e| e.name == "certs")
        .collect();
    assert_eq!(certs, vec![entry("certs", "1.4", "c14", false, true)]);
    assert_eq!(store.select_non_dev_non_dep().unwrap().len(), 2);
}

#[test]
fn runtime_and_dev_pick_of_one_artifact_stays_runtime() {
    let registry = FakeRegistry::default()
        .with("six", PackageMetadata::with_latest("s1").release("1.0", "s1"));

    for workers in [1, 4] {
        let dir = tempfile::tempdir().unwrap();
        let (mut manifest, paths) = write_manifest(
            dir.path(),
            "version = \"0.1.0\"\n\n[packages]\nsix = \">=1.0\"\n\n[dev_packages]\nsix = \"*\"\n",
        );

        let outcome = Locker::with_config(&registry, LockConfig::default().with_workers(workers))
            .lock(&mut manifest, &paths, true)
            .unwrap();
        assert_eq!(
            outcome,
            LockOutcome::Rebuilt {
                entries: 1,
                conflicts: Vec::new()
            }
        );

        let store = LockStore::open(&paths.store).unwrap();
        assert_eq!(
            store.select_non_dev_non_dep().unwrap(),
            vec![entry("six", "1.0", "s1", false, false)]
        );
    }
}

#[test]
fn metadata_fetched_once_per_package() {
    let dir = tempfile::tempdir().unwrap();
    let (mut manifest, paths) = write_manifest(dir.path(), SCENARIO_A);
    let registry = FakeRegistry::default()
        .with("alpha", PackageMetadata::with_latest("aaa").depends_on("shared"))
        .with("beta", PackageMetadata::with_latest("bbb").depends_on("shared"))
        .with("shared", PackageMetadata::with_latest("sss"));

    Locker::new(&registry)
        .lock(&mut manifest, &paths, true)
        .unwrap();

    assert_eq!(registry.calls(), 3);
}

#[test]
fn cross_path_conflict_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (mut manifest, paths) = write_manifest(
        dir.path(),
        "version = \"0.1.0\"\n\n[packages]\nold = \"*\"\nnew = \"*\"\n",
    );
    let registry = FakeRegistry::default()
        .with("old", PackageMetadata::with_latest("o").depends_on("core (<2)"))
        .with("new", PackageMetadata::with_latest("n").depends_on("core (>=2)"))
        .with(
            "core",
            PackageMetadata::with_latest("c3")
                .release("1.0", "c1")
                .release("2.0", "c2"),
        );

    let outcome = Locker::new(&registry)
        .lock(&mut manifest, &paths, true)
        .unwrap();

    let LockOutcome::Rebuilt { entries, conflicts } = outcome else {
        panic!("expected a rebuild");
    };
    assert_eq!(entries, 4);
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].package, "core");
}

#[test]
fn build_waits_for_every_task() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("demo.owpmlock");

    let count = 24;
    let mut registry = FakeRegistry::default();
    let mut packages = Vec::new();
    for i in 0..count {
        let name = format!("pkg{i}");
        let latency = Duration::from_millis((i * 7 % 40) as u64);
        registry = registry.with_latency(
            &name,
            PackageMetadata::with_latest(format!("digest-{i}")),
            latency,
        );
        packages.push(ResolvedPackage {
            name,
            constraint: "*".to_string(),
            resolved_version: None,
            is_dev: i % 3 == 0,
            is_transitive: false,
        });
    }

    let store = LockBuilder::new(&registry, LockConfig::default().with_workers(4))
        .build(&packages, &path)
        .unwrap();

    let digests: HashSet<String> = store
        .select_all()
        .unwrap()
        .into_iter()
        .map(|e| e.digest)
        .collect();
    let expected: HashSet<String> = (0..count).map(|i| format!("digest-{i}")).collect();
    assert_eq!(digests, expected);
    assert_eq!(registry.calls(), count);
}

#[test]
fn failed_fingerprint_reports_every_name() {
    let dir = tempfile::tempdir().unwrap();
    let (manifest, paths) = write_manifest(
        dir.path(),
        "version = \"0.1.0\"\n\n[packages]\nalpha = \"*\"\n",
    );
    let registry = FakeRegistry::default().with("alpha", PackageMetadata::with_latest("aaa"));

    // Resolve against a registry that knows `alpha`, then build against one
    // that has lost it.
    let resolution = owpm_pkg::Resolver::new(&registry)
        .resolve(manifest.requirements())
        .unwrap();
    let empty = FakeRegistry::default();
    let err = LockBuilder::new(&empty, LockConfig::default())
        .build(&resolution.packages, &paths.store)
        .unwrap_err();

    assert!(matches!(err, LockError::Incomplete { ref failed } if failed.as_slice() == ["alpha"]));
    assert!(!paths.store.exists());
}

#[test]
fn store_with_other_schema_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (mut manifest, paths) = write_manifest(dir.path(), SCENARIO_A);
    let registry = FakeRegistry::default()
        .with("alpha", PackageMetadata::with_latest("aaa"))
        .with("beta", PackageMetadata::with_latest("bbb"));

    Locker::new(&registry)
        .lock(&mut manifest, &paths, true)
        .unwrap();

    let conn = rusqlite::Connection::open(&paths.store).unwrap();
    conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
        .unwrap();
    drop(conn);

    let err = LockStore::open(&paths.store).unwrap_err();
    assert!(matches!(
        err,
        StoreError::SchemaVersionMismatch { found, .. } if found == SCHEMA_VERSION + 1
    ));
    assert!(!is_up_to_date(&manifest, &paths.store));
}
