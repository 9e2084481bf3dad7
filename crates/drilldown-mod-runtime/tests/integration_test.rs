//! Integration tests for drilldown-mod-runtime.
//!
//! These tests cover:
//! - Package discovery from a mods directory
//! - Manifest parsing in both formats
//! - Capability policy decisions for file, network and process operations
//! - Load scope isolation and teardown

use drilldown_mod_runtime::{
    discover_package, discover_packages, CapabilityPolicy, CodeLoader, ExportTable, HostLinker,
    HostTypes, LinkedCodeLoader, LoadScope, Operation, OperationKind, Origin, PolicyEnforcer,
    PolicyTable, RuntimeError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

// ==============================================================================
// Test Fixture Helpers
// ==============================================================================

/// Create a package directory with a `mod.toml`.
fn create_package(dir: &Path, id: &str, extra: &str) -> PathBuf {
    let package_dir = dir.join(id);
    std::fs::create_dir_all(&package_dir).unwrap();
    std::fs::write(
        package_dir.join("mod.toml"),
        format!(
            r#"[mod]
entry = "mod.{id}.Main"
id = "{id}"
{extra}"#
        ),
    )
    .unwrap();
    package_dir
}

/// Create a package directory with a `mod.json`.
fn create_json_package(dir: &Path, id: &str) -> PathBuf {
    let package_dir = dir.join(id);
    std::fs::create_dir_all(&package_dir).unwrap();
    std::fs::write(
        package_dir.join("mod.json"),
        format!(r#"{{"mod": {{"main": "mod.{id}.Main", "id": "{id}", "version": "2.0"}}}}"#),
    )
    .unwrap();
    package_dir
}

struct Gear(&'static str);

fn policy_for(mods_dir: &Path) -> Arc<dyn CapabilityPolicy> {
    Arc::new(PolicyEnforcer::new(PolicyTable {
        mods_dir: mods_dir.to_path_buf(),
        asset_dirs: Vec::new(),
        ..PolicyTable::default()
    }))
}

fn host_linker() -> Arc<dyn HostLinker> {
    let mut host = HostTypes::new();
    host.register("modding.api.Item", Gear("host item"));
    Arc::new(host)
}

fn code_loader() -> LinkedCodeLoader {
    LinkedCodeLoader::new()
        .with_unit("gears", |exports| {
            exports.export("mod.gears.Main", Gear("gears main"));
            exports.export("mod.shared.Cog", Gear("gears cog"));
        })
        .with_unit("pulleys", |exports| {
            exports.export("mod.pulleys.Main", Gear("pulleys main"));
            exports.export("mod.shared.Cog", Gear("pulleys cog"));
        })
}

fn open_scope(
    mods_dir: &Path,
    id: &str,
    loader: &LinkedCodeLoader,
    host: &Arc<dyn HostLinker>,
) -> LoadScope {
    let package = discover_package(&mods_dir.join(id)).unwrap();
    let unit = loader.open(&package).unwrap();
    LoadScope::new(id, unit, Arc::clone(host), policy_for(mods_dir))
}

// ==============================================================================
// Discovery
// ==============================================================================

#[test]
fn test_discovery_orders_by_directory_name() {
    let temp_dir = TempDir::new().unwrap();
    create_package(temp_dir.path(), "zeta", "");
    create_package(temp_dir.path(), "alpha", "");
    create_json_package(temp_dir.path(), "mid");
    std::fs::write(temp_dir.path().join("README.txt"), "not a package").unwrap();

    let candidates = discover_packages(temp_dir.path()).unwrap();
    let ids: Vec<String> = candidates
        .into_iter()
        .map(|c| c.into_package().unwrap().id().to_string())
        .collect();
    assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
}

#[test]
fn test_discovery_keeps_broken_packages_as_candidates() {
    let temp_dir = TempDir::new().unwrap();
    create_package(temp_dir.path(), "good", "");
    std::fs::create_dir_all(temp_dir.path().join("empty")).unwrap();
    let broken = temp_dir.path().join("broken");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("mod.toml"), "[mod]\nid = \"broken\"\n").unwrap();

    let candidates = discover_packages(temp_dir.path()).unwrap();
    assert_eq!(candidates.len(), 3);

    let failed: Vec<PathBuf> = candidates
        .into_iter()
        .filter_map(|c| c.into_package().err().map(|(path, _)| path))
        .collect();
    assert_eq!(failed, vec![broken, temp_dir.path().join("empty")]);
}

#[test]
fn test_discovery_creates_missing_directory() {
    let temp_dir = TempDir::new().unwrap();
    let mods_dir = temp_dir.path().join("mods");

    let candidates = discover_packages(&mods_dir).unwrap();
    assert!(candidates.is_empty());
    assert!(mods_dir.is_dir());
}

#[test]
fn test_json_manifest_accepts_main_alias() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_json_package(temp_dir.path(), "legacy");

    let package = discover_package(&path).unwrap();
    assert_eq!(package.manifest.entry(), "mod.legacy.Main");
    assert_eq!(package.manifest.module.version.as_deref(), Some("2.0"));
}

#[test]
fn test_discover_package_not_a_directory() {
    let temp_dir = TempDir::new().unwrap();
    let result = discover_package(&temp_dir.path().join("missing"));
    assert!(matches!(result, Err(RuntimeError::PackageNotFound(_))));
}

// ==============================================================================
// Capability Policy
// ==============================================================================

#[test]
fn test_file_reads_limited_to_package_directory() {
    let mods = TempDir::new().unwrap();
    let elsewhere = TempDir::new().unwrap();
    let package = create_package(mods.path(), "gears", "");
    let policy = policy_for(mods.path());

    assert!(policy
        .check(&Operation::FileRead(package.join("mod.toml")))
        .is_ok());

    let violation = policy
        .check(&Operation::FileRead(elsewhere.path().join("notes.txt")))
        .unwrap_err();
    assert_eq!(violation.kind, OperationKind::FileRead);

    // Escaping through `..` is judged after normalization.
    let escape = package.join("..").join("..").join("etc").join("passwd");
    assert!(policy.check(&Operation::FileRead(escape)).is_err());
}

#[test]
fn test_destructive_operations_always_denied() {
    let mods = TempDir::new().unwrap();
    let package = create_package(mods.path(), "gears", "");
    let policy = policy_for(mods.path());

    let operations = vec![
        Operation::FileWrite(package.join("out.txt")),
        Operation::FileDelete(package.join("mod.toml")),
        Operation::NetConnect {
            host: "localhost".to_string(),
            port: 80,
        },
        Operation::NetListen("0.0.0.0:25565".to_string()),
        Operation::ProcessExec("/bin/sh".to_string()),
        Operation::NativeLink("libgears.so".to_string()),
    ];

    for op in operations {
        let violation = policy.check(&op).unwrap_err();
        assert_eq!(violation.kind, op.kind());
        assert_eq!(violation.target, op.target());
    }
}

// ==============================================================================
// Load Scopes
// ==============================================================================

#[test]
fn test_scopes_isolate_mod_names_and_share_host_names() {
    let temp_dir = TempDir::new().unwrap();
    create_package(temp_dir.path(), "gears", "");
    create_package(temp_dir.path(), "pulleys", "");
    let loader = code_loader();
    let host = host_linker();

    let gears = open_scope(temp_dir.path(), "gears", &loader, &host);
    let pulleys = open_scope(temp_dir.path(), "pulleys", &loader, &host);

    let cog_a = gears.resolve("mod.shared.Cog").unwrap();
    let cog_b = pulleys.resolve("mod.shared.Cog").unwrap();
    assert_ne!(cog_a, cog_b);
    assert_eq!(cog_a.origin(), Origin::Scope(gears.id()));
    assert_eq!(cog_b.origin(), Origin::Scope(pulleys.id()));
    assert_eq!(cog_a.downcast::<Gear>().unwrap().0, "gears cog");
    assert_eq!(cog_b.downcast::<Gear>().unwrap().0, "pulleys cog");

    let item_a = gears.resolve("modding.api.Item").unwrap();
    let item_b = pulleys.resolve("modding.api.Item").unwrap();
    assert_eq!(item_a, item_b);
    assert_eq!(item_a.origin(), Origin::Host);
}

#[test]
fn test_unloaded_scope_fails_every_resolution() {
    let temp_dir = TempDir::new().unwrap();
    create_package(temp_dir.path(), "gears", "");
    let loader = code_loader();
    let host = host_linker();
    let scope = open_scope(temp_dir.path(), "gears", &loader, &host);

    let main = scope.resolve("mod.gears.Main").unwrap();
    scope.resolve("modding.api.Item").unwrap();
    scope.unload();

    for name in ["mod.gears.Main", "modding.api.Item"] {
        assert!(matches!(
            scope.resolve(name),
            Err(RuntimeError::ScopeUnloaded { .. })
        ));
    }
    assert!(!main.is_valid());
    assert!(main.downcast::<Gear>().is_err());

    // Host handles outlive any scope.
    assert!(host.resolve("modding.api.Item").unwrap().is_valid());
}

#[test]
fn test_blocked_namespace_checked_before_resolution() {
    let temp_dir = TempDir::new().unwrap();
    create_package(temp_dir.path(), "gears", "");
    let loader = LinkedCodeLoader::new().with_unit("gears", |exports| {
        exports.export("sys.mod.Hidden", Gear("hidden"));
    });
    let host = host_linker();
    let scope = open_scope(temp_dir.path(), "gears", &loader, &host);

    match scope.resolve("sys.mod.Hidden") {
        Err(RuntimeError::AccessDenied(violation)) => {
            assert_eq!(violation.kind, OperationKind::LoadCode);
        }
        other => panic!("expected denial, got {:?}", other),
    }
    assert_eq!(scope.resolved_count(), 0);
}

#[test]
fn test_export_table_as_code_unit() {
    let mut exports = ExportTable::new();
    exports.export("mod.gears.Main", Gear("main"));
    let temp_dir = TempDir::new().unwrap();
    let scope = LoadScope::new(
        "inline",
        Box::new(exports),
        host_linker(),
        policy_for(temp_dir.path()),
    );
    assert_eq!(
        scope
            .resolve("mod.gears.Main")
            .unwrap()
            .downcast::<Gear>()
            .unwrap()
            .0,
        "main"
    );
}
