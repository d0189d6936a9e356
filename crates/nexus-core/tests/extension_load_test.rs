//! Loading restored packages into load units.
//!
//! A copy of the system math library stands in for an extension entry
//! library: it loads and unloads like one but exports none of the extension
//! symbols.

#![cfg(target_os = "linux")]

use std::path::{Path, PathBuf};

use nexus_core::extension::{ExtensionError, ExtensionHive, ExtensionLoadContext, RPC_DATA_SOURCE_ID};
use nexus_core::{PackageController, PackageReference};

const LIBM_CANDIDATES: &[&str] = &[
    "/lib/x86_64-linux-gnu/libm.so.6",
    "/usr/lib/x86_64-linux-gnu/libm.so.6",
    "/lib/aarch64-linux-gnu/libm.so.6",
    "/usr/lib/aarch64-linux-gnu/libm.so.6",
    "/lib64/libm.so.6",
    "/usr/lib64/libm.so.6",
    "/usr/lib/libm.so.6",
];

fn system_library() -> Option<PathBuf> {
    LIBM_CANDIDATES.iter().map(PathBuf::from).find(|p| p.is_file())
}

/// Lay out `folder` as a package whose entry library is named `probe`.
fn write_package(folder: &Path, library: &Path) {
    std::fs::create_dir_all(folder).unwrap();
    std::fs::copy(library, folder.join(libloading::library_filename("probe"))).unwrap();
    std::fs::write(
        folder.join("probe.manifest.json"),
        r#"{"name":"probe","version":"1.0.0","dependencies":[]}"#,
    )
    .unwrap();
}

#[test]
fn test_load_unload_cycle() {
    let Some(library) = system_library() else {
        eprintln!("skipping: no system libm found");
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path(), &library);

    let mut context = ExtensionLoadContext::new();
    let module = context.load(dir.path()).unwrap();
    assert!(context.is_loaded());
    assert_eq!(module.manifest().name.as_deref(), Some("probe"));

    assert!(matches!(context.load(dir.path()), Err(ExtensionError::AlreadyLoaded)));

    // No extension exports in libm.
    assert!(matches!(module.abi_version(), Err(ExtensionError::SymbolNotFound(_))));
    assert!(matches!(module.descriptors(), Err(ExtensionError::SymbolNotFound(_))));

    drop(module);
    let weak = context.unload().unwrap();
    assert!(weak.upgrade().is_none());

    assert!(matches!(context.unload(), Err(ExtensionError::NotLoaded)));
    assert!(matches!(context.load(dir.path()), Err(ExtensionError::Unloaded)));
}

#[test]
fn test_outstanding_handle_keeps_module_alive() {
    let Some(library) = system_library() else {
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path(), &library);

    let mut context = ExtensionLoadContext::new();
    let module = context.load(dir.path()).unwrap();
    let weak = context.unload().unwrap();

    assert!(weak.upgrade().is_some());
    drop(module);
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_dependencies_load_first() {
    let Some(library) = system_library() else {
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path(), &library);
    std::fs::create_dir_all(dir.path().join("deps")).unwrap();
    std::fs::copy(&library, dir.path().join("deps/libhelper.so")).unwrap();
    std::fs::write(
        dir.path().join("probe.manifest.json"),
        r#"{"dependencies":["deps/libhelper.so"]}"#,
    )
    .unwrap();

    let mut context = ExtensionLoadContext::new();
    let module = context.load(dir.path()).unwrap();
    assert_eq!(module.manifest().dependencies, vec!["deps/libhelper.so"]);
}

#[tokio::test]
async fn test_controller_restores_and_loads_local_package() {
    let Some(library) = system_library() else {
        return;
    };

    let source = tempfile::tempdir().unwrap();
    write_package(&source.path().join("1.0.0"), &library);

    let reference = PackageReference::new("local")
        .with_config("Path", source.path().to_string_lossy())
        .with_config("Version", "1.0.0");
    let mut controller = PackageController::new(reference);
    let root = tempfile::tempdir().unwrap();

    let module = controller.load(root.path()).await.unwrap();
    assert!(module.entry_path().starts_with(root.path()));
    assert!(controller.is_loaded());

    drop(module);
    let weak = controller.unload().unwrap();
    assert!(weak.upgrade().is_none());
    assert!(!controller.is_loaded());
}

#[tokio::test]
async fn test_hive_skips_package_without_exports() {
    let Some(library) = system_library() else {
        return;
    };

    let source = tempfile::tempdir().unwrap();
    write_package(&source.path().join("1.0.0"), &library);

    let root = tempfile::tempdir().unwrap();
    let mut hive = ExtensionHive::new(root.path());
    let reference = PackageReference::new("local")
        .with_config("Path", source.path().to_string_lossy())
        .with_config("Version", "1.0.0");

    hive.load_packages(&[reference]).await;

    assert!(hive.loaded_packages().is_empty());
    let ids: Vec<String> = hive.extensions().into_iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![RPC_DATA_SOURCE_ID.to_string()]);
}
