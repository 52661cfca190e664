use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use basehound_core::hierarchy::derives_from;
use basehound_core::loader::{FixtureLoader, LoadError, ModuleLoader};
use basehound_core::model::{
    Module, ModuleIdentity, ReferenceScope, TypeRecord, TypeReference,
};
use basehound_core::resolver::RunContext;
use tempfile::tempdir;

/// Wraps the fixture loader and records every load attempt, so tests can
/// observe how often the resolver actually goes to disk.
struct CountingLoader {
    inner: FixtureLoader,
    loads: Arc<Mutex<Vec<PathBuf>>>,
}

impl ModuleLoader for CountingLoader {
    fn load(&self, path: &Path) -> Result<Module, LoadError> {
        self.loads.lock().expect("loads lock").push(path.to_path_buf());
        self.inner.load(path)
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

fn counting_ctx(search_paths: Vec<PathBuf>) -> (RunContext, Arc<Mutex<Vec<PathBuf>>>) {
    let loads = Arc::new(Mutex::new(Vec::new()));
    let loader = CountingLoader { inner: FixtureLoader, loads: loads.clone() };
    (RunContext::new(Box::new(loader), search_paths), loads)
}

fn loads_of(loads: &Arc<Mutex<Vec<PathBuf>>>, file_name: &str) -> usize {
    loads
        .lock()
        .expect("loads lock")
        .iter()
        .filter(|p| p.file_name().and_then(|n| n.to_str()) == Some(file_name))
        .count()
}

fn write_fixture(dir: &Path, file_name: &str, contents: &str) -> PathBuf {
    let path = dir.join(file_name);
    fs::write(&path, contents).expect("write fixture");
    path
}

const APP_WITH_TWO_EXT_USERS: &str = r#"{
    "name": "App",
    "types": [
        { "namespace": "App", "name": "D1",
          "bases": [{ "full_name": "Ext.Base", "assembly": "Ext" }] },
        { "namespace": "App", "name": "D2",
          "bases": [{ "full_name": "Ext.Base", "assembly": "Ext" }] }
    ]
}"#;

const EXT_WITH_BASE: &str = r#"{
    "name": "Ext",
    "types": [{ "namespace": "Ext", "name": "Base" }]
}"#;

#[test]
fn external_module_is_loaded_at_most_once_per_run() {
    let app_dir = tempdir().expect("tempdir");
    let ref_dir = tempdir().expect("tempdir");
    let app_path = write_fixture(app_dir.path(), "App.json", APP_WITH_TWO_EXT_USERS);
    write_fixture(ref_dir.path(), "Ext.json", EXT_WITH_BASE);

    let (mut ctx, loads) = counting_ctx(vec![ref_dir.path().to_path_buf()]);
    let app = ctx.load_root(&app_path).expect("load root");

    for index in 0..app.types().len() {
        let ty = &app.types()[index];
        assert!(derives_from(&app, ty, "Ext.Base", &mut ctx), "{} should match", ty.full_name);
    }

    assert_eq!(loads_of(&loads, "Ext.json"), 1, "one load for many queries");
}

#[test]
fn failed_candidate_is_probed_only_once() {
    let app_dir = tempdir().expect("tempdir");
    let ref_dir = tempdir().expect("tempdir");
    let app_path = write_fixture(
        app_dir.path(),
        "App.json",
        r#"{
            "name": "App",
            "types": [
                { "namespace": "App", "name": "D1",
                  "bases": [{ "full_name": "Bad.Base", "assembly": "Bad" }] },
                { "namespace": "App", "name": "D2",
                  "bases": [{ "full_name": "Bad.Base", "assembly": "Bad" }] }
            ]
        }"#,
    );
    write_fixture(ref_dir.path(), "Bad.json", "{ not valid json");

    let (mut ctx, loads) = counting_ctx(vec![ref_dir.path().to_path_buf()]);
    let app = ctx.load_root(&app_path).expect("load root");

    for index in 0..app.types().len() {
        let ty = &app.types()[index];
        assert!(!derives_from(&app, ty, "Bad.Base", &mut ctx));
    }

    assert_eq!(loads_of(&loads, "Bad.json"), 1, "miss is memoized after the first probe");
}

#[test]
fn originating_module_directory_is_probed_before_search_path() {
    let app_dir = tempdir().expect("tempdir");
    let ref_dir = tempdir().expect("tempdir");
    let app_path = write_fixture(app_dir.path(), "App.json", APP_WITH_TWO_EXT_USERS);
    // The copy next to the app defines Ext.Base; the search-path copy does not.
    write_fixture(app_dir.path(), "Ext.json", EXT_WITH_BASE);
    write_fixture(
        ref_dir.path(),
        "Ext.json",
        r#"{ "name": "Ext", "types": [{ "namespace": "Ext", "name": "Unrelated" }] }"#,
    );

    let (mut ctx, _loads) = counting_ctx(vec![ref_dir.path().to_path_buf()]);
    let app = ctx.load_root(&app_path).expect("load root");
    let d1 = &app.types()[0];
    assert!(derives_from(&app, d1, "Ext.Base", &mut ctx));
}

#[test]
fn search_directories_are_probed_in_caller_order() {
    let app_dir = tempdir().expect("tempdir");
    let first = tempdir().expect("tempdir");
    let second = tempdir().expect("tempdir");
    let app_path = write_fixture(app_dir.path(), "App.json", APP_WITH_TWO_EXT_USERS);
    write_fixture(
        first.path(),
        "Ext.json",
        r#"{ "name": "Ext", "types": [{ "namespace": "Ext", "name": "Unrelated" }] }"#,
    );
    write_fixture(second.path(), "Ext.json", EXT_WITH_BASE);

    let (mut ctx, loads) =
        counting_ctx(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
    let app = ctx.load_root(&app_path).expect("load root");
    let d1 = &app.types()[0];

    // The first directory wins even though its copy lacks the base type.
    assert!(!derives_from(&app, d1, "Ext.Base", &mut ctx));
    assert_eq!(loads_of(&loads, "Ext.json"), 1);
}

#[test]
fn candidate_with_wrong_identity_is_skipped() {
    let app_dir = tempdir().expect("tempdir");
    let first = tempdir().expect("tempdir");
    let second = tempdir().expect("tempdir");
    let app_path = write_fixture(app_dir.path(), "App.json", APP_WITH_TWO_EXT_USERS);
    // File is named Ext.json but declares a different assembly.
    write_fixture(
        first.path(),
        "Ext.json",
        r#"{ "name": "SomethingElse", "types": [{ "namespace": "Ext", "name": "Base" }] }"#,
    );
    write_fixture(second.path(), "Ext.json", EXT_WITH_BASE);

    let (mut ctx, _loads) =
        counting_ctx(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
    let app = ctx.load_root(&app_path).expect("load root");
    let d1 = &app.types()[0];
    assert!(derives_from(&app, d1, "Ext.Base", &mut ctx), "probing falls through to the real Ext");
}

/// A sibling-module reference resolves by exact file name next to the
/// originating module, without an assembly identity check, and is cached
/// like any other load.
#[test]
fn sibling_module_reference_resolves_by_exact_file_name() {
    let dir = tempdir().expect("tempdir");
    // The sibling file declares a different name than the manifest would;
    // file-name addressing must not identity-check it.
    write_fixture(
        dir.path(),
        "parts.json",
        r#"{ "name": "parts", "types": [{ "namespace": "N", "name": "Helper" }] }"#,
    );
    let origin = Arc::new(Module::new(
        dir.path().join("main.dll"),
        ModuleIdentity::new("Main", None),
        None,
        vec![TypeRecord::new("N", "Widget").with_bases(vec![TypeReference {
            full_name: "N.Helper".into(),
            scope: ReferenceScope::SiblingModule { file_name: "parts.json".into() },
        }])],
    ));

    let (mut ctx, loads) = counting_ctx(Vec::new());
    let widget = &origin.types()[0];
    assert!(derives_from(&origin, widget, "N.Helper", &mut ctx));
    assert!(derives_from(&origin, widget, "N.Helper", &mut ctx), "cached on the second query");
    assert_eq!(loads_of(&loads, "parts.json"), 1);
}

#[test]
fn root_modules_resolve_each_other_without_probing() {
    let dir = tempdir().expect("tempdir");
    let lib_path = write_fixture(
        dir.path(),
        "Lib.json",
        r#"{ "name": "Lib", "types": [{ "namespace": "Lib", "name": "Base" }] }"#,
    );
    let app_path = write_fixture(
        dir.path(),
        "App2.json",
        r#"{
            "name": "App2",
            "types": [
                { "namespace": "App", "name": "D",
                  "bases": [{ "full_name": "Lib.Base", "assembly": "Lib" }] }
            ]
        }"#,
    );

    let (mut ctx, loads) = counting_ctx(Vec::new());
    let _lib = ctx.load_root(&lib_path).expect("load lib");
    let app = ctx.load_root(&app_path).expect("load app");
    let d = &app.types()[0];

    assert!(derives_from(&app, d, "Lib.Base", &mut ctx));
    assert_eq!(loads_of(&loads, "Lib.json"), 1, "the root load is the only load");
}
