use std::fs;
use std::path::{Path, PathBuf};

use basehound_core::loader::AutoLoader;
use basehound_core::matcher::{find_derived, list_types, ScanError};
use basehound_core::report::{rendered_names, NameStyle};
use basehound_core::resolver::RunContext;
use tempfile::tempdir;

fn ctx() -> RunContext {
    RunContext::new(Box::new(AutoLoader), Vec::new())
}

fn write_fixture(dir: &Path, file_name: &str, contents: &str) -> PathBuf {
    let path = dir.join(file_name);
    fs::write(&path, contents).expect("write fixture");
    path
}

const CHAIN_MODULE: &str = r#"{
    "name": "M1",
    "types": [
        { "namespace": "N", "name": "A",
          "bases": [{ "full_name": "System.Object", "assembly": "mscorlib" }] },
        { "namespace": "N", "name": "B", "bases": [{ "full_name": "N.A" }] },
        { "namespace": "N", "name": "C", "bases": [{ "full_name": "N.B" }] }
    ]
}"#;

/// Scenario A: A : Object, B : A, C : B; target N.A matches [B, C] in
/// definition order.
#[test]
fn linear_chain_matches_in_definition_order() {
    let dir = tempdir().expect("tempdir");
    let m1 = write_fixture(dir.path(), "M1.json", CHAIN_MODULE);

    let mut ctx = ctx();
    let report = find_derived(&mut ctx, &[m1], "N.A").expect("scan");

    assert_eq!(rendered_names(&report, NameStyle::Full), vec!["N.B", "N.C"]);
    assert_eq!(rendered_names(&report, NameStyle::Short), vec!["B", "C"]);
    assert!(report.skipped.is_empty());
}

/// Scenario B: X : Y where Y lives in an unreachable module; target Y
/// matches nothing.
#[test]
fn unreachable_base_module_yields_no_matches() {
    let dir = tempdir().expect("tempdir");
    let m1 = write_fixture(
        dir.path(),
        "M1.json",
        r#"{
            "name": "M1",
            "types": [
                { "namespace": "N", "name": "X",
                  "bases": [{ "full_name": "N.Y", "assembly": "Unlisted" }] }
            ]
        }"#,
    );

    let mut ctx = ctx();
    let report = find_derived(&mut ctx, &[m1], "N.Y").expect("scan");
    assert!(report.matches.is_empty());
    assert!(report.skipped.is_empty(), "an unresolved reference is not a module failure");
}

/// Scenario C: a corrupt module is skipped and the rest of the batch
/// completes normally.
#[test]
fn corrupt_module_is_skipped_not_fatal() {
    let dir = tempdir().expect("tempdir");
    let bad = write_fixture(dir.path(), "corrupt.dll", "\x01\x02 this is not a PE file");
    let good = write_fixture(
        dir.path(),
        "M2.json",
        r#"{
            "name": "M2",
            "types": [
                { "namespace": "N", "name": "Base" },
                { "namespace": "N", "name": "D", "bases": [{ "full_name": "N.Base" }] }
            ]
        }"#,
    );

    let mut ctx = ctx();
    let report = find_derived(&mut ctx, &[bad.clone(), good], "N.Base").expect("scan");

    assert_eq!(rendered_names(&report, NameStyle::Full), vec!["N.D"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].path, bad);
    assert!(!report.skipped[0].reason.is_empty());
}

/// Cross-module derivation: M2.D derives from a base defined in M1, both
/// given to the same scan.
#[test]
fn matches_cross_module_boundaries() {
    let dir = tempdir().expect("tempdir");
    let m1 = write_fixture(
        dir.path(),
        "M1.json",
        r#"{ "name": "M1", "types": [{ "namespace": "Lib", "name": "Base" }] }"#,
    );
    let m2 = write_fixture(
        dir.path(),
        "M2.json",
        r#"{
            "name": "M2",
            "types": [
                { "namespace": "App", "name": "D",
                  "bases": [{ "full_name": "Lib.Base", "assembly": "M1" }] }
            ]
        }"#,
    );

    let mut ctx = ctx();
    let report = find_derived(&mut ctx, &[m1, m2], "Lib.Base").expect("scan");
    assert_eq!(rendered_names(&report, NameStyle::Full), vec!["App.D"]);
}

/// External bases are fetched through the reference search path when the
/// defining assembly is not part of the scan.
#[test]
fn reference_search_path_feeds_the_walk() {
    let app_dir = tempdir().expect("tempdir");
    let ref_dir = tempdir().expect("tempdir");
    let app = write_fixture(
        app_dir.path(),
        "App.json",
        r#"{
            "name": "App",
            "types": [
                { "namespace": "App", "name": "Handler",
                  "bases": [{ "full_name": "Fx.Middleware", "assembly": "Fx" }] }
            ]
        }"#,
    );
    write_fixture(
        ref_dir.path(),
        "Fx.json",
        r#"{
            "name": "Fx",
            "types": [
                { "namespace": "Fx", "name": "Component" },
                { "namespace": "Fx", "name": "Middleware",
                  "bases": [{ "full_name": "Fx.Component" }] }
            ]
        }"#,
    );

    let mut ctx = RunContext::new(Box::new(AutoLoader), vec![ref_dir.path().to_path_buf()]);
    let report = find_derived(&mut ctx, &[app], "Fx.Component").expect("scan");
    assert_eq!(rendered_names(&report, NameStyle::Full), vec!["App.Handler"]);
}

/// Two scanned modules defining the same fully-qualified type report it once.
#[test]
fn duplicate_full_names_are_reported_once() {
    let dir = tempdir().expect("tempdir");
    let shared = r#"{
        "name": "%NAME%",
        "types": [
            { "namespace": "N", "name": "Base" },
            { "namespace": "N", "name": "D", "bases": [{ "full_name": "N.Base" }] }
        ]
    }"#;
    let m1 = write_fixture(dir.path(), "Copy1.json", &shared.replace("%NAME%", "Copy1"));
    let m2 = write_fixture(dir.path(), "Copy2.json", &shared.replace("%NAME%", "Copy2"));

    let mut ctx = ctx();
    let report = find_derived(&mut ctx, &[m1, m2], "N.Base").expect("scan");
    assert_eq!(rendered_names(&report, NameStyle::Full), vec!["N.D"]);
}

#[test]
fn target_matching_is_exact_and_case_sensitive() {
    let dir = tempdir().expect("tempdir");
    let m1 = write_fixture(dir.path(), "M1.json", CHAIN_MODULE);

    let mut ctx = ctx();
    let report = find_derived(&mut ctx, &[m1], "n.a").expect("scan");
    assert!(report.matches.is_empty());
}

#[test]
fn empty_target_is_an_error() {
    let mut ctx = ctx();
    let err = find_derived(&mut ctx, &[], "").unwrap_err();
    assert!(matches!(err, ScanError::EmptyTarget));
}

#[test]
fn list_types_reports_definition_order() {
    let dir = tempdir().expect("tempdir");
    let m1 = write_fixture(dir.path(), "M1.json", CHAIN_MODULE);

    let mut ctx = ctx();
    let names = list_types(&mut ctx, &m1).expect("list");
    assert_eq!(names, vec!["N.A", "N.B", "N.C"]);
}
