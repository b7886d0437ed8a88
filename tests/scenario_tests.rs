//! Integration tests running the bundled scenarios through the driver.

use std::io::Write;

use insta::assert_snapshot;
use polyabi::pipeline::{Options, compare, emit_object, inspect};
use polyabi::{PipelineError, Scenario};
use polyabi_core::{AbiDatabase, ExplosionKind};

/// (name, source)
const SCENARIOS: &[(&str, &str)] = &[
    ("identity.pa", include_str!("../scenarios/identity.pa")),
    ("existential.pa", include_str!("../scenarios/existential.pa")),
    ("class_bound.pa", include_str!("../scenarios/class_bound.pa")),
    ("wide_result.pa", include_str!("../scenarios/wide_result.pa")),
    ("nominal.pa", include_str!("../scenarios/nominal.pa")),
    (
        "existential_result.pa",
        include_str!("../scenarios/existential_result.pa"),
    ),
];

fn compare_source(source: &str) -> String {
    let db = AbiDatabase::default();
    let scenario = Scenario::parse(&db, source).unwrap();
    compare(&db, &scenario, 0).unwrap().to_string()
}

#[test]
fn every_scenario_builds_a_thunk() {
    for (name, source) in SCENARIOS {
        for explosion in ExplosionKind::ALL {
            let db = AbiDatabase::default();
            let options = Options {
                explosion,
                ..Options::default()
            };
            let report = inspect(&db, source, &options)
                .unwrap_or_else(|e| panic!("{name} ({explosion}): {e}"));
            assert!(report.thunk.is_some(), "{name} has no thunk");
        }
    }
}

#[test]
fn identity_comparison() {
    assert_snapshot!(compare_source(SCENARIOS[0].1), @r"
    orig:  ($T) -> $T
    subst: (i64) -> i64
    bindings:
      $T = i64
    memory: same
    explosion (minimal): same
    explosion (maximal): same
    function (minimal, uncurry 0): differs
    function (maximal, uncurry 0): differs
    ");
}

#[test]
fn class_bound_comparison() {
    assert_snapshot!(compare_source(SCENARIOS[2].1), @r"
    orig:  ($C, $C) -> $C
    subst: (object, object) -> object
    bindings:
      $C = object
    memory: same
    explosion (minimal): same
    explosion (maximal): same
    function (minimal, uncurry 0): same
    function (maximal, uncurry 0): same
    ");
}

#[test]
fn existential_result_comparison() {
    assert_snapshot!(compare_source(SCENARIOS[5].1), @r"
    orig:  ($T) -> $T
    subst: (any Shape) -> any Shape
    bindings:
      $T = any Shape
    memory: same
    explosion (minimal): same
    explosion (maximal): same
    function (minimal, uncurry 0): differs
    function (maximal, uncurry 0): differs
    ");
}

#[test]
fn function_comparison_past_the_last_clause_fails() {
    let db = AbiDatabase::default();
    let scenario = Scenario::parse(&db, SCENARIOS[0].1).unwrap();
    let err = compare(&db, &scenario, 1).unwrap_err();
    assert!(matches!(err, PipelineError::Invariant(_)), "{err}");
}

#[test]
fn emitted_object_is_written() {
    let db = AbiDatabase::default();
    let bytes = emit_object(&db, SCENARIOS[1].1, &Options::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thunk.o");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&bytes).unwrap();
    drop(file);

    assert_eq!(std::fs::read(&path).unwrap(), bytes);
}

#[test]
fn parse_errors_are_reported_with_lines() {
    let db = AbiDatabase::default();
    let err = inspect(&db, "generic T\norig $T\nsubst $X\n", &Options::default()).unwrap_err();
    assert_snapshot!(err.to_string(), @"parse error: line 3: unknown generic `$X`");
}
