//! Integration tests for the TMT CLI
//!
//! These tests exercise the CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// 10 V point: 100 ppm UUT, 25 ppm standard-uncertainty reference
const TEST_POINT: &str = r#"
id: TP-01J9Z8X7W6V5T4S3R2Q1P0NMKJ
title: 10 V DC
uut:
  nominal: { value: 10, unit: V }
  tolerance:
    reading: { high: 100, unit: ppm }
tmde:
  - name: Reference
    nominal: { value: 10, unit: V }
    tolerance:
      reading: { high: 25, unit: ppm, distribution: std_uncertainty }
requirements:
  reliability: 0.95
  required_tur: 0
created: 2024-01-01T00:00:00Z
author: test
"#;

/// Helper to get a tmt command isolated from the user's config
fn tmt(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tmt").unwrap();
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("TMT_AUTHOR")
        .env_remove("TMT_CONFIDENCE")
        .env_remove("TMT_RELIABILITY")
        .env_remove("TMT_REQUIRED_PFA")
        .env_remove("RUST_LOG")
        .current_dir(home);
    cmd
}

fn write_point(dir: &Path, name: &str, doc: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, doc).unwrap();
    path
}

fn json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).unwrap()
}

fn close(value: &serde_json::Value, expected: f64, tol: f64) -> bool {
    value
        .as_f64()
        .is_some_and(|v| (v - expected).abs() < tol)
}

// ============================================================================
// Project setup
// ============================================================================

#[test]
fn test_init_creates_project() {
    let tmp = TempDir::new().unwrap();
    tmt(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized TMT project"));

    assert!(tmp.path().join(".tmt/config.yaml").exists());
    assert!(tmp.path().join("testpoints").is_dir());
    assert!(tmp.path().join("instruments").is_dir());
}

#[test]
fn test_init_twice_reports_existing_project() {
    let tmp = TempDir::new().unwrap();
    tmt(tmp.path()).arg("init").assert().success();
    tmt(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn test_new_writes_into_project() {
    let tmp = TempDir::new().unwrap();
    tmt(tmp.path()).arg("init").assert().success();
    tmt(tmp.path())
        .args(["new", "--title", "1 V DC", "--nominal", "1", "--unit", "V"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created test point"));

    let files: Vec<_> = fs::read_dir(tmp.path().join("testpoints"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().to_string_lossy().to_string();
    assert!(name.starts_with("TP-") && name.ends_with(".tmt.yaml"));

    // the generated file is a valid test point
    tmt(tmp.path())
        .args(["budget", &files[0].path().to_string_lossy()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Reference"));
}

#[test]
fn test_new_outside_project_prints_yaml() {
    let tmp = TempDir::new().unwrap();
    tmt(tmp.path())
        .args(["new", "--nominal", "5", "--unit", "A"])
        .assert()
        .success()
        .stdout(predicate::str::contains("uut:"))
        .stdout(predicate::str::contains("unit: A"));
}

#[test]
fn test_new_rejects_unknown_unit() {
    let tmp = TempDir::new().unwrap();
    tmt(tmp.path())
        .args(["new", "--unit", "furlong"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown unit"));
}

// ============================================================================
// Budget and risk
// ============================================================================

#[test]
fn test_budget_csv() {
    let tmp = TempDir::new().unwrap();
    let file = write_point(tmp.path(), "tp.tmt.yaml", TEST_POINT);
    tmt(tmp.path())
        .args(["budget", "-f", "csv", &file.to_string_lossy()])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Component,Type"))
        .stdout(predicate::str::contains("Reference"));
}

#[test]
fn test_budget_json_values() {
    let tmp = TempDir::new().unwrap();
    let file = write_point(tmp.path(), "tp.tmt.yaml", TEST_POINT);
    let out = tmt(tmp.path())
        .args(["budget", "-f", "json", &file.to_string_lossy()])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v = json(&out.stdout);
    assert!(close(&v["result"]["combined_native"], 0.00025, 1e-12));
    assert!(close(&v["result"]["combined_ppm"], 25.0, 1e-9));
}

#[test]
fn test_risk_end_to_end_values() {
    let tmp = TempDir::new().unwrap();
    let file = write_point(tmp.path(), "tp.tmt.yaml", TEST_POINT);
    let out = tmt(tmp.path())
        .args(["risk", "-f", "json", &file.to_string_lossy()])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v = json(&out.stdout);
    let risk = &v["risk"];
    assert!(close(&risk["pfa"]["total"], 0.007366099294253112, 1e-7));
    assert!(close(&risk["pfr"]["total"], 0.032813349465208086, 1e-7));
    assert!(close(&risk["u_uut"], 0.00044476709818398855, 1e-9));
    assert!(close(&risk["tar"], 4.0, 1e-9));
    assert!(close(&risk["tur"], 2.0408, 1e-3));
}

#[test]
fn test_risk_human_output() {
    let tmp = TempDir::new().unwrap();
    let file = write_point(tmp.path(), "tp.tmt.yaml", TEST_POINT);
    tmt(tmp.path())
        .args(["risk", &file.to_string_lossy()])
        .assert()
        .success()
        .stdout(predicate::str::contains("PFA"))
        .stdout(predicate::str::contains("0.7366%"))
        .stdout(predicate::str::contains("Guard band"));
}

#[test]
fn test_risk_solves_guard_band() {
    let tmp = TempDir::new().unwrap();
    let doc = TEST_POINT.replace("required_tur: 0", "required_tur: 0\n  required_pfa: 0.002");
    let file = write_point(tmp.path(), "tp.tmt.yaml", &doc);
    let out = tmt(tmp.path())
        .args(["risk", "-f", "json", &file.to_string_lossy()])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v = json(&out.stdout);
    let gb = &v["guard_band"];
    assert!(close(&gb["limits"]["multiplier"], 0.900390625, 1e-9));
    assert!(gb["pfa"]["total"].as_f64().unwrap() <= 0.002);
}

#[test]
fn test_risk_monte_carlo_agrees() {
    let tmp = TempDir::new().unwrap();
    let file = write_point(tmp.path(), "tp.tmt.yaml", TEST_POINT);
    let out = tmt(tmp.path())
        .args([
            "risk",
            "-f",
            "json",
            "--monte-carlo",
            "200000",
            "--seed",
            "7",
            &file.to_string_lossy(),
        ])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v = json(&out.stdout);
    let mc = v["monte_carlo"]["pfa"].as_f64().unwrap();
    assert!((mc - 0.007366).abs() < 0.002);
}

#[test]
fn test_risk_bad_yaml_reports_error() {
    let tmp = TempDir::new().unwrap();
    let file = write_point(tmp.path(), "bad.tmt.yaml", "title: [unclosed\n");
    tmt(tmp.path())
        .args(["risk", &file.to_string_lossy()])
        .assert()
        .failure();
}

// ============================================================================
// Guard band calculator
// ============================================================================

#[test]
fn test_gb_from_raw_numbers() {
    let tmp = TempDir::new().unwrap();
    let out = tmt(tmp.path())
        .args([
            "gb",
            "-f",
            "json",
            "--low",
            "9.999",
            "--high",
            "10.001",
            "--u-cal",
            "0.00025",
            "--reliability",
            "0.95",
            "--pfa",
            "0.002",
        ])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v = json(&out.stdout);
    assert!(close(&v["solution"]["multiplier"], 0.900390625, 1e-6));
    assert!(v["guarded"]["pfa"]["total"].as_f64().unwrap() <= 0.002);
}

#[test]
fn test_gb_without_limits_fails() {
    let tmp = TempDir::new().unwrap();
    tmt(tmp.path())
        .args(["gb", "--u-cal", "0.1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no tolerance limits"));
}

// ============================================================================
// Batch analysis
// ============================================================================

#[test]
fn test_analyze_write_then_skip() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("points");
    fs::create_dir_all(&dir).unwrap();
    let file = write_point(&dir, "a.tmt.yaml", TEST_POINT);

    tmt(tmp.path())
        .args(["analyze", "--write", "points"])
        .assert()
        .success()
        .stdout(predicate::str::contains("written"));
    let stored = fs::read_to_string(&file).unwrap();
    assert!(stored.contains("results:"));
    assert!(stored.contains("digest:"));

    tmt(tmp.path())
        .args(["analyze", "points"])
        .assert()
        .success()
        .stdout(predicate::str::contains("current"));

    tmt(tmp.path())
        .args(["analyze", "--force", "points"])
        .assert()
        .success()
        .stdout(predicate::str::contains("analyzed"));
}

#[test]
fn test_analyze_defaults_to_project_testpoints() {
    let tmp = TempDir::new().unwrap();
    tmt(tmp.path()).arg("init").assert().success();
    tmt(tmp.path()).arg("new").assert().success();
    tmt(tmp.path())
        .args(["analyze", "-f", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("analyzed"));
}

#[test]
fn test_analyze_outside_project_needs_paths() {
    let tmp = TempDir::new().unwrap();
    tmt(tmp.path())
        .arg("analyze")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a TMT project"));
}

#[test]
fn test_analyze_reports_failures() {
    let tmp = TempDir::new().unwrap();
    write_point(tmp.path(), "good.tmt.yaml", TEST_POINT);
    write_point(tmp.path(), "bad.tmt.yaml", "uut: 3\n");
    tmt(tmp.path())
        .args(["analyze", "."])
        .assert()
        .failure()
        .stdout(predicate::str::contains("failed"));
}

// ============================================================================
// Units
// ============================================================================

#[test]
fn test_convert_to_ppm() {
    let tmp = TempDir::new().unwrap();
    let out = tmt(tmp.path())
        .args(["convert", "-f", "json", "10", "mV", "--nominal", "10", "V"])
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(close(&json(&out.stdout)["result"], 1000.0, 1e-9));
}

#[test]
fn test_convert_ppm_to_unit() {
    let tmp = TempDir::new().unwrap();
    let out = tmt(tmp.path())
        .args([
            "convert", "-f", "json", "100", "ppm", "--nominal", "10", "V", "--to", "mV",
        ])
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(close(&json(&out.stdout)["result"], 1.0, 1e-9));
}

#[test]
fn test_convert_between_units() {
    let tmp = TempDir::new().unwrap();
    tmt(tmp.path())
        .args(["convert", "2.5", "kV", "--to", "V"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2500"));
}

#[test]
fn test_convert_absolute_needs_nominal() {
    let tmp = TempDir::new().unwrap();
    tmt(tmp.path())
        .args(["convert", "1", "mV"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("reference value"));
}

// ============================================================================
// Instruments
// ============================================================================

#[test]
fn test_inst_new_and_lookup() {
    let tmp = TempDir::new().unwrap();
    tmt(tmp.path())
        .args(["inst", "new", "--title", "Bench DMM", "-o", "dmm.tmt.yaml"])
        .assert()
        .success();
    assert!(tmp.path().join("dmm.tmt.yaml").exists());

    let out = tmt(tmp.path())
        .args([
            "inst", "lookup", "dmm.tmt.yaml", "--value", "500", "--unit", "mV", "-f", "json",
        ])
        .output()
        .unwrap();
    assert!(out.status.success());
    let rows = json(&out.stdout);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["best"], true);
    assert!(close(&rows[0]["value_in_function_unit"], 0.5, 1e-12));
}

#[test]
fn test_inst_lookup_out_of_range() {
    let tmp = TempDir::new().unwrap();
    tmt(tmp.path())
        .args(["inst", "new", "--title", "Bench DMM", "-o", "dmm.tmt.yaml"])
        .assert()
        .success();
    tmt(tmp.path())
        .args(["inst", "lookup", "dmm.tmt.yaml", "--value", "50", "--unit", "V"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No range"));
}

// ============================================================================
// Completions
// ============================================================================

#[test]
fn test_completions_bash() {
    let tmp = TempDir::new().unwrap();
    tmt(tmp.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tmt"));
}
