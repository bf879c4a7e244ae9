// Integration tests for `ssync` exit codes and output against snapshot fixtures.
//
// Every command runs with HOME / XDG_CONFIG_HOME pointed at a temp dir and the
// SURVEYSYNC_* variables removed, so a developer's saved credentials or config
// never leak in.
//
// Run with: cargo test -p surveysync-cli --test cli_snapshot -- --nocapture

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn ssync(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ssync"));
    cmd.current_dir(env!("CARGO_MANIFEST_DIR"))
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("SURVEYSYNC_URL")
        .env_remove("SURVEYSYNC_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn run(args: &[&str]) -> Output {
    let home = tempfile::tempdir().unwrap();
    ssync(home.path()).args(args).output().expect("run ssync")
}

fn snapshot(name: &str) -> String {
    fixtures_dir().join(name).to_string_lossy().into_owned()
}

fn code(output: &Output) -> i32 {
    output.status.code().unwrap_or(-1)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn json(output: &Output) -> serde_json::Value {
    let out = stdout(output);
    serde_json::from_str(out.trim())
        .unwrap_or_else(|e| panic!("stdout must be valid JSON: {e}\nstdout:\n{out}"))
}

// ===========================================================================
// report
// ===========================================================================

#[test]
fn report_clean_snapshot_exits_zero() {
    let output = run(&["report", "--snapshot", &snapshot("clean")]);
    assert_eq!(code(&output), 0, "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("2 employees, 1 responses"));
}

#[test]
fn report_dirty_snapshot_exits_one() {
    let output = run(&["report", "--snapshot", &snapshot("dirty")]);
    assert_eq!(code(&output), 1, "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("orphaned responses:"));
    assert!(out.contains("MTI002  employees=E2,E3  responses=R3"));
    assert!(out.contains("R1  employee_ref  (null) -> E1"));
    assert!(out.contains("R1  level  Non-Managerial -> Managerial"));
    assert!(!stderr(&output).contains("error:"));
}

#[test]
fn report_names_skipped_records_in_plain_words() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("employees.csv"),
        "id,badge_number,level\nE1,MTI001,Managerial\nE2,,Managerial\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("survey_responses.csv"),
        "id,badge_number,employee_id,level\nR1,MTI001,E1,Managerial\n",
    )
    .unwrap();

    let output = run(&["report", "--snapshot", &dir.path().to_string_lossy()]);
    let out = stdout(&output);
    assert!(out.contains("skipped records:"), "stdout: {out}");
    assert!(out.contains("  employees  E2  missing badge number"), "stdout: {out}");
    assert!(!out.contains("MissingBadge"));
}

#[test]
fn report_json_contract() {
    let output = run(&["report", "--snapshot", &snapshot("dirty"), "--json"]);
    assert_eq!(code(&output), 1);
    let val = json(&output);

    assert_eq!(val["summary"]["responses"], 3);
    assert_eq!(val["summary"]["matched"], 1);
    assert_eq!(val["summary"]["orphaned"], 1);
    assert_eq!(val["summary"]["ambiguous"], 1);
    assert_eq!(val["summary"]["repairs"], 2);
    assert_eq!(val["orphans"][0]["response_id"], "R2");
    assert_eq!(val["plan"][0]["field"], "employee_ref");
    assert_eq!(val["plan"][1]["new_value"], "Managerial");
    assert!(val["meta"]["plan_fingerprint"].as_str().unwrap().starts_with("blake3:"));
}

#[test]
fn report_writes_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("report.json");
    let output = run(&["report", "--snapshot", &snapshot("clean"), "--output", out_path.to_str().unwrap()]);
    assert_eq!(code(&output), 0);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(written["summary"]["matched"], 1);
    assert!(written["plan"].as_array().unwrap().is_empty());
}

#[test]
fn report_without_credentials_exits_61() {
    let output = run(&["report"]);
    assert_eq!(code(&output), 61, "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("ssync login"));
}

#[test]
fn missing_snapshot_dir_exits_67() {
    let output = run(&["report", "--snapshot", &snapshot("does-not-exist")]);
    assert_eq!(code(&output), 67);
}

#[test]
fn snapshot_missing_table_exits_67() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("employees.json"), "[]").unwrap();
    let output = run(&["report", "--snapshot", dir.path().to_str().unwrap()]);
    assert_eq!(code(&output), 67, "stderr: {}", stderr(&output));
}

// ===========================================================================
// repair
// ===========================================================================

#[test]
fn repair_snapshot_is_dry_run() {
    let output = run(&["repair", "--snapshot", &snapshot("dirty")]);
    assert_eq!(code(&output), 0, "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("dry run: 2 repairs planned"));
    assert!(out.contains("--expect-plan blake3:"));
}

#[test]
fn repair_apply_with_snapshot_is_usage_error() {
    let output = run(&["repair", "--apply", "--snapshot", &snapshot("dirty")]);
    assert_eq!(code(&output), 2);
    assert!(stderr(&output).contains("--snapshot"));
}

#[test]
fn repair_apply_and_dry_run_conflict() {
    let output = run(&["repair", "--apply", "--dry-run"]);
    assert_eq!(code(&output), 2);
}

#[test]
fn repair_expect_plan_mismatch_exits_66() {
    let output = run(&["repair", "--snapshot", &snapshot("dirty"), "--expect-plan", "blake3:0000"]);
    assert_eq!(code(&output), 66);
    assert!(stderr(&output).contains("does not match"));
}

#[test]
fn repair_expect_plan_roundtrip() {
    let first = run(&["repair", "--snapshot", &snapshot("dirty"), "--json"]);
    assert_eq!(code(&first), 0);
    let val = json(&first);
    assert_eq!(val["dry_run"], true);
    assert!(val["outcomes"].as_array().unwrap().is_empty());
    assert!(val["verification"].is_null());

    let fingerprint = val["report"]["meta"]["plan_fingerprint"].as_str().unwrap().to_string();
    let second = run(&["repair", "--snapshot", &snapshot("dirty"), "--expect-plan", &fingerprint]);
    assert_eq!(code(&second), 0, "stderr: {}", stderr(&second));
}

#[test]
fn repair_clean_snapshot_has_nothing_to_do() {
    let output = run(&["repair", "--snapshot", &snapshot("clean")]);
    assert_eq!(code(&output), 0);
    assert!(stdout(&output).contains("nothing to repair"));
}

#[test]
fn repair_zero_batch_size_is_usage_error() {
    let output = run(&["repair", "--snapshot", &snapshot("dirty"), "--batch-size", "0"]);
    assert_eq!(code(&output), 2);
}

// ===========================================================================
// analytics
// ===========================================================================

#[test]
fn analytics_reports_na_for_empty_level() {
    let output = run(&["analytics", "--snapshot", &snapshot("clean")]);
    assert_eq!(code(&output), 0, "stderr: {}", stderr(&output));
    let out = stdout(&output);
    let managerial = out.lines().find(|l| l.starts_with("Managerial")).unwrap();
    assert!(managerial.trim_end().ends_with("n/a"), "line: {managerial}");
    let non_managerial = out.lines().find(|l| l.starts_with("Non-Managerial")).unwrap();
    assert!(non_managerial.trim_end().ends_with("50.0%"), "line: {non_managerial}");
    assert!(out.contains("SCM"));
}

#[test]
fn analytics_json() {
    let output = run(&["analytics", "--snapshot", &snapshot("dirty"), "--json"]);
    assert_eq!(code(&output), 0);
    let val = json(&output);
    assert_eq!(val["levels"]["managerial_total"], 1);
    assert_eq!(val["levels"]["managerial_submitted"], 1);
    assert_eq!(val["levels"]["managerial_rate"], 1.0);
    assert_eq!(val["levels"]["non_managerial_total"], 2);
    assert_eq!(val["levels"]["non_managerial_submitted"], 0);
    assert_eq!(val["departments"][0]["department"], "HR");
}

// ===========================================================================
// config
// ===========================================================================

#[test]
fn validate_good_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("surveysync.toml");
    std::fs::write(
        &path,
        "[matching]\nbadge_normalization = \"exact\"\n\n[repair]\nbatch_size = 10\n",
    )
    .unwrap();

    let output = run(&["validate", path.to_str().unwrap()]);
    assert_eq!(code(&output), 0, "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("batch_size=10"));
}

#[test]
fn validate_bad_config_exits_60() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("surveysync.toml");
    std::fs::write(&path, "[repair]\nbatch_size = 0\n").unwrap();

    let output = run(&["validate", path.to_str().unwrap()]);
    assert_eq!(code(&output), 60);
}

#[test]
fn exact_matching_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("surveysync.toml");
    std::fs::write(&path, "[matching]\nbadge_normalization = \"exact\"\n").unwrap();

    let output = run(&[
        "report",
        "--config",
        path.to_str().unwrap(),
        "--snapshot",
        &snapshot("clean"),
        "--json",
    ]);
    assert_eq!(code(&output), 0);
    assert_eq!(json(&output)["meta"]["normalization"], "exact");
}

#[test]
fn missing_config_file_exits_60() {
    let output = run(&["report", "--config", "/nonexistent/surveysync.toml", "--snapshot", &snapshot("clean")]);
    assert_eq!(code(&output), 60);
}

// ===========================================================================
// credentials
// ===========================================================================

#[test]
fn logout_without_saved_credentials() {
    let output = run(&["logout"]);
    assert_eq!(code(&output), 0);
    assert!(stdout(&output).contains("No saved credentials"));
}

#[test]
fn login_without_key_exits_61() {
    let output = run(&["login", "--url", "https://example.invalid"]);
    assert_eq!(code(&output), 61);
}
