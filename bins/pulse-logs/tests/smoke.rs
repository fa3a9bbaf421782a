use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn write_config(dir: &Path, extra_monitoring: &str) -> std::path::PathBuf {
    let cfg = dir.join("config.toml");
    let log = dir.join("logs").join("health-check.log");
    fs::write(
        &cfg,
        format!(
            "log_level = \"info\"\n[monitoring]\n{extra_monitoring}\n[monitoring.logging]\nfilePath = {:?}\n",
            log.display().to_string()
        ),
    )
    .unwrap();
    cfg
}

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("pulse-logs").unwrap();
    for var in ["HEALTH_CHECK_SCHEDULE", "HEALTH_CHECK_TIMEOUT", "HEALTH_LOG_FILE", "HEALTH_LOG_FORMAT"] {
        cmd.env_remove(var);
    }
    cmd
}

const RECORD: &str = r#"{"id":"6f1c2a52-1d2e-4a53-9a3c-0c2f6c1e8b11","status":"healthy","timestamp":"2025-03-01T12:00:00Z","responseTimeMs":12,"httpStatusCode":200,"endpoint":"http://127.0.0.1:3000/health","applicationStatus":"running","jobId":"health-check","executionTimeMs":13,"retryCount":0,"environment":"test"}"#;

#[test]
fn recent_on_empty_log_prints_empty_array() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "");
    cli()
        .args(["--config", cfg.to_str().unwrap(), "recent", "--limit", "5"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));
}

#[test]
fn recent_reads_existing_records() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "");
    fs::create_dir_all(dir.path().join("logs")).unwrap();
    fs::write(dir.path().join("logs").join("health-check.log"), format!("{RECORD}\n")).unwrap();
    cli()
        .args(["--config", cfg.to_str().unwrap(), "recent"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"httpStatusCode\": 200"));
}

#[test]
fn out_of_range_limit_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "");
    cli()
        .args(["--config", cfg.to_str().unwrap(), "recent", "--limit", "0"])
        .assert()
        .failure();
}

#[test]
fn clear_requires_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "");
    let log = dir.path().join("logs").join("health-check.log");
    fs::create_dir_all(log.parent().unwrap()).unwrap();
    fs::write(&log, format!("{RECORD}\n")).unwrap();

    cli().args(["--config", cfg.to_str().unwrap(), "clear"]).assert().failure();
    assert!(log.exists());

    cli()
        .args(["--config", cfg.to_str().unwrap(), "clear", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 1 file(s)"));
    assert!(!log.exists());
}

#[test]
fn stats_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "");
    cli()
        .args(["--config", cfg.to_str().unwrap(), "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("health-check.log"))
        .stdout(predicate::str::contains("\"totalFiles\": 0"));
}

#[test]
fn validate_names_offending_fields() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "schedule = \"\"\ntimeoutMs = 0");
    cli()
        .args(["--config", cfg.to_str().unwrap(), "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("schedule").and(predicate::str::contains("timeoutMs")));
}

#[test]
fn validate_accepts_defaults_and_env_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "");
    cli()
        .env("HEALTH_CHECK_SCHEDULE", "*/2 * * * *")
        .args(["--config", cfg.to_str().unwrap(), "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("*/2 * * * *"));
}

#[test]
fn dotenv_in_working_directory_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "");
    let other = dir.path().join("elsewhere.log");
    fs::write(
        dir.path().join(".env"),
        format!("HEALTH_CHECK_SCHEDULE=\"*/7 * * * *\"\nHEALTH_LOG_FILE={:?}\n", other.display().to_string()),
    )
    .unwrap();

    cli()
        .current_dir(dir.path())
        .args(["--config", cfg.to_str().unwrap(), "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("*/7 * * * *"));

    cli()
        .current_dir(dir.path())
        .args(["--config", cfg.to_str().unwrap(), "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("elsewhere.log"));
}
