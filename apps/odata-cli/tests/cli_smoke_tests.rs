#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Smoke tests for the `odata` binary against the demo service.

use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use sea_orm::{ConnectionTrait, Database};
use serde_json::Value;
use tempfile::TempDir;

fn demo_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../testdata/demo/odata.yaml")
}

fn run_odata(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_odata"))
        .args(args)
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute odata")
}

#[test]
fn help_lists_the_commands() {
    let output = run_odata(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["parse", "sql", "query", "--config"] {
        assert!(stdout.contains(command), "help should mention {command}");
    }
}

#[test]
fn parse_prints_the_resolved_request() {
    let config = demo_config();
    let output = run_odata(&[
        "parse",
        "--config",
        config.to_str().unwrap(),
        "People(1)/Orders?$top=2",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let info: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["options"]["top"], 2);
}

#[test]
fn sql_renders_the_chosen_backend() {
    let config = demo_config();
    let output = run_odata(&[
        "sql",
        "--config",
        config.to_str().unwrap(),
        "--backend",
        "postgres",
        "People?$expand=Orders",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("-- main"));
    assert!(stdout.contains("-- expand Orders"));
    assert!(stdout.contains("\"people\" AS \"t0\""));
}

#[test]
fn unknown_segments_fail_with_a_problem() {
    let config = demo_config();
    let output = run_odata(&["parse", "--config", config.to_str().unwrap(), "Nobody"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("\"status\": 404"), "{stderr}");
}

#[test]
fn missing_config_files_are_rejected() {
    let output = run_odata(&["parse", "--config", "/nonexistent/odata.yaml", "People"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("config file does not exist"));
}

#[tokio::test]
async fn query_runs_against_sqlite() {
    let dir = TempDir::new().unwrap();
    let dsn = format!("sqlite://{}?mode=rwc", dir.path().join("demo.db").display());
    let conn = Database::connect(&dsn).await.unwrap();
    conn.execute_unprepared(include_str!("../../../testdata/demo/schema.sql"))
        .await
        .unwrap();
    conn.execute_unprepared(include_str!("../../../testdata/demo/seed.sql"))
        .await
        .unwrap();
    drop(conn);

    let config = demo_config();
    let output = run_odata(&[
        "query",
        "--config",
        config.to_str().unwrap(),
        "--database",
        &dsn,
        "People?$filter=Age gt 40&$orderby=Id",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let body: Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<&str> = body["value"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["Name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Alice", "Dan_Smith"]);
}
