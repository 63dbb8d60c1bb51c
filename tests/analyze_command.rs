//! Integration tests for the sheetsense binary.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn temp_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("sheetsense-test-{}-{}", std::process::id(), name));
    fs::write(&path, contents).expect("write temp file");
    path
}

fn run_command(args: &[&str]) -> (String, String, i32) {
    let output = Command::new("cargo")
        .arg("run")
        .arg("-q")
        .arg("--")
        .args(args)
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    (stdout, stderr, exit_code)
}

const REQUEST: &str = r#"{
    "query": "сумма цен по маркетплейсам",
    "column_names": ["Товар", "Маркетплейс", "Цена"],
    "sheet_data": [
        ["Чайник", "WB", "100"],
        ["Утюг", "Ozon", "200"],
        ["Лампа", "WB", "50"]
    ]
}"#;

#[test]
fn test_aggregation_request_offline() {
    let request = temp_file("agg.json", REQUEST);
    let (stdout, stderr, code) = run_command(&[request.to_str().unwrap()]);
    assert_eq!(code, 0, "stderr: {}", stderr);

    let response: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(response["action_type"], "aggregate");
    assert_eq!(response["response_type"], "table");
    let rows = response["structured_data"]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
}

#[test]
fn test_scripted_reply_runs_in_sandbox() {
    let request = temp_file(
        "generic.json",
        r#"{
            "query": "какие строки дорогие?",
            "column_names": ["Товар", "Маркетплейс", "Цена"],
            "sheet_data": [["Чайник", "WB", "100"], ["Утюг", "Ozon", "200"]]
        }"#,
    );
    let script = temp_file(
        "reply.rhai",
        "summary = \"expensive rows found\";\nhighlight_rows = MATCH_ROWS(2, \"200\");\n",
    );
    let (stdout, stderr, code) = run_command(&[
        "--script",
        script.to_str().unwrap(),
        request.to_str().unwrap(),
    ]);
    assert_eq!(code, 0, "stderr: {}", stderr);

    let response: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(response["summary"], "expensive rows found");
    assert_eq!(response["highlight_rows"], serde_json::json!([1]));
}

#[test]
fn test_invalid_request_fails() {
    let request = temp_file("bad.json", "{not json");
    let (_, stderr, code) = run_command(&[request.to_str().unwrap()]);
    assert_ne!(code, 0);
    assert!(stderr.contains("not valid JSON"), "stderr: {}", stderr);
}

#[test]
fn test_builtins_listing() {
    let (stdout, _, code) = run_command(&["--builtins"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("GROUP_SUM"));
    assert!(stdout.contains("MATCH_ROWS"));
}
