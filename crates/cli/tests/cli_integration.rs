// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

const FAST_TIMING: &str = r#"
schema_version: "1.0"
timing: { settle_us: 2000, poll_us: 200, timeout_ms: 2000, wait: poll }
"#;

fn temp_path(prefix: &str, ext: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push("buslab-cli-tests");
    let _ = std::fs::create_dir_all(&dir);
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    dir.join(format!("{}-{}.{}", prefix, nonce, ext))
}

fn write_scenario(prefix: &str, extra: &str) -> PathBuf {
    let path = temp_path(prefix, "yaml");
    std::fs::write(&path, format!("{}{}", FAST_TIMING, extra)).expect("Failed to write scenario");
    path
}

fn buslab(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_buslab"))
        .args(args)
        .output()
        .expect("Failed to execute buslab")
}

fn read_report(path: &PathBuf) -> serde_json::Value {
    let text = std::fs::read_to_string(path).expect("Failed to read report");
    serde_json::from_str(&text).expect("Report is not JSON")
}

#[test]
fn test_all_scenarios_pass_and_report() {
    let scenario = write_scenario("all", "");
    let report = temp_path("all-report", "json");

    let output = buslab(&[
        "--scenario",
        scenario.to_str().unwrap(),
        "--report",
        report.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(0), "{:?}", output);

    let json = read_report(&report);
    assert_eq!(json["result_schema_version"], "1.0");
    assert_eq!(json["status"], "pass");
    assert_eq!(json["scenario_hash"].as_str().unwrap().len(), 64);

    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);

    assert_eq!(results[0]["scenario"], "spi");
    assert_eq!(results[0]["received"], serde_json::json!([0xAC]));
    assert_eq!(results[0]["returned"], serde_json::json!([0xAC]));

    assert_eq!(results[1]["scenario"], "i2c");
    assert_eq!(results[1]["address"], 0x50);
    assert_eq!(results[1]["address_ack"], "ack");
    assert_eq!(results[1]["received"], serde_json::json!([0xA5]));

    assert_eq!(results[2]["scenario"], "pipeline");
    assert_eq!(results[2]["output"], serde_json::json!([2, 4, 6, 8, 10]));
    assert!(results[2]["report"]["peak_in_flight"].as_u64().unwrap() <= 2);

    assert_eq!(json["metrics"]["transactions"], 2);
    assert_eq!(json["metrics"]["acks"], 2);
}

#[test]
fn test_address_mismatch_is_not_an_error() {
    let scenario = write_scenario(
        "mismatch",
        r#"
i2c:
  peripheral_address: 0x50
  target_address: 0x51
"#,
    );
    let report = temp_path("mismatch-report", "json");

    let output = buslab(&[
        "i2c",
        "--scenario",
        scenario.to_str().unwrap(),
        "--report",
        report.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(0), "{:?}", output);

    let json = read_report(&report);
    let result = &json["results"][0];
    assert_eq!(result["address"], 0x51);
    assert_eq!(result["address_ack"], "nack");
    assert_eq!(result["bytes_acked"], 0);
    assert_eq!(result["received"], serde_json::json!([]));
    assert_eq!(json["metrics"]["nacks"], 1);
}

#[test]
fn test_pattern_response_reaches_controller() {
    let scenario = write_scenario(
        "pattern",
        r#"
spi:
  payload: [0x01, 0x02, 0x03]
  response: [0x5A, 0xC3]
"#,
    );
    let report = temp_path("pattern-report", "json");

    let output = buslab(&[
        "spi",
        "--scenario",
        scenario.to_str().unwrap(),
        "--report",
        report.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(0), "{:?}", output);

    let result = &read_report(&report)["results"][0];
    assert_eq!(result["received"], serde_json::json!([1, 2, 3]));
    assert_eq!(result["returned"], serde_json::json!([0x5A, 0xC3, 0x5A]));
    assert_eq!(result["truncated_bits"], 0);
}

#[test]
fn test_pipeline_subcommand_only_runs_pipeline() {
    let scenario = write_scenario(
        "pipeline",
        r#"
pipeline: { capacity: 1, items: [7, 8, 9], factor: -1 }
"#,
    );
    let report = temp_path("pipeline-report", "json");

    let output = buslab(&[
        "pipeline",
        "--scenario",
        scenario.to_str().unwrap(),
        "--report",
        report.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(0), "{:?}", output);

    let json = read_report(&report);
    assert_eq!(json["results"].as_array().unwrap().len(), 1);
    assert_eq!(json["results"][0]["output"], serde_json::json!([-7, -8, -9]));
    assert_eq!(json["results"][0]["report"]["peak_in_flight"], 1);
    assert_eq!(json["metrics"]["transactions"], 0);
}

#[test]
fn test_invalid_scenario_exits_with_config_error() {
    let scenario = write_scenario(
        "bad-address",
        r#"
i2c:
  target_address: 0x90
"#,
    );
    let output = buslab(&["--scenario", scenario.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_missing_scenario_exits_with_config_error() {
    let output = buslab(&["spi", "--scenario", "/nonexistent/scenario.yaml"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_poll_close_to_settle_rejected_as_config_error() {
    let path = temp_path("near-settle", "yaml");
    std::fs::write(
        &path,
        r#"
schema_version: "1.0"
timing: { settle_us: 1000, poll_us: 900, timeout_ms: 2000 }
spi: { payload: [0xAC, 1, 2, 3, 4, 5, 6, 7] }
"#,
    )
    .expect("Failed to write scenario");
    let report = temp_path("near-settle-report", "json");

    let output = buslab(&[
        "spi",
        "--scenario",
        path.to_str().unwrap(),
        "--report",
        report.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(2));
    assert!(!report.exists());
}
