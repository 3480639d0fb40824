use serde_json::Value;
use std::process::Command;

fn write_config(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("arena.toml");
    std::fs::write(&path, body).expect("write config");
    path
}

#[test]
fn headless_run_converges_and_writes_artifacts() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = write_config(
        dir.path(),
        r#"
        clients = 2
        ticks = 240
        settle_ticks = 600
        hostiles = 12

        [network]
        drop_rate = 0.05
        duplicate_rate = 0.05
        "#,
    );
    let metrics = dir.path().join("out").join("metrics.json");
    let events = dir.path().join("events.jsonl");

    let output = Command::new(env!("CARGO_BIN_EXE_arena-sync"))
        .arg("--config")
        .arg(&config)
        .arg("--metrics")
        .arg(&metrics)
        .arg("--events")
        .arg(&events)
        .arg("--strict")
        .output()
        .expect("spawn arena-sync");
    assert!(
        output.status.success(),
        "arena-sync failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: Value =
        serde_json::from_str(&std::fs::read_to_string(&metrics).expect("metrics written"))
            .expect("metrics are json");
    assert_eq!(report["result"], "pass");
    assert_eq!(report["clients"].as_array().map(Vec::len), Some(2));
    assert!(report["host"]["full_syncs"].as_u64().unwrap_or(0) >= 1);

    let log = std::fs::read_to_string(&events).expect("events written");
    assert!(log.lines().count() > 0);
    assert!(log.contains("\"kind\":\"game_started\""));
    for line in log.lines() {
        serde_json::from_str::<Value>(line).expect("every line is json");
    }
}

#[test]
fn help_exits_cleanly() {
    let output = Command::new(env!("CARGO_BIN_EXE_arena-sync"))
        .arg("--help")
        .output()
        .expect("spawn arena-sync");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("--metrics"));
}
