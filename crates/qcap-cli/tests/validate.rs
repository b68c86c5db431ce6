use assert_cmd::Command;
use std::io::Write;

const MINIMAL: &str = r#"
case_file: /cases/plant.sav
interface:
  type: branch
  from: 1
  to: 2
  circuit: "1"
groups:
  - label: BESS
    buses: [101, 102]
    unit_ids: ["1", "1"]
    nameplates_mva: [150.0, 150.0]
    storage: true
p_net: 100.0
"#;

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn validate_accepts_minimal_config() {
    let file = config_file(MINIMAL);
    Command::cargo_bin("qcap")
        .unwrap()
        .args(["validate", "--config"])
        .arg(file.path())
        .assert()
        .success();
}

#[test]
fn validate_rejects_mismatched_lists() {
    let file = config_file(&MINIMAL.replace("[150.0, 150.0]", "[150.0]"));
    Command::cargo_bin("qcap")
        .unwrap()
        .args(["validate", "--config"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicates::str::contains("configuration error"));
}

#[test]
fn tune_runs_against_simulation_backend() {
    let file = config_file(MINIMAL);
    Command::cargo_bin("qcap")
        .unwrap()
        .args(["tune", "--mode", "pq", "--config"])
        .arg(file.path())
        .assert()
        .success();
}

#[test]
fn q_only_tune_appends_to_existing_trace() {
    let file = config_file(MINIMAL);
    let dir = tempfile::tempdir().unwrap();
    let trace = dir.path().join("trace.csv");

    Command::cargo_bin("qcap")
        .unwrap()
        .args(["tune", "--mode", "p", "--config"])
        .arg(file.path())
        .arg("--trace")
        .arg(&trace)
        .assert()
        .success();
    Command::cargo_bin("qcap")
        .unwrap()
        .args(["tune", "--mode", "q", "--config"])
        .arg(file.path())
        .arg("--trace")
        .arg(&trace)
        .assert()
        .success();

    let text = std::fs::read_to_string(&trace).unwrap();
    assert!(text.contains("Iteration,k_factor,P_POI,Error"));
    assert!(text.contains("Iteration,VSched,Q_POI,Error"));
}
