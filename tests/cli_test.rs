use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const TYPE_ID: &str = "927abff4-7af9-4145-8ba1-577c16e64e2e";
const TIMELINE_ID: &str = "7ebf1c69-f62f-4d3a-bdfb-fe9ddb56861c";
const SUBMITTER_ROLE: &str = "732339e7-8e30-49d7-9198-cccf9451e221";

fn challenge(id: i64, type_code: i64, modified: &str) -> Value {
    json!({
        "legacyId": id,
        "name": format!("Challenge {id}"),
        "typeCode": type_code,
        "status": "Active",
        "createdAt": "2023-12-01 09:00:00",
        "modifiedAt": modified,
        "phases": [{
            "phaseTypeId": 1,
            "name": "Registration",
            "scheduledStart": "2024-01-01 00:00:00",
            "scheduledEnd": "2024-01-05 00:00:00",
            "isOpen": true
        }],
        "numSubmissions": 1,
        "numRegistrants": 3
    })
}

fn write_fixture(dir: &Path, challenges: Vec<Value>) -> PathBuf {
    let mut resources = serde_json::Map::new();
    for c in &challenges {
        let id = c["legacyId"].as_i64().expect("legacy id");
        resources.insert(
            id.to_string(),
            json!([{ "memberId": 1000 + id, "memberHandle": "alice", "roleCode": 1 }]),
        );
    }
    let fixture = json!({
        "challenges": challenges,
        "resources": resources,
        "types": [{ "id": TYPE_ID, "legacyCode": 1, "name": "Challenge" }],
        "roles": [{ "id": SUBMITTER_ROLE, "legacyCode": 1, "name": "Submitter" }],
        "timelineTemplates": [{ "id": TIMELINE_ID, "typeCode": 1 }]
    });
    let path = dir.join("legacy.json");
    fs::write(&path, serde_json::to_string_pretty(&fixture).expect("fixture json"))
        .expect("write fixture");
    path
}

fn migrator(home: &Path, legacy: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("challenge-migrator");
    cmd.env("MIGRATOR_HOME", home)
        .env("MIGRATOR_BACKEND", "fixture")
        .env("MIGRATOR_FIXTURE_LEGACY", legacy)
        .env("MIGRATOR_FIXTURE_MODERN", home.join("modern.json"))
        .env("MIGRATOR_LOG", "warn");
    cmd
}

#[test]
fn migrate_then_progress_reports_success() {
    let tmp = tempdir().expect("tempdir");
    let legacy = write_fixture(
        tmp.path(),
        vec![
            challenge(101, 1, "2024-01-01 00:00:00"),
            challenge(102, 1, "2024-01-02 00:00:00"),
        ],
    );

    migrator(tmp.path(), &legacy)
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("migrate: ok"))
        .stdout(predicate::str::contains("succeeded=2"));

    let out = migrator(tmp.path(), &legacy)
        .args(["--json", "progress", "--status", "SUCCESS"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: Value = serde_json::from_slice(&out).expect("json report");
    assert_eq!(report["ok"], Value::Bool(true));
    let details = report["details"].as_array().expect("details");
    assert!(details[0].as_str().is_some_and(|d| d.starts_with("total=2")));
    assert!(tmp.path().join("modern.json").is_file());
}

#[test]
fn unresolvable_entity_exits_with_issues() {
    let tmp = tempdir().expect("tempdir");
    let legacy = write_fixture(
        tmp.path(),
        vec![
            challenge(201, 1, "2024-01-01 00:00:00"),
            challenge(202, 38, "2024-01-02 00:00:00"),
        ],
    );

    migrator(tmp.path(), &legacy)
        .arg("migrate")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("failed=1"));

    migrator(tmp.path(), &legacy)
        .args(["progress", "--status", "FAILED"])
        .assert()
        .success()
        .stdout(predicate::str::contains("legacy_id=202"))
        .stdout(predicate::str::contains("type code 38"));
}

#[test]
fn background_migrate_and_retry_follow_the_pass() {
    let tmp = tempdir().expect("tempdir");
    let legacy = write_fixture(
        tmp.path(),
        vec![
            challenge(251, 1, "2024-01-01 00:00:00"),
            challenge(252, 38, "2024-01-02 00:00:00"),
        ],
    );

    migrator(tmp.path(), &legacy)
        .args(["migrate", "--background", "--heartbeat-secs", "1"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("last_run kind=migrate"))
        .stdout(predicate::str::contains("succeeded=1 failed=1"));

    migrator(tmp.path(), &legacy)
        .args(["retry", "--background"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("requeued 1 failed records"))
        .stdout(predicate::str::contains("last_run kind=sync"));

    migrator(tmp.path(), &legacy)
        .args(["sync", "--deadline-secs", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--background"));
}

#[test]
fn sync_after_migrate_changes_nothing() {
    let tmp = tempdir().expect("tempdir");
    let legacy = write_fixture(tmp.path(), vec![challenge(301, 1, "2024-01-01 00:00:00")]);

    migrator(tmp.path(), &legacy).arg("migrate").assert().success();
    let before = fs::read_to_string(tmp.path().join("modern.json")).expect("modern replica");

    migrator(tmp.path(), &legacy)
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("unchanged=1"))
        .stdout(predicate::str::contains("processed=0"));

    let after = fs::read_to_string(tmp.path().join("modern.json")).expect("modern replica");
    assert_eq!(before, after);
}

#[test]
fn sync_picks_up_legacy_edits() {
    let tmp = tempdir().expect("tempdir");
    let legacy = write_fixture(tmp.path(), vec![challenge(401, 1, "2024-01-01 00:00:00")]);
    migrator(tmp.path(), &legacy).arg("migrate").assert().success();

    write_fixture(tmp.path(), vec![challenge(401, 1, "2024-01-01 00:10:00")]);
    migrator(tmp.path(), &legacy)
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("queued=1"))
        .stdout(predicate::str::contains("succeeded=1"));
}

#[test]
fn invalid_progress_status_is_an_issue() {
    let tmp = tempdir().expect("tempdir");
    let legacy = write_fixture(tmp.path(), vec![]);
    migrator(tmp.path(), &legacy)
        .args(["progress", "--status", "DONE"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("unknown status"));
}

#[test]
fn cancel_without_active_run_is_a_no_op() {
    let tmp = tempdir().expect("tempdir");
    let legacy = write_fixture(tmp.path(), vec![]);
    migrator(tmp.path(), &legacy)
        .arg("cancel")
        .assert()
        .success()
        .stdout(predicate::str::contains("no active run"));
    assert!(!tmp.path().join("state/cancel.request").exists());
}

#[test]
fn health_reports_fixture_backend() {
    let tmp = tempdir().expect("tempdir");
    let legacy = write_fixture(tmp.path(), vec![challenge(501, 1, "2024-01-01 00:00:00")]);
    migrator(tmp.path(), &legacy)
        .arg("health")
        .assert()
        .success()
        .stdout(predicate::str::contains("config=ok backend=Fixture"))
        .stdout(predicate::str::contains("fixture_legacy=ok"))
        .stdout(predicate::str::contains("run.lock=free"));
}

#[test]
fn destroy_removes_target_and_record() {
    let tmp = tempdir().expect("tempdir");
    let legacy = write_fixture(tmp.path(), vec![challenge(601, 1, "2024-01-01 00:00:00")]);
    migrator(tmp.path(), &legacy).arg("migrate").assert().success();

    migrator(tmp.path(), &legacy)
        .args(["destroy", "--legacy-id", "601"])
        .assert()
        .success()
        .stdout(predicate::str::contains("destroyed legacy_id=601"));

    migrator(tmp.path(), &legacy)
        .args(["progress", "--legacy-id", "601"])
        .assert()
        .success()
        .stdout(predicate::str::contains("total=0"));
}
