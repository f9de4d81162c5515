use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn bks() -> Command {
    let mut cmd = Command::cargo_bin("bks").expect("bks binary");
    cmd.env_remove("BKS_SYNC_ENABLED")
        .env_remove("BKS_REMOTE_URL")
        .env_remove("BKS_DATABASE_URL")
        .env("RUST_LOG", "warn");
    cmd
}

fn yaml(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("temp file");
    f.write_all(contents.as_bytes()).expect("write yaml");
    f
}

fn config_hash_line(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout)
        .lines()
        .find(|l| l.starts_with("config_hash="))
        .expect("config_hash line")
        .to_string()
}

#[test]
fn config_hash_is_stable_and_later_files_win() {
    let base = yaml("sync:\n  enabled: false\n  interval_secs: 60\n");
    let local = yaml("sync:\n  enabled: true\n");
    let paths = [
        base.path().to_string_lossy().to_string(),
        local.path().to_string_lossy().to_string(),
    ];

    let first = bks().arg("config-hash").args(&paths).assert().success();
    let out1 = first.get_output().stdout.clone();
    let text = String::from_utf8_lossy(&out1);
    assert!(text.contains(r#""enabled":true"#), "got: {text}");
    assert!(text.contains(r#""interval_secs":60"#), "got: {text}");

    let second = bks().arg("config-hash").args(&paths).assert().success();
    assert_eq!(
        config_hash_line(&out1),
        config_hash_line(&second.get_output().stdout)
    );
}

#[test]
fn config_hash_applies_env_overrides() {
    let base = yaml("sync:\n  enabled: false\n");
    bks()
        .env("BKS_SYNC_ENABLED", "true")
        .env("BKS_REMOTE_URL", "http://remote.test:4000")
        .arg("config-hash")
        .arg(base.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""enabled":true"#))
        .stdout(predicate::str::contains("http://remote.test:4000"));
}

#[test]
fn config_hash_refuses_secret_literals() {
    let bad = yaml("sync:\n  token: \"sk_live_abcdefghijkl\"\n");
    bks()
        .arg("config-hash")
        .arg(bad.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"))
        .stderr(predicate::str::contains("sk_live_abcdefghijkl").not());
}

#[test]
fn remind_rejects_unknown_window_before_db() {
    bks()
        .args(["remind", "--window", "weekly"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown reminder window 'weekly'"));
}

#[test]
fn sync_health_reports_disabled_without_network() {
    bks()
        .args(["sync", "health"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sync_enabled=false remote_healthy=false"));
}
