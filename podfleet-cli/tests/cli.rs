use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

const VALID: &str = r#"
[[clusters]]
name = "prod"
location = "us-central1"
project = "acme"
labels = { env = "prod" }

[[addons]]
name = "ingress"
version = "4.10.0"
install = ["helm", "upgrade", "--install", "ingress", "./charts/ingress"]
remove = ["helm", "uninstall", "ingress"]
"#;

const DUPLICATE_ADDONS: &str = r#"
[[addons]]
name = "ingress"
install = ["true"]

[[addons]]
name = "ingress"
install = ["true"]
"#;

fn podfleet() -> Command {
    let mut cmd = Command::cargo_bin("podfleet").unwrap();
    cmd.env_remove("VAULT_TOKEN").env("RUST_LOG", "warn");
    cmd
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn version_prints_system() {
    let output = podfleet().arg("--version").output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    let out = stdout(&output);
    assert!(out.starts_with("podfleet "));
    assert!(out.contains("System: "));
}

#[test]
fn test_command_passes_valid_fleet() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("prod.toml"), VALID).unwrap();

    let output = podfleet().arg("test").arg(dir.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("PASS"));
}

#[test]
fn test_command_failure_exits_one() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("good.toml"), VALID).unwrap();
    fs::write(dir.path().join("bad.toml"), DUPLICATE_ADDONS).unwrap();

    let output = podfleet().arg("test").arg(dir.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let out = stdout(&output);
    assert!(out.contains("FAIL"));
    assert!(out.contains("duplicate addon"));
}

#[test]
fn test_command_without_fleet_files_is_fatal() {
    let dir = TempDir::new().unwrap();
    let output = podfleet().arg("test").arg(dir.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn missing_fleet_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    let output = podfleet()
        .args(["list", "--dry-run"])
        .arg(dir.path().join("nope.toml"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn no_matching_clusters_succeeds() {
    let dir = TempDir::new().unwrap();
    let fleet = dir.path().join("fleet.toml");
    fs::write(&fleet, VALID).unwrap();

    let output = podfleet()
        .args(["install", "--dry-run", "--context", "env=staging"])
        .arg(&fleet)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("0 attempted"));
}

#[test]
fn install_without_vault_token_is_usage_error() {
    let dir = TempDir::new().unwrap();
    let fleet = dir.path().join("fleet.toml");
    fs::write(&fleet, VALID).unwrap();

    let output = podfleet().arg("install").arg(&fleet).output().unwrap();
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn unknown_command_is_usage_error() {
    let output = podfleet().arg("deploy").output().unwrap();
    assert_eq!(output.status.code(), Some(64));
}
