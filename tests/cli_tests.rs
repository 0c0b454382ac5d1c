// Command line tests driving the passvault binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const PASSPHRASE: &str = "cli test passphrase";

fn passvault(store: &Path) -> Command {
    let mut cmd = Command::cargo_bin("passvault").unwrap();
    cmd.env("NO_COLOR", "1")
        .env("PASSVAULT_PASSPHRASE", PASSPHRASE)
        .env("PASSVAULT_KDF_MEMORY_KIB", "256")
        .env_remove("PASSVAULT_FILE")
        .env_remove("PASSVAULT_USER")
        .arg("-f")
        .arg(store);
    cmd
}

fn init_store(dir: &TempDir) -> PathBuf {
    let store = dir.path().join("passvault.json");
    passvault(&store)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Store initialized"));
    store
}

fn add_item(store: &Path, args: &[&str], password: Option<&str>) -> serde_json::Value {
    let mut cmd = passvault(store);
    cmd.args(["-o", "json", "add"]).args(args);
    if let Some(password) = password {
        cmd.arg("--password-stdin").write_stdin(format!("{password}\n"));
    }
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "add failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_types_prints_catalog() {
    let mut cmd = Command::cargo_bin("passvault").unwrap();
    cmd.env("NO_COLOR", "1")
        .arg("types")
        .assert()
        .success()
        .stdout(predicate::str::contains("v5-totp-standalone"))
        .stdout(predicate::str::contains(
            "remove-password-and-note -> v5-totp-standalone",
        ))
        .stdout(predicate::str::contains("password-string"));
}

#[test]
fn test_types_json_has_every_content_type() {
    let output = Command::cargo_bin("passvault")
        .unwrap()
        .args(["-o", "json", "types"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let types: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(types.len(), 8);
    let standalone = types
        .iter()
        .find(|t| t["slug"] == "v5-totp-standalone")
        .unwrap();
    assert_eq!(
        standalone["transitions"]["add-password"],
        "v5-default-with-totp"
    );
}

#[test]
fn test_init_refuses_existing_store() {
    let dir = TempDir::new().unwrap();
    let store = init_store(&dir);

    passvault(&store).arg("init").assert().failure();
}

#[test]
fn test_missing_store_file() {
    let dir = TempDir::new().unwrap();
    passvault(&dir.path().join("missing.json"))
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Store file not found"));
}

#[test]
fn test_add_list_show() {
    let dir = TempDir::new().unwrap();
    let store = init_store(&dir);

    let added = add_item(
        &store,
        &[
            "--name",
            "Example",
            "--username",
            "alice@example.com",
            "--uri",
            "https://example.com",
            "--note",
            "backup codes in the safe",
        ],
        Some("hunter2"),
    );
    assert_eq!(added["resource_type"], "v5-default");
    let id = added["id"].as_str().unwrap().to_string();

    passvault(&store)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Example"))
        .stdout(predicate::str::contains("alice@example.com"));

    passvault(&store)
        .args(["show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Username: alice@example.com"))
        .stdout(predicate::str::contains("hunter2").not());

    passvault(&store)
        .args(["show", &id, "--reveal"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Password: hunter2"))
        .stdout(predicate::str::contains("Note: backup codes in the safe"));
}

#[test]
fn test_wrong_passphrase_cannot_open_item() {
    let dir = TempDir::new().unwrap();
    let store = init_store(&dir);
    let added = add_item(&store, &["--name", "Locked"], Some("pw"));
    let id = added["id"].as_str().unwrap();

    passvault(&store)
        .env("PASSVAULT_PASSPHRASE", "not the passphrase")
        .args(["show", id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to decrypt session key"));
}

#[test]
fn test_edit_drops_password_and_note_together() {
    let dir = TempDir::new().unwrap();
    let store = init_store(&dir);
    let added = add_item(
        &store,
        &["--name", "Bank", "--totp-secret", "JBSWY3DPEHPK3PXP"],
        Some("s3cret"),
    );
    assert_eq!(added["resource_type"], "v5-default-with-totp");
    let id = added["id"].as_str().unwrap();

    passvault(&store)
        .args(["edit", id, "--remove-password", "--remove-note"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(v5-totp-standalone)"));

    let output = passvault(&store)
        .args(["-o", "json", "show", id, "--reveal"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let secret = shown["secret"].as_object().unwrap();
    assert!(secret.get("password").is_none());
    assert!(secret.get("description").is_none());
    assert_eq!(secret["totp"]["secret_key"], "JBSWY3DPEHPK3PXP");
    assert_eq!(secret["totp"]["digits"], 6);
}

#[test]
fn test_totp_only_item() {
    let dir = TempDir::new().unwrap();
    let store = init_store(&dir);
    let added = add_item(
        &store,
        &["--name", "2FA", "--totp-only", "--totp-secret", "JBSWY3DPEHPK3PXP"],
        None,
    );
    assert_eq!(added["resource_type"], "v5-totp-standalone");

    let legacy = add_item(
        &store,
        &["--name", "Old 2FA", "--totp-only", "--legacy", "--totp-secret", "ABC"],
        None,
    );
    assert_eq!(legacy["resource_type"], "totp");
}

#[test]
fn test_totp_only_item_requires_key() {
    let dir = TempDir::new().unwrap();
    let store = init_store(&dir);

    passvault(&store)
        .args(["add", "--name", "2FA", "--totp-only"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("totp.secret_key"));
}

#[test]
fn test_share_with_registered_user() {
    let dir = TempDir::new().unwrap();
    let store = init_store(&dir);

    passvault(&store)
        .args(["add-user", "bob"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added user bob"));

    let added = add_item(&store, &["--name", "Shared", "--share", "bob"], Some("pw"));
    let id = added["id"].as_str().unwrap();

    let output = passvault(&store)
        .args(["-o", "json", "show", id])
        .output()
        .unwrap();
    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["permissions"], serde_json::json!(["me", "bob"]));

    passvault(&store)
        .args(["add", "--name", "Nope", "--share", "nobody"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No public key known for recipient nobody"));
}

#[test]
fn test_shared_metadata_key() {
    let dir = TempDir::new().unwrap();
    let store = init_store(&dir);

    passvault(&store)
        .args(["metadata-key", "team"])
        .assert()
        .success();

    let added = add_item(&store, &["--name", "Team", "--shared-key", "team"], Some("pw"));
    let id = added["id"].as_str().unwrap();

    passvault(&store)
        .args(["show", id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Name: Team"));
}

#[test]
fn test_backup() {
    let dir = TempDir::new().unwrap();
    let store = init_store(&dir);

    passvault(&store)
        .arg("backup")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created backup"));
}

#[test]
#[serial]
fn test_store_file_found_from_current_dir() {
    let dir = TempDir::new().unwrap();
    let store = init_store(&dir);
    let nested = dir.path().join("nested");
    std::fs::create_dir(&nested).unwrap();

    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(&nested).unwrap();
    let found = passvault::utils::find_store_file();
    std::env::set_current_dir(previous).unwrap();

    assert_eq!(
        found.map(|p| p.canonicalize().unwrap()),
        Some(store.canonicalize().unwrap())
    );
}

#[test]
#[serial]
fn test_cli_uses_store_in_current_dir() {
    let dir = TempDir::new().unwrap();
    init_store(&dir);

    Command::cargo_bin("passvault")
        .unwrap()
        .env("NO_COLOR", "1")
        .env("PASSVAULT_PASSPHRASE", PASSPHRASE)
        .env_remove("PASSVAULT_FILE")
        .current_dir(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No items found"));
}
