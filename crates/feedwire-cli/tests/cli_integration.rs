//! CLI Integration Tests
//!
//! These tests run the `feedwire` binary end-to-end.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
const OTHER_KEY: &str = "ff0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fn cli_cmd() -> Command {
    Command::cargo_bin("feedwire").expect("Failed to find feedwire binary")
}

/// Value after `label` in `Label: value` output
fn field(output: &str, label: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix(label))
        .map(|rest| rest.trim_start_matches(':').trim().to_string())
}

fn keygen() -> (String, String, String) {
    let output = cli_cmd().arg("keygen").output().unwrap();
    let stdout = String::from_utf8(output.stdout).unwrap();
    (
        field(&stdout, "Private key").unwrap(),
        field(&stdout, "Public key").unwrap(),
        field(&stdout, "Address").unwrap(),
    )
}

// ============================================================================
// Keys
// ============================================================================

#[test]
fn test_keygen_prints_key_material() {
    let (private_key, public_key, address) = keygen();
    assert_eq!(private_key.len(), 64);
    assert_eq!(public_key.len(), 130);
    assert!(public_key.starts_with("04"));
    assert!(address.starts_with("0x"));
    assert_eq!(address.len(), 42);
}

#[test]
fn test_address_matches_keygen() {
    let (_, public_key, address) = keygen();

    cli_cmd()
        .args(["address", &public_key])
        .assert()
        .success()
        .stdout(predicate::str::contains(address));
}

#[test]
fn test_address_rejects_bad_key() {
    cli_cmd()
        .args(["address", "04abcd"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid public key"));
}

// ============================================================================
// Payload framing
// ============================================================================

#[test]
fn test_encode_decode_encrypted() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("doc.json");
    let framed = dir.path().join("doc.bin");
    std::fs::write(&input, r#"{"hello":"world"}"#).unwrap();

    cli_cmd()
        .args(["encode", "--key", KEY])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&framed)
        .assert()
        .success();

    let bytes = std::fs::read(&framed).unwrap();
    assert_eq!(bytes[0], 0xAE);
    assert!(!String::from_utf8_lossy(&bytes).contains("world"));

    cli_cmd()
        .args(["decode", "--key", KEY])
        .arg("--input")
        .arg(&framed)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"hello\": \"world\""));

    cli_cmd()
        .args(["decode", "--key", OTHER_KEY])
        .arg("--input")
        .arg(&framed)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to decode payload"));
}

#[test]
fn test_decode_respects_max_size() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("doc.json");
    let framed = dir.path().join("doc.bin");
    std::fs::write(&input, r#"{"body":"a fairly long string that exceeds the limit"}"#).unwrap();

    cli_cmd()
        .arg("encode")
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&framed)
        .assert()
        .success();

    cli_cmd()
        .args(["decode", "--max-size", "8"])
        .arg("--input")
        .arg(&framed)
        .assert()
        .failure();
}

#[test]
fn test_encode_rejects_short_key() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("doc.json");
    std::fs::write(&input, "{}").unwrap();

    cli_cmd()
        .args(["encode", "--key", "abcd"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(dir.path().join("out.bin"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Key must be 32 bytes"));
}

// ============================================================================
// Channels
// ============================================================================

#[test]
fn test_channel_plain_and_encrypted() {
    let (private_key, _, address) = keygen();
    let (_, peer, _) = keygen();

    cli_cmd()
        .args(["channel", "--private-key", &private_key, "--name", "feedwire.actor.v0"])
        .assert()
        .success()
        .stdout(predicate::str::contains(address.clone()))
        .stdout(predicate::str::contains("Key:     (none)"));

    let output = cli_cmd()
        .args([
            "channel",
            "--private-key",
            &private_key,
            "--name",
            "feedwire.contact.v0",
            "--peer",
            &peer,
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(field(&stdout, "Key").unwrap().len(), 64);
    assert_eq!(field(&stdout, "Address").unwrap(), address);
}

// ============================================================================
// Demo
// ============================================================================

#[test]
fn test_demo_runs_full_scenario() {
    cli_cmd()
        .args(["demo", "--interval-ms", "20"])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("Handshake: connected"))
        .stdout(predicate::str::contains("Message: Hello Bob"))
        .stdout(predicate::str::contains("File /hello.txt: Hello test"));
}
