use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn fieldquote(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("fieldquote").unwrap();
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("FIELDQUOTE__PRICING__PRICE_TOLERANCE_BPS");
    cmd
}

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    fieldquote(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("reconcile"))
        .stdout(predicate::str::contains("lifecycle"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_reconcile_merges_additively() {
    let dir = TempDir::new().unwrap();
    let existing = write(
        dir.path(),
        "existing.json",
        r#"[
            {"key": "water heater", "name": "Water Heater", "quantity": 1, "unit_price": 120000},
            {"key": "pipe replacement", "name": "Pipe Replacement", "quantity": 1, "unit_price": 30000}
        ]"#,
    );
    let proposal = write(
        dir.path(),
        "reply.txt",
        r#"Updated quote below.
        {"line_items": [
            {"name": "Water Heater", "quantity": 1, "unit_price": 1200},
            {"name": "Labor", "quantity": 1, "unit_price": 150}
        ], "tax_rate": 0}"#,
    );
    let catalog = write(
        dir.path(),
        "catalog.json",
        r#"[
            {"name": "Water Heater", "unit_price": 120000},
            {"name": "Pipe Replacement", "unit_price": 30000},
            {"name": "Labor", "unit_price": 15000}
        ]"#,
    );

    let output = fieldquote(dir.path())
        .args(["reconcile", "--existing", &existing, "--proposal", &proposal, "--catalog", &catalog])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["items"].as_array().unwrap().len(), 3);
    assert_eq!(json["totals"]["subtotal"], 165_000);
    assert_eq!(json["totals"]["total"], 165_000);
    assert_eq!(json["diff"]["added"][0], "Labor");
}

#[test]
fn test_reconcile_replace_drops_omitted() {
    let dir = TempDir::new().unwrap();
    let existing = write(
        dir.path(),
        "existing.json",
        r#"[{"key": "haul away", "name": "Haul Away", "quantity": 1, "unit_price": 5000}]"#,
    );
    let proposal = write(
        dir.path(),
        "proposal.json",
        r#"{"items": [{"name": "Drain Cleaning", "quantity": 2, "unit_price": 95.5}]}"#,
    );

    let output = fieldquote(dir.path())
        .args(["reconcile", "--existing", &existing, "--proposal", &proposal])
        .args(["--replace", "--allow-uncataloged"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["items"][0]["name"], "Drain Cleaning");
    assert_eq!(json["totals"]["subtotal"], 19_100);
    assert_eq!(json["diff"]["removed"][0], "Haul Away");
}

#[test]
fn test_reconcile_rejects_uncataloged_by_default() {
    let dir = TempDir::new().unwrap();
    let proposal = write(
        dir.path(),
        "proposal.json",
        r#"{"items": [{"name": "Gold Faucet", "quantity": 1, "unit_price": 900}]}"#,
    );
    fieldquote(dir.path())
        .args(["reconcile", "--proposal", &proposal])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not in the catalog"));
}

#[test]
fn test_reconcile_rejects_malformed_reply() {
    let dir = TempDir::new().unwrap();
    let proposal = write(dir.path(), "reply.txt", "Sorry, I cannot help with that.");
    fieldquote(dir.path())
        .args(["reconcile", "--proposal", &proposal])
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed proposal"));
}

#[test]
fn test_lifecycle_prints_states_and_queues() {
    let dir = TempDir::new().unwrap();
    fieldquote(dir.path())
        .arg("lifecycle")
        .assert()
        .success()
        .stdout(predicate::str::contains("draft"))
        .stdout(predicate::str::contains("sent, archived"))
        .stdout(predicate::str::contains("awaiting_payment"))
        .stdout(predicate::str::contains("(terminal)"));

    fieldquote(dir.path())
        .args(["lifecycle", "--kind", "lead"])
        .assert()
        .success()
        .stdout(predicate::str::contains("in_progress").not());
}

#[test]
fn test_config_reads_file_and_writes_output() {
    let dir = TempDir::new().unwrap();
    let config = write(
        dir.path(),
        "custom.toml",
        "[pricing]\nprice_tolerance_bps = 250\n\n[invoicing]\nprefix = \"JOB\"\n",
    );
    let output = dir.path().join("effective.toml");

    fieldquote(dir.path())
        .args(["--config", &config, "config", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("price_tolerance_bps = 250"))
        .stdout(predicate::str::contains("prefix = \"JOB\""))
        .stdout(predicate::str::contains("conflict_retries = 1"));

    let written = fs::read_to_string(&output).unwrap();
    assert!(written.contains("[pricing]"));
}

#[test]
fn test_config_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "bad.toml", "[invoicing]\nwidth = 0\n");
    fieldquote(dir.path())
        .args(["--config", &config, "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invoicing.width"));
}
