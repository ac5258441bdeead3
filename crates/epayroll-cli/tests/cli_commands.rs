// crates/epayroll-cli/tests/cli_commands.rs
// ============================================================================
// Module: CLI Command Tests
// Description: End-to-end runs of the `epayroll` binary.
// Purpose: Exercise credential, issue, status, and CUNE commands together.
// Dependencies: epayroll-cli binary, tiny_http, tempfile
// ============================================================================

//! ## Overview
//! Each test writes a config pointing at a `SQLite` store and a `tiny_http`
//! stand-in for the authority, then drives the binary as an operator would.
//! Passwords are passed to the child process environment only.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

use serde_json::Value;
use tiny_http::Header;
use tiny_http::Response;
use tiny_http::Server;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const PASSWORD_VAR: &str = "EPAYROLL_TEST_CREDENTIAL_PASSWORD";
const PASSWORD: &str = "correct horse battery";

fn epayroll_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_epayroll"))
}

fn run(args: &[&str]) -> Output {
    Command::new(epayroll_bin())
        .args(args)
        .env(PASSWORD_VAR, PASSWORD)
        .env_remove("EPAYROLL_CONFIG")
        .output()
        .expect("run epayroll")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "exit {:?}: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json output")
}

/// Authority stand-in that accepts every request.
fn accepting_authority() -> String {
    let server = Server::http("127.0.0.1:0").expect("http server");
    let base = format!("http://{}/api/", server.server_addr());
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let response = Response::from_string(
                r#"{"track_id":"T-1","status":"accepted","code":"00","message":"processed"}"#,
            )
            .with_header(Header::from_bytes("Content-Type", "application/json").unwrap());
            let _ = request.respond(response);
        }
    });
    base
}

fn generate_credential(dir: &Path) -> PathBuf {
    let bundle = dir.join("acme.credential.json");
    let output = run(&[
        "--format",
        "json",
        "credential",
        "generate",
        "--out",
        bundle.to_str().unwrap(),
        "--subject",
        "Acme Payroll S.A.S.",
        "--serial",
        "0001",
        "--password-env",
        PASSWORD_VAR,
        "--iterations",
        "10000",
    ]);
    let value = stdout_json(&output);
    assert_eq!(value["certificate"]["serial"], "0001");
    assert_eq!(value["valid_now"], true);
    bundle
}

fn write_config(dir: &Path, authority: &str, bundle: &Path) -> PathBuf {
    let path = dir.join("epayroll.toml");
    let text = format!(
        r#"
[webhook]
secret = "0123456789abcdef0123456789abcdef"

[authority]
sandbox_url = "{authority}"
request_timeout_ms = 2000

[retry]
max_attempts = 1
initial_backoff_ms = 10
max_backoff_ms = 10

[store]
type = "sqlite"
path = "{store}"

[audit]
sink = "none"

[[organizations]]
organization_id = "acme"
prefix = "NE"
environment = "sandbox"
utc_offset_minutes = -300

[organizations.legal]
employer_tax_id = "900123456"
employer_name = "Acme Payroll S.A.S."
software_id = "sw-001"
software_pin = "75315"

[organizations.credential]
reference = "acme-signing"
bundle_path = "{bundle}"
password_env = "{PASSWORD_VAR}"

[[organizations.numbering]]
start = 1
end = 100
"#,
        store = dir.join("payroll.db").display(),
        bundle = bundle.display(),
    );
    fs::write(&path, text).unwrap();
    path
}

fn write_payroll(dir: &Path) -> PathBuf {
    let path = dir.join("payroll.json");
    let payroll = serde_json::json!({
        "organization_id": "acme",
        "payroll_id": "run-2024-01",
        "employee": {
            "reference": "emp-7",
            "document_type": "CC",
            "document_number": "1020304050",
            "full_name": "Ana María Gómez",
        },
        "period": {
            "reference": "2024-01",
            "start_date": "2024-01-01",
            "end_date": "2024-01-31",
        },
        "earnings": [
            {"kind": "basic", "concept": "Salary", "amount": "2000000", "salarial": true},
        ],
        "deductions": [
            {"kind": "health", "concept": "Health", "percentage": "4", "amount": "80000"},
        ],
        "totals": {"gross": "2000000", "deductions": "80000", "net": "1920000"},
    });
    fs::write(&path, serde_json::to_vec_pretty(&payroll).unwrap()).unwrap();
    path
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn issue_then_inspect_an_accepted_document() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = generate_credential(dir.path());
    let config = write_config(dir.path(), &accepting_authority(), &bundle);
    let config = config.to_str().unwrap();
    let payroll = write_payroll(dir.path());

    let issued = stdout_json(&run(&[
        "--config",
        config,
        "--format",
        "json",
        "issue",
        payroll.to_str().unwrap(),
    ]));
    assert_eq!(issued["document"]["key"], "acme/NE/1");
    assert_eq!(issued["document"]["status"], "accepted");
    assert_eq!(issued["replayed"], false);

    let status =
        stdout_json(&run(&["--config", config, "--format", "json", "status", "acme/NE/1"]));
    assert_eq!(status["status"], "accepted");
    assert_eq!(status["cune"], issued["document"]["cune"]);

    let cune = stdout_json(&run(&["--config", config, "--format", "json", "cune", "acme/NE/1"]));
    assert_eq!(cune["matches"], true);
    assert_eq!(cune["signature"], "valid");
    assert_eq!(cune["computed"], issued["document"]["cune"]);
}

#[test]
fn issue_without_submit_stops_at_signed() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = generate_credential(dir.path());
    let config = write_config(dir.path(), "http://127.0.0.1:9/api/", &bundle);
    let payroll = write_payroll(dir.path());

    let issued = stdout_json(&run(&[
        "--config",
        config.to_str().unwrap(),
        "--format",
        "json",
        "issue",
        payroll.to_str().unwrap(),
        "--no-submit",
    ]));
    assert_eq!(issued["document"]["status"], "signed");
    assert_eq!(issued["document"]["attempt_count"], 0);
}

#[test]
fn unknown_document_and_bad_key_fail() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = generate_credential(dir.path());
    let config = write_config(dir.path(), "http://127.0.0.1:9/api/", &bundle);
    let config = config.to_str().unwrap();

    let missing = run(&["--config", config, "status", "acme/NE/42"]);
    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("document not found"));

    let invalid = run(&["--config", config, "status", "not-a-key"]);
    assert!(!invalid.status.success());
    assert!(String::from_utf8_lossy(&invalid.stderr).contains("invalid document key"));
}

#[test]
fn credential_inspect_reports_wrong_password() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = generate_credential(dir.path());
    let bundle = bundle.to_str().unwrap();

    let inspected = stdout_json(&run(&["--format", "json", "credential", "inspect", bundle]));
    assert_eq!(inspected["certificate"]["subject"], "Acme Payroll S.A.S.");
    assert!(inspected["password_verified"].is_null());

    let output = Command::new(epayroll_bin())
        .args(["credential", "inspect", bundle, "--password-env", PASSWORD_VAR])
        .env(PASSWORD_VAR, "wrong password")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stdout).contains("password_verified: false"));
}

#[test]
fn credential_generate_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = generate_credential(dir.path());
    let output = run(&[
        "credential",
        "generate",
        "--out",
        bundle.to_str().unwrap(),
        "--subject",
        "Acme",
        "--serial",
        "0002",
        "--password-env",
        PASSWORD_VAR,
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--force"));
}

#[test]
fn config_validate_reports_invalid_files() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = generate_credential(dir.path());
    let config = write_config(dir.path(), "http://127.0.0.1:9/api/", &bundle);

    let output = run(&["--config", config.to_str().unwrap(), "config", "validate"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("1 organization(s), store sqlite"));

    let broken = dir.path().join("broken.toml");
    fs::write(&broken, "[server]\nmax_body_bytes = 0\n").unwrap();
    let output = run(&["--config", broken.to_str().unwrap(), "config", "validate"]);
    assert!(!output.status.success());
}
