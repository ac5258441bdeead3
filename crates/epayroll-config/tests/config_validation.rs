// crates/epayroll-config/tests/config_validation.rs
// ============================================================================
// Module: Config Validation Tests
// Description: Fail-closed validation of epayroll.toml and the config service.
// Purpose: Ensure invalid configuration never reaches the pipeline.
// ============================================================================

//! ## Overview
//! Each test starts from a known-good configuration and breaks one field to
//! confirm validation rejects it. Service tests cover reload semantics.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::fs;

use epayroll_config::AuditSinkKind;
use epayroll_config::ConfigError;
use epayroll_config::ConfigService;
use epayroll_config::EpayrollConfig;
use epayroll_config::StoreConfig;
use epayroll_core::Environment;
use epayroll_core::NumberingRange;
use epayroll_core::OrganizationId;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

const VALID: &str = r#"
[server]
bind = "127.0.0.1:9090"
max_body_bytes = 32768

[webhook]
secret = "0123456789abcdef0123"
gap_timeout_ms = 120000

[authority]
sandbox_url = "http://127.0.0.1:8089/api/"
production_url = "https://authority.example/api/"
bearer_token_env = "EPAYROLL_AUTHORITY_TOKEN"

[retry]
max_attempts = 4
initial_backoff_ms = 200
max_backoff_ms = 5000

[store]
type = "sqlite"
path = "data/epayroll.db"
journal_mode = "wal"

[audit]
sink = "file"
path = "logs/audit.jsonl"

[[organizations]]
organization_id = "acme"
prefix = "NE"
environment = "production"
utc_offset_minutes = -300

[organizations.legal]
employer_tax_id = "900123456"
employer_name = "Acme Payroll S.A.S."
software_id = "sw-001"
software_pin = "75315"

[organizations.credential]
reference = "acme-signing"
bundle_path = "secrets/acme.credential.json"
password_env = "ACME_CREDENTIAL_PASSWORD"

[[organizations.numbering]]
start = 1
end = 5000

[[organizations.numbering]]
start = 5001
end = 10000
"#;

fn invalid(text: &str) -> String {
    match EpayrollConfig::from_toml_str(text) {
        Err(ConfigError::Invalid(message)) => message,
        other => panic!("expected invalid config, got {other:?}"),
    }
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

#[test]
fn valid_config_parses_every_section() {
    let config = EpayrollConfig::from_toml_str(VALID).unwrap();
    assert_eq!(config.server.bind_addr().unwrap().port(), 9090);
    assert_eq!(config.webhook.resolve_secret().unwrap(), "0123456789abcdef0123");
    assert_eq!(config.webhook.max_skew_ms, 300_000);
    let authority = config.authority.as_ref().unwrap();
    assert_eq!(authority.production().unwrap().as_str(), "https://authority.example/api/");
    assert_eq!(config.retry.max_attempts, 4);
    assert!(config.retry.jitter);
    assert!(matches!(&config.store, StoreConfig::Sqlite(sqlite) if sqlite.busy_timeout_ms == 5_000));
    assert_eq!(config.audit.sink, AuditSinkKind::File);

    let organization = config.organization(&OrganizationId::new("acme")).unwrap();
    assert_eq!(
        organization.numbering,
        vec![
            NumberingRange {
                start: 1,
                end: 5000,
            },
            NumberingRange {
                start: 5001,
                end: 10000,
            },
        ]
    );
    let profile = organization.profile();
    assert_eq!(profile.environment, Environment::Production);
    assert_eq!(profile.schema_version, "1.0");
    assert_eq!(profile.credential.as_str(), "acme-signing");
}

#[test]
fn empty_config_uses_safe_defaults() {
    let config = EpayrollConfig::from_toml_str("").unwrap();
    assert!(config.server.bind_addr().unwrap().ip().is_loopback());
    assert!(matches!(config.store, StoreConfig::Memory));
    assert_eq!(config.audit.sink, AuditSinkKind::Stderr);
    assert!(config.organizations.is_empty());
    assert!(matches!(config.webhook.resolve_secret(), Err(ConfigError::Invalid(_))));
}

#[test]
fn unknown_fields_are_parse_errors() {
    let err = EpayrollConfig::from_toml_str("[server]\nbind = \"127.0.0.1:1\"\nport = 3\n")
        .unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)), "{err}");
}

#[test]
fn debug_output_redacts_secrets() {
    let config = EpayrollConfig::from_toml_str(VALID).unwrap();
    let rendered = format!("{config:?}");
    assert!(!rendered.contains("0123456789abcdef0123"));
    assert!(!rendered.contains("75315"));
}

// ============================================================================
// SECTION: Validation
// ============================================================================

#[test]
fn weak_or_ambiguous_webhook_secrets_are_rejected() {
    let short = VALID.replace("0123456789abcdef0123", "short");
    assert!(invalid(&short).contains("webhook.secret"));

    let both = VALID.replace(
        "gap_timeout_ms = 120000",
        "gap_timeout_ms = 120000\nsecret_env = \"HOOK_SECRET\"",
    );
    assert!(invalid(&both).contains("mutually exclusive"));

    let missing_env = VALID.replace(
        "secret = \"0123456789abcdef0123\"",
        "secret_env = \"EPAYROLL_TEST_SECRET_THAT_IS_NEVER_SET\"",
    );
    let config = EpayrollConfig::from_toml_str(&missing_env).unwrap();
    assert!(matches!(config.webhook.resolve_secret(), Err(ConfigError::Invalid(_))));
}

#[test]
fn missing_legal_identity_is_rejected() {
    let text = VALID.replace("software_pin = \"75315\"", "software_pin = \"  \"");
    assert!(invalid(&text).contains("legal.software_pin"));
}

#[test]
fn overlapping_numbering_ranges_are_rejected() {
    let text = VALID.replace("start = 5001", "start = 4000");
    assert!(invalid(&text).contains("ascend"));
    let text = VALID.replace("end = 5000", "end = 0");
    assert!(invalid(&text).contains("invalid"));
}

#[test]
fn production_requires_a_secure_production_endpoint() {
    let text = VALID.replace("production_url = \"https://authority.example/api/\"\n", "");
    assert!(invalid(&text).contains("production_url"));

    let text = VALID.replace("https://authority.example/api/", "http://authority.example/api/");
    assert!(invalid(&text).contains("unsupported scheme"));
}

#[test]
fn bad_bind_retry_and_audit_settings_are_rejected() {
    assert!(invalid(&VALID.replace("127.0.0.1:9090", "localhost")).contains("server.bind"));
    assert!(invalid(&VALID.replace("max_attempts = 4", "max_attempts = 0")).contains("max_attempts"));
    assert!(
        invalid(&VALID.replace("initial_backoff_ms = 200", "initial_backoff_ms = 9000"))
            .contains("initial_backoff_ms")
    );
    assert!(invalid(&VALID.replace("path = \"logs/audit.jsonl\"\n", "")).contains("audit.path"));
}

#[test]
fn duplicate_organizations_are_rejected() {
    let start = VALID.find("[[organizations]]").unwrap();
    let text = format!("{VALID}\n{}", &VALID[start..]);
    assert!(invalid(&text).contains("configured twice"));
}

#[test]
fn forbidden_identifier_characters_are_rejected() {
    let text = VALID.replace("prefix = \"NE\"", "prefix = \"N/E\"");
    invalid(&text);
}

// ============================================================================
// SECTION: Service
// ============================================================================

#[test]
fn service_reload_swaps_snapshots_and_keeps_the_last_good_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("epayroll.toml");
    fs::write(&path, VALID).unwrap();

    let service = ConfigService::load(Some(&path)).unwrap();
    let first = service.current();
    let acme = OrganizationId::new("acme");
    assert_eq!(service.profile(&acme).unwrap().prefix.as_str(), "NE");
    assert!(matches!(
        service.profile(&OrganizationId::new("globex")),
        Err(ConfigError::UnknownOrganization(_))
    ));

    fs::write(&path, VALID.replace("prefix = \"NE\"", "prefix = \"NX\"")).unwrap();
    service.reload().unwrap();
    assert_eq!(service.profile(&acme).unwrap().prefix.as_str(), "NX");
    assert_eq!(first.organizations[0].prefix.as_str(), "NE");

    fs::write(&path, "[server]\nmax_body_bytes = 0\n").unwrap();
    assert!(service.reload().is_err());
    assert_eq!(service.profile(&acme).unwrap().prefix.as_str(), "NX");
}

#[test]
fn oversized_and_non_utf8_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.toml");
    fs::write(&path, vec![b'#'; 1024 * 1024 + 1]).unwrap();
    assert!(matches!(ConfigService::load(Some(&path)), Err(ConfigError::Invalid(_))));

    fs::write(&path, [0xff_u8, 0xfe, 0x00]).unwrap();
    assert!(matches!(ConfigService::load(Some(&path)), Err(ConfigError::Invalid(_))));

    let missing = dir.path().join("missing.toml");
    assert!(matches!(ConfigService::load(Some(&missing)), Err(ConfigError::Io(_))));
}
