// crates/epayroll-config/src/config.rs
// ============================================================================
// Module: Electronic Payroll Configuration
// Description: Configuration loading and validation for the payroll pipeline.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: epayroll-core, epayroll-store-sqlite, serde, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Missing or invalid configuration fails closed: a profile with an empty
//! legal field or overlapping numbering ranges never reaches the builder.
//! Secrets are referenced by environment variable name where possible and
//! resolved only when a component needs them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use epayroll_core::ConfigurationProfile;
use epayroll_core::CredentialRef;
use epayroll_core::DocumentPrefix;
use epayroll_core::Environment;
use epayroll_core::LegalIdentity;
use epayroll_core::NumberingRange;
use epayroll_core::OrganizationId;
use epayroll_core::RetryPolicy;
use epayroll_core::validate_identifier_text;
use epayroll_store_sqlite::SqliteStoreConfig;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "epayroll.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "EPAYROLL_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default webhook bind address.
const DEFAULT_BIND: &str = "127.0.0.1:8088";
/// Default maximum webhook body size in bytes.
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;
/// Largest accepted webhook body cap in bytes.
const MAX_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
/// Minimum length of an inline webhook secret in bytes.
pub const MIN_WEBHOOK_SECRET_BYTES: usize = 16;
/// Default accepted clock skew for webhook timestamps.
const DEFAULT_MAX_SKEW_MS: u64 = 300_000;
/// Largest accepted clock skew for webhook timestamps.
const MAX_MAX_SKEW_MS: u64 = 3_600_000;
/// Default wait before a sequence gap is reconciled.
const DEFAULT_GAP_TIMEOUT_MS: u64 = 600_000;
/// Default interval between reconciliation passes.
const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 60_000;
/// Smallest accepted reconciliation interval.
const MIN_RECONCILE_INTERVAL_MS: u64 = 1_000;
/// Default authority request timeout.
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Default authority connect timeout.
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Largest accepted authority timeout.
const MAX_AUTHORITY_TIMEOUT_MS: u64 = 300_000;
/// Default authority response cap in bytes.
const DEFAULT_MAX_RESPONSE_BYTES: usize = 256 * 1024;
/// Default schema version stamped on documents.
const DEFAULT_SCHEMA_VERSION: &str = "1.0";
/// Smallest accepted UTC offset in minutes.
const MIN_UTC_OFFSET_MINUTES: i16 = -720;
/// Largest accepted UTC offset in minutes.
const MAX_UTC_OFFSET_MINUTES: i16 = 840;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Electronic payroll configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EpayrollConfig {
    /// Webhook server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Webhook authentication and reconciliation.
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Authority endpoints.
    #[serde(default)]
    pub authority: Option<AuthorityConfig>,
    /// Submission retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Persistence backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// Audit sink.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Organization profiles.
    #[serde(default)]
    pub organizations: Vec<OrganizationConfig>,
}

impl EpayrollConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        Self::load_resolved(&resolved)
    }

    /// Loads configuration from an already resolved path.
    pub(crate) fn load_resolved(path: &Path) -> Result<Self, ConfigError> {
        check_path("config path", path)?;
        let file = fs::File::open(path).map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        let mut bytes = Vec::new();
        file.take(u64::try_from(MAX_CONFIG_FILE_SIZE).unwrap_or(u64::MAX).saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = String::from_utf8(bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.webhook.validate()?;
        if let Some(authority) = &self.authority {
            authority.validate()?;
        }
        validate_retry(&self.retry)?;
        self.store.validate()?;
        self.audit.validate()?;
        for (index, organization) in self.organizations.iter().enumerate() {
            organization.validate()?;
            if self.organizations[..index]
                .iter()
                .any(|other| other.organization_id == organization.organization_id)
            {
                return Err(ConfigError::Invalid(format!(
                    "organization {} is configured twice",
                    organization.organization_id
                )));
            }
            if organization.environment == Environment::Production
                && self.authority.as_ref().is_none_or(|authority| authority.production_url.is_none())
            {
                return Err(ConfigError::Invalid(format!(
                    "organization {} targets production but authority.production_url is not set",
                    organization.organization_id
                )));
            }
        }
        Ok(())
    }

    /// Returns the organization entry for `organization_id`.
    #[must_use]
    pub fn organization(&self, organization_id: &OrganizationId) -> Option<&OrganizationConfig> {
        self.organizations
            .iter()
            .find(|organization| organization.organization_id == *organization_id)
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Webhook HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    /// Returns the parsed bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid("server.bind is not a socket address".to_string()))
    }

    /// Validates server configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.max_body_bytes == 0 || self.max_body_bytes > MAX_MAX_BODY_BYTES {
            return Err(ConfigError::Invalid(format!(
                "server.max_body_bytes must be between 1 and {MAX_MAX_BODY_BYTES}"
            )));
        }
        Ok(())
    }
}

/// Default bind address.
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

/// Default webhook body cap.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

// ============================================================================
// SECTION: Webhook
// ============================================================================

/// Webhook authentication and reconciliation settings.
///
/// # Invariants
/// - At most one of `secret` and `secret_env` is set.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Inline shared secret.
    #[serde(default)]
    pub secret: Option<String>,
    /// Environment variable holding the shared secret.
    #[serde(default)]
    pub secret_env: Option<String>,
    /// Accepted clock skew for delivery timestamps.
    #[serde(default = "default_max_skew_ms")]
    pub max_skew_ms: u64,
    /// Wait before a sequence gap is reconciled against the authority.
    #[serde(default = "default_gap_timeout_ms")]
    pub gap_timeout_ms: u64,
    /// Interval between reconciliation passes.
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            secret_env: None,
            max_skew_ms: DEFAULT_MAX_SKEW_MS,
            gap_timeout_ms: DEFAULT_GAP_TIMEOUT_MS,
            reconcile_interval_ms: DEFAULT_RECONCILE_INTERVAL_MS,
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("secret_env", &self.secret_env)
            .field("max_skew_ms", &self.max_skew_ms)
            .field("gap_timeout_ms", &self.gap_timeout_ms)
            .field("reconcile_interval_ms", &self.reconcile_interval_ms)
            .finish()
    }
}

impl WebhookConfig {
    /// Resolves the shared secret from the inline value or the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when no secret is configured, the
    /// environment variable is unset, or the secret is too short.
    pub fn resolve_secret(&self) -> Result<String, ConfigError> {
        let secret = match (&self.secret, &self.secret_env) {
            (Some(secret), None) => secret.clone(),
            (None, Some(name)) => env::var(name).map_err(|_| {
                ConfigError::Invalid(format!("webhook secret variable {name} is not set"))
            })?,
            _ => {
                return Err(ConfigError::Invalid(
                    "webhook requires exactly one of secret or secret_env".to_string(),
                ));
            }
        };
        if secret.len() < MIN_WEBHOOK_SECRET_BYTES {
            return Err(ConfigError::Invalid(format!(
                "webhook secret must be at least {MIN_WEBHOOK_SECRET_BYTES} bytes"
            )));
        }
        Ok(secret)
    }

    /// Validates webhook configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_some() && self.secret_env.is_some() {
            return Err(ConfigError::Invalid(
                "webhook.secret and webhook.secret_env are mutually exclusive".to_string(),
            ));
        }
        if let Some(secret) = &self.secret
            && secret.len() < MIN_WEBHOOK_SECRET_BYTES
        {
            return Err(ConfigError::Invalid(format!(
                "webhook.secret must be at least {MIN_WEBHOOK_SECRET_BYTES} bytes"
            )));
        }
        if let Some(name) = &self.secret_env {
            validate_env_name("webhook.secret_env", name)?;
        }
        if self.max_skew_ms == 0 || self.max_skew_ms > MAX_MAX_SKEW_MS {
            return Err(ConfigError::Invalid(format!(
                "webhook.max_skew_ms must be between 1 and {MAX_MAX_SKEW_MS}"
            )));
        }
        if self.gap_timeout_ms == 0 {
            return Err(ConfigError::Invalid("webhook.gap_timeout_ms must be positive".to_string()));
        }
        if self.reconcile_interval_ms < MIN_RECONCILE_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "webhook.reconcile_interval_ms must be at least {MIN_RECONCILE_INTERVAL_MS}"
            )));
        }
        Ok(())
    }
}

/// Default accepted clock skew.
const fn default_max_skew_ms() -> u64 {
    DEFAULT_MAX_SKEW_MS
}

/// Default gap timeout.
const fn default_gap_timeout_ms() -> u64 {
    DEFAULT_GAP_TIMEOUT_MS
}

/// Default reconciliation interval.
const fn default_reconcile_interval_ms() -> u64 {
    DEFAULT_RECONCILE_INTERVAL_MS
}

// ============================================================================
// SECTION: Authority
// ============================================================================

/// Authority endpoints and client limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorityConfig {
    /// Sandbox base URL.
    pub sandbox_url: String,
    /// Production base URL.
    #[serde(default)]
    pub production_url: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Connection establishment timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Environment variable holding a bearer token.
    #[serde(default)]
    pub bearer_token_env: Option<String>,
    /// Maximum response body size in bytes.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

impl AuthorityConfig {
    /// Returns the parsed sandbox URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the URL is malformed.
    pub fn sandbox(&self) -> Result<Url, ConfigError> {
        parse_base_url("authority.sandbox_url", &self.sandbox_url, false)
    }

    /// Returns the parsed production URL, falling back to the sandbox URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a URL is malformed.
    pub fn production(&self) -> Result<Url, ConfigError> {
        match &self.production_url {
            Some(url) => parse_base_url("authority.production_url", url, true),
            None => self.sandbox(),
        }
    }

    /// Resolves the bearer token, when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the named variable is unset.
    pub fn resolve_bearer_token(&self) -> Result<Option<String>, ConfigError> {
        self.bearer_token_env
            .as_ref()
            .map(|name| {
                env::var(name).map_err(|_| {
                    ConfigError::Invalid(format!("bearer token variable {name} is not set"))
                })
            })
            .transpose()
    }

    /// Validates authority configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        self.sandbox()?;
        self.production()?;
        for (field, value) in [
            ("authority.request_timeout_ms", self.request_timeout_ms),
            ("authority.connect_timeout_ms", self.connect_timeout_ms),
        ] {
            if value == 0 || value > MAX_AUTHORITY_TIMEOUT_MS {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be between 1 and {MAX_AUTHORITY_TIMEOUT_MS}"
                )));
            }
        }
        if self.max_response_bytes == 0 {
            return Err(ConfigError::Invalid(
                "authority.max_response_bytes must be positive".to_string(),
            ));
        }
        if let Some(name) = &self.bearer_token_env {
            validate_env_name("authority.bearer_token_env", name)?;
        }
        Ok(())
    }
}

/// Default request timeout.
const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// Default connect timeout.
const fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Default response cap.
const fn default_max_response_bytes() -> usize {
    DEFAULT_MAX_RESPONSE_BYTES
}

/// Parses a base URL, requiring https when `require_https` is set.
fn parse_base_url(field: &str, value: &str, require_https: bool) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim())
        .map_err(|err| ConfigError::Invalid(format!("{field} is not a url: {err}")))?;
    match url.scheme() {
        "https" => {}
        "http" if !require_https => {}
        scheme => {
            return Err(ConfigError::Invalid(format!("{field} has unsupported scheme {scheme}")));
        }
    }
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(ConfigError::Invalid(format!("{field} must be an absolute base url")));
    }
    Ok(url)
}

// ============================================================================
// SECTION: Retry
// ============================================================================

/// Validates the retry policy.
fn validate_retry(policy: &RetryPolicy) -> Result<(), ConfigError> {
    if policy.max_attempts == 0 {
        return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".to_string()));
    }
    if policy.multiplier == 0 {
        return Err(ConfigError::Invalid("retry.multiplier must be at least 1".to_string()));
    }
    if policy.initial_backoff_ms > policy.max_backoff_ms {
        return Err(ConfigError::Invalid(
            "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Persistence backend selection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local in-memory stores.
    #[default]
    Memory,
    /// `SQLite` database file.
    Sqlite(SqliteStoreConfig),
}

impl StoreConfig {
    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Memory => Ok(()),
            Self::Sqlite(config) => check_path("store.path", &config.path),
        }
    }
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// Append-only JSON lines file.
    File,
    /// Discard events.
    None,
}

/// Audit configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Sink kind.
    #[serde(default)]
    pub sink: AuditSinkKind,
    /// File path for the `file` sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (AuditSinkKind::File, None) => {
                Err(ConfigError::Invalid("audit.path is required for the file sink".to_string()))
            }
            (AuditSinkKind::File, Some(path)) => {
                check_path("audit.path", path)
            }
            (_, Some(_)) => {
                Err(ConfigError::Invalid("audit.path is only valid for the file sink".to_string()))
            }
            (_, None) => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: Organizations
// ============================================================================

/// Signing credential location.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialConfig {
    /// Credential reference stored on documents.
    pub reference: String,
    /// Sealed credential bundle file.
    pub bundle_path: PathBuf,
    /// Environment variable holding the bundle password.
    pub password_env: String,
}

impl CredentialConfig {
    /// Resolves the bundle password from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the variable is unset.
    pub fn resolve_password(&self) -> Result<String, ConfigError> {
        env::var(&self.password_env).map_err(|_| {
            ConfigError::Invalid(format!("credential password variable {} is not set", self.password_env))
        })
    }

    /// Validates credential configuration.
    fn validate(&self, organization: &str) -> Result<(), ConfigError> {
        if self.reference.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "organization {organization} credential.reference must be non-empty"
            )));
        }
        check_path("credential.bundle_path", &self.bundle_path)?;
        validate_env_name("credential.password_env", &self.password_env)
    }
}

/// One organization's configuration profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrganizationConfig {
    /// Organization identifier.
    pub organization_id: OrganizationId,
    /// Numbering prefix.
    pub prefix: DocumentPrefix,
    /// Target environment.
    pub environment: Environment,
    /// Fixed UTC offset for issue dates and times.
    #[serde(default)]
    pub utc_offset_minutes: i16,
    /// Schema version stamped on documents.
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Legal identity.
    pub legal: LegalIdentity,
    /// Signing credential.
    pub credential: CredentialConfig,
    /// Authorized numbering ranges, ascending.
    #[serde(default)]
    pub numbering: Vec<NumberingRange>,
}

impl OrganizationConfig {
    /// Returns the configuration profile consumed by the pipeline.
    #[must_use]
    pub fn profile(&self) -> ConfigurationProfile {
        ConfigurationProfile {
            organization_id: self.organization_id.clone(),
            prefix: self.prefix.clone(),
            legal: self.legal.clone(),
            credential: CredentialRef::new(self.credential.reference.clone()),
            environment: self.environment,
            utc_offset_minutes: self.utc_offset_minutes,
            schema_version: self.schema_version.clone(),
        }
    }

    /// Validates one organization entry.
    fn validate(&self) -> Result<(), ConfigError> {
        let organization = self.organization_id.as_str();
        validate_identifier_text("organization id", organization)
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        validate_identifier_text("document prefix", self.prefix.as_str())
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if let Some(field) = self.legal.first_missing_field() {
            return Err(ConfigError::Invalid(format!(
                "organization {organization} legal.{field} must be non-empty"
            )));
        }
        if !(MIN_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&self.utc_offset_minutes) {
            return Err(ConfigError::Invalid(format!(
                "organization {organization} utc_offset_minutes out of range"
            )));
        }
        if self.schema_version.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "organization {organization} schema_version must be non-empty"
            )));
        }
        self.credential.validate(organization)?;
        let mut previous: Option<NumberingRange> = None;
        for range in &self.numbering {
            if !range.is_valid() {
                return Err(ConfigError::Invalid(format!(
                    "organization {organization} numbering range {}..={} is invalid",
                    range.start, range.end
                )));
            }
            if let Some(last) = previous
                && range.start <= last.end
            {
                return Err(ConfigError::Invalid(format!(
                    "organization {organization} numbering ranges must ascend without overlap"
                )));
            }
            previous = Some(*range);
        }
        Ok(())
    }
}

/// Default schema version.
fn default_schema_version() -> String {
    DEFAULT_SCHEMA_VERSION.to_string()
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// No profile exists for the organization.
    #[error("unknown organization: {0}")]
    UnknownOrganization(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Picks the config file: explicit flag, then `EPAYROLL_CONFIG`, then the
/// working-directory default.
pub(crate) fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let resolved = match path {
        Some(path) => path.to_path_buf(),
        None => env::var_os(CONFIG_ENV_VAR)
            .filter(|value| !value.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_NAME), PathBuf::from),
    };
    check_path("config path", &resolved)?;
    Ok(resolved)
}

/// Enforces length limits on a configured path.
fn check_path(field: &str, path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    if path.components().any(|component| component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH) {
        return Err(ConfigError::Invalid(format!("{field} has an overlong component")));
    }
    Ok(())
}

/// Validates an environment variable name.
fn validate_env_name(field: &str, name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && !name.starts_with(|ch: char| ch.is_ascii_digit())
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{field} is not a valid environment variable name")))
    }
}
