// crates/epayroll-cli/src/services.rs
// ============================================================================
// Module: CLI Service Assembly
// Description: Builds stores, signer, transport, and pipeline from config.
// Purpose: Keep command handlers free of wiring and backend selection.
// Dependencies: epayroll-config, epayroll-core, epayroll-signer,
//               epayroll-store-sqlite, epayroll-transport
// ============================================================================

//! ## Overview
//! [`PayrollServices`] is the fully wired pipeline used by commands that talk
//! to the authority. [`PayrollStores`] opens only the persistence backends,
//! for read-only commands that must work without credentials or network
//! configuration.
//!
//! Security posture: credential passwords and bearer tokens are read from the
//! environment variables named in configuration and never echoed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use epayroll_config::AuditConfig;
use epayroll_config::AuditSinkKind;
use epayroll_config::AuthorityConfig;
use epayroll_config::ConfigError;
use epayroll_config::EpayrollConfig;
use epayroll_config::StoreConfig;
use epayroll_core::Clock;
use epayroll_core::ConfigurationProfile;
use epayroll_core::CredentialRef;
use epayroll_core::NumberingStore;
use epayroll_core::OrganizationId;
use epayroll_core::PayrollPipeline;
use epayroll_core::PayrollPipelineParams;
use epayroll_core::SharedAuditSink;
use epayroll_core::TransportError;
use epayroll_core::runtime::FileAuditSink;
use epayroll_core::runtime::InMemoryDocumentStore;
use epayroll_core::runtime::InMemoryNumberingStore;
use epayroll_core::runtime::InMemoryWebhookEventStore;
use epayroll_core::runtime::NoopAuditSink;
use epayroll_core::runtime::SharedDocumentStore;
use epayroll_core::runtime::SharedNumberingStore;
use epayroll_core::runtime::SharedWebhookEventStore;
use epayroll_core::runtime::StderrAuditSink;
use epayroll_core::runtime::SystemClock;
use epayroll_core::runtime::ThreadSleeper;
use epayroll_signer::CertificateRecord;
use epayroll_signer::CredentialBundle;
use epayroll_signer::CredentialError;
use epayroll_signer::CredentialVault;
use epayroll_store_sqlite::SqlitePayrollStore;
use epayroll_store_sqlite::SqliteStoreError;
use epayroll_transport::AuthorityEndpoints;
use epayroll_transport::HttpAuthorityTransport;
use epayroll_transport::HttpTransportConfig;
use thiserror::Error;

// ============================================================================
// SECTION: Stores
// ============================================================================

/// Persistence backends selected by `[store]`.
#[derive(Clone)]
pub struct PayrollStores {
    /// Document store.
    pub documents: SharedDocumentStore,
    /// Numbering store.
    pub numbering: SharedNumberingStore,
    /// Webhook event store.
    pub events: SharedWebhookEventStore,
}

impl PayrollStores {
    /// Opens the configured backend and registers every numbering range.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError`] when the backend cannot be opened or a range
    /// conflicts with one already registered.
    pub fn open(config: &EpayrollConfig) -> Result<Self, ServicesError> {
        let stores = match &config.store {
            StoreConfig::Memory => Self {
                documents: SharedDocumentStore::from_store(InMemoryDocumentStore::new()),
                numbering: SharedNumberingStore::from_store(InMemoryNumberingStore::new()),
                events: SharedWebhookEventStore::from_store(InMemoryWebhookEventStore::new()),
            },
            StoreConfig::Sqlite(sqlite) => {
                let store = SqlitePayrollStore::open(sqlite)?;
                Self {
                    documents: SharedDocumentStore::from_store(store.clone()),
                    numbering: SharedNumberingStore::from_store(store.clone()),
                    events: SharedWebhookEventStore::from_store(store),
                }
            }
        };
        for organization in &config.organizations {
            for range in &organization.numbering {
                stores
                    .numbering
                    .register_range(&organization.organization_id, &organization.prefix, *range)
                    .map_err(|err| {
                        ServicesError::Numbering(format!(
                            "{}/{}: {err}",
                            organization.organization_id, organization.prefix
                        ))
                    })?;
            }
        }
        Ok(stores)
    }
}

// ============================================================================
// SECTION: Services
// ============================================================================

/// Fully wired pipeline and its collaborators.
pub struct PayrollServices {
    /// Pipeline orchestrator.
    pub pipeline: Arc<PayrollPipeline>,
    /// Persistence backends.
    pub stores: PayrollStores,
    /// Audit sink shared by the pipeline and the webhook server.
    pub audit: SharedAuditSink,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
}

impl PayrollServices {
    /// Builds every collaborator named by configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError`] when a backend, credential, or the authority
    /// transport cannot be initialized.
    pub fn from_config(config: &EpayrollConfig) -> Result<Self, ServicesError> {
        let stores = PayrollStores::open(config)?;
        let audit = audit_sink(&config.audit)?;
        let authority = config
            .authority
            .as_ref()
            .ok_or_else(|| ServicesError::Config("[authority] section is required".to_string()))?;
        let transport = http_transport(authority)?;
        let signer = credential_vault(config)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let pipeline = PayrollPipeline::new(PayrollPipelineParams {
            documents: stores.documents.clone(),
            numbering: stores.numbering.clone(),
            signer: Arc::new(signer),
            transport: Arc::new(transport),
            clock: Arc::clone(&clock),
            sleeper: Arc::new(ThreadSleeper),
            audit: Arc::clone(&audit),
            retry: config.retry.clone(),
        });
        Ok(Self {
            pipeline: Arc::new(pipeline),
            stores,
            audit,
            clock,
        })
    }
}

/// Returns the profile configured for `organization_id`.
///
/// # Errors
///
/// Returns [`ServicesError::Config`] when the organization is unknown.
pub fn profile_for(
    config: &EpayrollConfig,
    organization_id: &OrganizationId,
) -> Result<ConfigurationProfile, ServicesError> {
    config
        .organization(organization_id)
        .map(epayroll_config::OrganizationConfig::profile)
        .ok_or_else(|| {
            ServicesError::Config(
                ConfigError::UnknownOrganization(organization_id.to_string()).to_string(),
            )
        })
}

/// Reads the public certificate of an organization's credential bundle.
///
/// No password is needed; the certificate is stored in clear.
///
/// # Errors
///
/// Returns [`ServicesError`] when the organization is unknown or the bundle
/// cannot be read.
pub fn certificate_for(
    config: &EpayrollConfig,
    organization_id: &OrganizationId,
) -> Result<CertificateRecord, ServicesError> {
    let organization = config.organization(organization_id).ok_or_else(|| {
        ServicesError::Config(
            ConfigError::UnknownOrganization(organization_id.to_string()).to_string(),
        )
    })?;
    Ok(CredentialBundle::read_from(&organization.credential.bundle_path)?.certificate)
}

// ============================================================================
// SECTION: Builders
// ============================================================================

/// Builds the configured audit sink.
///
/// # Errors
///
/// Returns [`ServicesError::Audit`] when the audit file cannot be opened.
pub fn audit_sink(config: &AuditConfig) -> Result<SharedAuditSink, ServicesError> {
    match config.sink {
        AuditSinkKind::Stderr => Ok(Arc::new(StderrAuditSink)),
        AuditSinkKind::None => Ok(Arc::new(NoopAuditSink)),
        AuditSinkKind::File => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| ServicesError::Audit("audit.path is required".to_string()))?;
            let sink = FileAuditSink::new(path)
                .map_err(|err| ServicesError::Audit(format!("{}: {err}", path.display())))?;
            Ok(Arc::new(sink))
        }
    }
}

/// Builds the HTTP authority transport.
fn http_transport(config: &AuthorityConfig) -> Result<HttpAuthorityTransport, ServicesError> {
    let endpoints = AuthorityEndpoints {
        sandbox: config.sandbox()?,
        production: config.production()?,
    };
    let mut transport = HttpTransportConfig::new(endpoints);
    transport.request_timeout = Duration::from_millis(config.request_timeout_ms);
    transport.connect_timeout = Duration::from_millis(config.connect_timeout_ms);
    transport.max_response_bytes = config.max_response_bytes;
    transport.bearer_token = config.resolve_bearer_token()?;
    HttpAuthorityTransport::new(transport).map_err(ServicesError::Transport)
}

/// Opens every organization credential into a vault.
fn credential_vault(config: &EpayrollConfig) -> Result<CredentialVault, ServicesError> {
    let mut vault = CredentialVault::new();
    for organization in &config.organizations {
        let credential = &organization.credential;
        let reference = CredentialRef::new(credential.reference.as_str());
        if vault.certificate(&reference).is_some() {
            continue;
        }
        let password = credential.resolve_password()?;
        vault.register_file(&reference, &credential.bundle_path, password).map_err(|err| {
            ServicesError::Credential(format!("{}: {err}", credential.reference))
        })?;
    }
    Ok(vault)
}

// ============================================================================
// SECTION: Bounded Reads
// ============================================================================

/// Errors raised by bounded file reads.
#[derive(Debug, Error)]
pub enum ReadLimitError {
    /// I/O failure while reading.
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    /// File exceeds the limit.
    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge {
        /// Observed size in bytes.
        size: u64,
        /// Allowed size in bytes.
        limit: usize,
    },
}

/// Reads a file, refusing anything larger than `max_bytes`.
///
/// # Errors
///
/// Returns [`ReadLimitError`] when the file cannot be read or is too large.
pub fn read_bytes_with_limit(path: &Path, max_bytes: usize) -> Result<Vec<u8>, ReadLimitError> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if size > limit {
        return Err(ReadLimitError::TooLarge {
            size,
            limit: max_bytes,
        });
    }
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes)?;
    if bytes.len() > max_bytes {
        return Err(ReadLimitError::TooLarge {
            size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            limit: max_bytes,
        });
    }
    Ok(bytes)
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Service assembly errors.
#[derive(Debug, Error)]
pub enum ServicesError {
    /// Configuration is incomplete or inconsistent.
    #[error("config error: {0}")]
    Config(String),
    /// Store backend failed to open.
    #[error("store error: {0}")]
    Store(String),
    /// Numbering range registration failed.
    #[error("numbering error: {0}")]
    Numbering(String),
    /// Credential could not be opened.
    #[error("credential error: {0}")]
    Credential(String),
    /// Authority transport could not be built.
    #[error("transport error: {0}")]
    Transport(TransportError),
    /// Audit sink could not be opened.
    #[error("audit error: {0}")]
    Audit(String),
}

impl From<ConfigError> for ServicesError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

impl From<SqliteStoreError> for ServicesError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Store(error.to_string())
    }
}

impl From<CredentialError> for ServicesError {
    fn from(error: CredentialError) -> Self {
        Self::Credential(error.to_string())
    }
}
