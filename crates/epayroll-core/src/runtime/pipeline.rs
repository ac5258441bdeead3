// crates/epayroll-core/src/runtime/pipeline.rs
// ============================================================================
// Module: Payroll Pipeline
// Description: Orchestrates build, serialize, sign, submit, and follow-up work.
// Purpose: Provide the single entry point callers use to drive documents.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The pipeline composes the builder, serializer, signer, and transmission
//! client. Every stage loads the document, applies one lifecycle step, and
//! persists the result before returning, so a crash between stages leaves
//! the document in the last reported status.
//!
//! Distinct documents share nothing except the numbering store; callers may
//! drive them from many threads through one pipeline. The software PIN and
//! credential material are inputs only and never appear in audit events.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use thiserror::Error;

use crate::core::ConfigurationProfile;
use crate::core::DocumentError;
use crate::core::DocumentKey;
use crate::core::DocumentSeal;
use crate::core::DocumentStatus;
use crate::core::DocumentStatusView;
use crate::core::ElectronicPayrollDocument;
use crate::core::InvalidTransition;
use crate::core::OrganizationId;
use crate::core::PayrollRecord;
use crate::core::TimeError;
use crate::interfaces::AuthorityTransport;
use crate::interfaces::Clock;
use crate::interfaces::DocumentSigner;
use crate::interfaces::DocumentStore;
use crate::interfaces::SignError;
use crate::interfaces::SignRequest;
use crate::interfaces::Sleeper;
use crate::interfaces::StoreError;
use crate::runtime::audit::PipelineAuditEvent;
use crate::runtime::audit::SharedAuditSink;
use crate::runtime::builder::AdjustmentRequest;
use crate::runtime::builder::BuildError;
use crate::runtime::builder::DocumentBuilder;
use crate::runtime::cune::compute_cune;
use crate::runtime::retry::RetryPolicy;
use crate::runtime::serializer::SerializeError;
use crate::runtime::serializer::render_signed;
use crate::runtime::serializer::serialize_document;
use crate::runtime::store::SharedDocumentStore;
use crate::runtime::store::SharedNumberingStore;
use crate::runtime::transmission::SubmissionOutcome;
use crate::runtime::transmission::SubmitOptions;
use crate::runtime::transmission::TransmissionClient;
use crate::runtime::transmission::TransmissionClientParams;
use crate::runtime::transmission::TransmissionError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Pipeline errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Document building failed.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// Serialization failed.
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    /// Signing failed.
    #[error(transparent)]
    Sign(#[from] SignError),
    /// Transmission failed.
    #[error(transparent)]
    Transmission(#[from] TransmissionError),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Document mutation was rejected.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// Lifecycle transition was rejected.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    /// CUNE inputs could not be rendered.
    #[error(transparent)]
    Time(#[from] TimeError),
    /// Document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),
    /// Profile belongs to another organization than the document.
    #[error("document {document} cannot use the profile of organization {profile}")]
    OrganizationMismatch {
        /// Document key.
        document: String,
        /// Organization on the profile.
        profile: String,
    },
    /// Stage is not valid in the document's status.
    #[error("cannot {operation} document {document} in status {status}")]
    InvalidState {
        /// Document key.
        document: String,
        /// Current status.
        status: DocumentStatus,
        /// Requested operation.
        operation: &'static str,
    },
}

impl PipelineError {
    /// Returns true when retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transmission(
                TransmissionError::Timeout {
                    ..
                }
                | TransmissionError::Exhausted {
                    ..
                },
            )
            | Self::Store(StoreError::Conflict(_)) => true,
            Self::Transmission(TransmissionError::Transport(err)) => err.is_transient(),
            _ => false,
        }
    }
}

// ============================================================================
// SECTION: Options
// ============================================================================

/// Options for a retry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySweepOptions {
    /// Also resubmit documents in `Failed` (operator intent).
    pub include_failed: bool,
    /// Resubmit `Submitting` documents whose last attempt is older than this.
    pub stale_submitting_after_ms: Option<u64>,
    /// Per-document submission deadline.
    pub deadline_ms: Option<u64>,
}

/// Result of one document within a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepEntry {
    /// Document key.
    pub document: DocumentKey,
    /// Status view after the attempt, or the failure.
    pub result: Result<DocumentStatusView, PipelineError>,
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Construction parameters for [`PayrollPipeline`].
pub struct PayrollPipelineParams {
    /// Document store.
    pub documents: SharedDocumentStore,
    /// Numbering store.
    pub numbering: SharedNumberingStore,
    /// Document signer.
    pub signer: Arc<dyn DocumentSigner + Send + Sync>,
    /// Authority transport.
    pub transport: Arc<dyn AuthorityTransport + Send + Sync>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Delay provider between retries.
    pub sleeper: Arc<dyn Sleeper>,
    /// Audit sink.
    pub audit: SharedAuditSink,
    /// Retry policy.
    pub retry: RetryPolicy,
}

/// Electronic payroll document pipeline.
pub struct PayrollPipeline {
    /// Draft builder.
    builder: DocumentBuilder,
    /// Transmission client, shared with the webhook reconciler.
    transmission: Arc<TransmissionClient>,
    /// Document signer.
    signer: Arc<dyn DocumentSigner + Send + Sync>,
    /// Document store.
    documents: SharedDocumentStore,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Audit sink.
    audit: SharedAuditSink,
}

impl PayrollPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(params: PayrollPipelineParams) -> Self {
        let transmission = Arc::new(TransmissionClient::new(TransmissionClientParams {
            transport: params.transport,
            store: params.documents.clone(),
            clock: Arc::clone(&params.clock),
            sleeper: params.sleeper,
            audit: Arc::clone(&params.audit),
            policy: params.retry,
        }));
        Self {
            builder: DocumentBuilder::new(
                params.numbering,
                params.documents.clone(),
                Arc::clone(&params.clock),
                Arc::clone(&params.audit),
            ),
            transmission,
            signer: params.signer,
            documents: params.documents,
            clock: params.clock,
            audit: params.audit,
        }
    }

    /// Returns the transmission client for reconciliation wiring.
    #[must_use]
    pub fn transmission(&self) -> Arc<TransmissionClient> {
        Arc::clone(&self.transmission)
    }

    /// Builds a draft document from a payroll record.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Build`] when validation or numbering fails.
    pub fn build(
        &self,
        payroll: &PayrollRecord,
        profile: &ConfigurationProfile,
    ) -> Result<DocumentKey, PipelineError> {
        Ok(self.builder.build(payroll, profile)?.key)
    }

    /// Builds a draft adjustment document.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Build`] when the request is invalid.
    pub fn build_adjustment(
        &self,
        request: &AdjustmentRequest,
        profile: &ConfigurationProfile,
    ) -> Result<DocumentKey, PipelineError> {
        Ok(self.builder.build_adjustment(request, profile)?.key)
    }

    /// Serializes a document and returns its canonical bytes.
    ///
    /// Serializing a `Draft` records the bytes and moves it to `Generated`;
    /// later calls return the stored bytes after checking they still match.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the document is missing, rendering
    /// fails, or persistence fails.
    pub fn serialize(&self, key: &DocumentKey) -> Result<Vec<u8>, PipelineError> {
        let mut document = self.load(key)?;
        let was_draft = document.status() == DocumentStatus::Draft;
        let now = self.clock.now();
        let bytes = serialize_document(&mut document, now)?;
        if was_draft {
            document.advance_revision();
            self.documents.update(&document)?;
            let mut event = PipelineAuditEvent::new("document_serialized", now)
                .document(key)
                .status(document.status());
            if let Some(hash) = document.canonical_hash() {
                event = event.message(format!("{}:{}", hash.algorithm.as_str(), hash.value));
            }
            self.audit.record(&event);
        }
        Ok(bytes)
    }

    /// Computes the CUNE, signs the canonical bytes, and embeds both.
    ///
    /// An `InvalidCredential` failure moves the document to `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Document`] with `AlreadySigned` for documents
    /// that already carry a seal, and other variants when signing fails.
    pub fn sign(
        &self,
        key: &DocumentKey,
        profile: &ConfigurationProfile,
    ) -> Result<DocumentStatusView, PipelineError> {
        ensure_profile_matches(key, profile)?;
        let mut document = self.load(key)?;
        if document.signature().is_some() {
            return Err(DocumentError::AlreadySigned(key.to_string()).into());
        }
        if document.status() != DocumentStatus::Generated {
            return Err(invalid_state(&document, "sign"));
        }
        let Some(canonical) = document.canonical_bytes().map(<[u8]>::to_vec) else {
            return Err(SerializeError::MissingCanonical(key.to_string()).into());
        };
        let cune = compute_cune(&document, &profile.legal.software_pin)?;
        let now = self.clock.now();
        let signature = match self.signer.sign(&SignRequest {
            credential: &profile.credential,
            canonical_bytes: &canonical,
            signing_time: now,
        }) {
            Ok(signature) => signature,
            Err(err @ SignError::InvalidCredential(_)) => {
                document.transition(DocumentStatus::Failed, now, err.to_string())?;
                document.advance_revision();
                self.documents.update(&document)?;
                self.audit.record(
                    &PipelineAuditEvent::new("document_signed", now)
                        .document(key)
                        .status(DocumentStatus::Failed)
                        .message(err.to_string()),
                );
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };
        let xml_signed = render_signed(&document, &cune, &signature)?;
        document.record_seal(DocumentSeal {
            cune,
            signature,
            xml_signed,
        })?;
        document.transition(DocumentStatus::Signed, now, "signed")?;
        document.advance_revision();
        self.documents.update(&document)?;
        self.audit.record(
            &PipelineAuditEvent::new("document_signed", now)
                .document(key)
                .status(DocumentStatus::Signed)
                .message(document.cune().unwrap_or_default()),
        );
        Ok(document.status_view())
    }

    /// Submits a signed document.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Transmission`] when submission fails.
    pub fn submit(
        &self,
        key: &DocumentKey,
        options: &SubmitOptions,
    ) -> Result<SubmissionOutcome, PipelineError> {
        Ok(self.transmission.submit(key, options)?)
    }

    /// Runs build, serialize, sign, and submit for one payroll record.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure. Stages that completed stay persisted.
    pub fn process(
        &self,
        payroll: &PayrollRecord,
        profile: &ConfigurationProfile,
        options: &SubmitOptions,
    ) -> Result<SubmissionOutcome, PipelineError> {
        let key = self.build(payroll, profile)?;
        self.drive(&key, profile, options)
    }

    /// Runs serialize, sign, and submit for an existing document.
    ///
    /// Stages already completed are skipped, so an interrupted document can
    /// be driven again.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure.
    pub fn drive(
        &self,
        key: &DocumentKey,
        profile: &ConfigurationProfile,
        options: &SubmitOptions,
    ) -> Result<SubmissionOutcome, PipelineError> {
        ensure_profile_matches(key, profile)?;
        self.serialize(key)?;
        if self.load(key)?.status() == DocumentStatus::Generated {
            self.sign(key, profile)?;
        }
        self.submit(key, options)
    }

    /// Queries the authority for a document's status.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Transmission`] when the query fails.
    pub fn refresh(&self, key: &DocumentKey) -> Result<DocumentStatusView, PipelineError> {
        Ok(self.transmission.query(key)?)
    }

    /// Cancels an accepted document.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Transmission`] when cancellation fails.
    pub fn cancel(&self, key: &DocumentKey) -> Result<DocumentStatusView, PipelineError> {
        Ok(self.transmission.cancel(key)?)
    }

    /// Returns the status view of a document.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotFound`] when the document does not exist.
    pub fn status(&self, key: &DocumentKey) -> Result<DocumentStatusView, PipelineError> {
        Ok(self.load(key)?.status_view())
    }

    /// Resubmits documents in `Error` (and optionally `Failed` or stale
    /// `Submitting`) for one organization.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] when listing fails; per-document
    /// failures are reported in the entries.
    pub fn retry_pending(
        &self,
        organization_id: &OrganizationId,
        options: &RetrySweepOptions,
    ) -> Result<Vec<SweepEntry>, PipelineError> {
        let mut statuses = vec![DocumentStatus::Error];
        if options.include_failed {
            statuses.push(DocumentStatus::Failed);
        }
        if options.stale_submitting_after_ms.is_some() {
            statuses.push(DocumentStatus::Submitting);
        }
        let now = self.clock.now();
        let candidates = self.documents.list_by_status(organization_id, &statuses)?;
        let mut entries = Vec::with_capacity(candidates.len());
        for key in candidates {
            let document = match self.load(&key) {
                Ok(document) => document,
                Err(err) => {
                    entries.push(SweepEntry {
                        document: key,
                        result: Err(err),
                    });
                    continue;
                }
            };
            if document.status() == DocumentStatus::Submitting {
                let Some(threshold) = options.stale_submitting_after_ms else {
                    continue;
                };
                let last = document.transmission().last_attempt_at.unwrap_or(document.issued_at);
                if last.saturating_add_millis(threshold) > now {
                    continue;
                }
            }
            let submit_options = SubmitOptions {
                deadline_ms: options.deadline_ms,
                manual_resubmit: options.include_failed,
            };
            let result = self
                .transmission
                .submit(&key, &submit_options)
                .map(|outcome| outcome.view)
                .map_err(PipelineError::from);
            entries.push(SweepEntry {
                document: key,
                result,
            });
        }
        Ok(entries)
    }

    /// Queries the authority for every `Pending` document of an organization.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] when listing fails; per-document
    /// failures are reported in the entries.
    pub fn refresh_pending(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<SweepEntry>, PipelineError> {
        let pending = self.documents.list_by_status(organization_id, &[DocumentStatus::Pending])?;
        Ok(pending
            .into_iter()
            .map(|key| {
                let result = self.transmission.query(&key).map_err(PipelineError::from);
                SweepEntry {
                    document: key,
                    result,
                }
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------------

    /// Loads a document or reports it missing.
    fn load(&self, key: &DocumentKey) -> Result<ElectronicPayrollDocument, PipelineError> {
        self.documents.load(key)?.ok_or_else(|| PipelineError::NotFound(key.to_string()))
    }
}

/// Rejects a profile from another organization than the document's.
fn ensure_profile_matches(
    key: &DocumentKey,
    profile: &ConfigurationProfile,
) -> Result<(), PipelineError> {
    if key.organization_id == profile.organization_id {
        return Ok(());
    }
    Err(PipelineError::OrganizationMismatch {
        document: key.to_string(),
        profile: profile.organization_id.to_string(),
    })
}

/// Builds an invalid-state error for the document's current status.
fn invalid_state(document: &ElectronicPayrollDocument, operation: &'static str) -> PipelineError {
    PipelineError::InvalidState {
        document: document.key.to_string(),
        status: document.status(),
        operation,
    }
}
