// crates/epayroll-core/src/runtime/transmission.rs
// ============================================================================
// Module: Transmission Client
// Description: Idempotent submission, status query, and cancellation.
// Purpose: Drive signed documents through the authority with bounded retries.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The transmission client owns every remote interaction of a document.
//!
//! - Every attempt carries the same [`IdempotencyKey`], so retries collapse
//!   into one remote record.
//! - The `Submitting` status and attempt counters are persisted before the
//!   request leaves the process; an interrupted attempt is therefore visible.
//! - A duplicate answer is informational and is resolved by querying.
//! - Transient failures move the document to `Error` and are retried with
//!   backoff until the attempt ceiling, after which the document is `Failed`.
//! - A deadline stops retrying and leaves the document in `Error`.
//! - Remote answers learned later are applied forward-only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use thiserror::Error;

use crate::core::CancellationRecord;
use crate::core::DocumentError;
use crate::core::DocumentKey;
use crate::core::DocumentStatus;
use crate::core::DocumentStatusView;
use crate::core::ElectronicPayrollDocument;
use crate::core::IdempotencyKey;
use crate::core::InvalidTransition;
use crate::core::Timestamp;
use crate::interfaces::AuthorityResponse;
use crate::interfaces::AuthorityTransport;
use crate::interfaces::Clock;
use crate::interfaces::DocumentStore;
use crate::interfaces::QueryTarget;
use crate::interfaces::RemoteStatus;
use crate::interfaces::Sleeper;
use crate::interfaces::StatusReconciler;
use crate::interfaces::StoreError;
use crate::interfaces::SubmitReply;
use crate::interfaces::SubmitRequest;
use crate::interfaces::TransportError;
use crate::runtime::audit::PipelineAuditEvent;
use crate::runtime::audit::SharedAuditSink;
use crate::runtime::retry::RetryPolicy;
use crate::runtime::store::SharedDocumentStore;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Transmission errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransmissionError {
    /// Document store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),
    /// Operation is not valid in the document's status.
    #[error("cannot {operation} document {document} in status {status}")]
    InvalidState {
        /// Document key.
        document: String,
        /// Current status.
        status: DocumentStatus,
        /// Requested operation.
        operation: &'static str,
    },
    /// Deadline passed before a definitive answer; the document is in `Error`.
    #[error("submission deadline exceeded for {document} after {attempts} attempts")]
    Timeout {
        /// Document key.
        document: String,
        /// Attempts made so far.
        attempts: u32,
    },
    /// Attempt ceiling reached; the document is `Failed`.
    #[error("submission attempts exhausted for {document} after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Document key.
        document: String,
        /// Attempts made so far.
        attempts: u32,
        /// Last transport failure.
        last_error: String,
    },
    /// The authority refused the cancellation.
    #[error("cancellation rejected {code}: {message}")]
    CancelRejected {
        /// Response code, verbatim.
        code: String,
        /// Response message, verbatim.
        message: String,
    },
    /// Transport failure outside the submission retry loop.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Document mutation was rejected.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// Lifecycle transition was rejected.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Per-call submission options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Wall-time budget for the whole call, in milliseconds.
    pub deadline_ms: Option<u64>,
    /// Operator intent to resubmit a `Failed` document.
    pub manual_resubmit: bool,
}

/// Result of a submission call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    /// Document status after the call.
    pub view: DocumentStatusView,
    /// True when the document already had a remote outcome and nothing was sent.
    pub replayed: bool,
}

/// Construction parameters for [`TransmissionClient`].
pub struct TransmissionClientParams {
    /// Single-attempt authority transport.
    pub transport: Arc<dyn AuthorityTransport + Send + Sync>,
    /// Document store.
    pub store: SharedDocumentStore,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Delay provider between retries.
    pub sleeper: Arc<dyn Sleeper>,
    /// Audit sink.
    pub audit: SharedAuditSink,
    /// Retry policy.
    pub policy: RetryPolicy,
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Idempotent transmission client.
pub struct TransmissionClient {
    /// Single-attempt authority transport.
    transport: Arc<dyn AuthorityTransport + Send + Sync>,
    /// Document store.
    store: SharedDocumentStore,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Delay provider between retries.
    sleeper: Arc<dyn Sleeper>,
    /// Audit sink.
    audit: SharedAuditSink,
    /// Retry policy.
    policy: RetryPolicy,
}

impl TransmissionClient {
    /// Creates a transmission client.
    #[must_use]
    pub fn new(params: TransmissionClientParams) -> Self {
        Self {
            transport: params.transport,
            store: params.store,
            clock: params.clock,
            sleeper: params.sleeper,
            audit: params.audit,
            policy: params.policy,
        }
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submits a signed document.
    ///
    /// Documents that already carry a remote outcome are returned unchanged
    /// with `replayed = true`. A validation failure yields `Rejected` with the
    /// authority's code and message.
    ///
    /// # Errors
    ///
    /// Returns [`TransmissionError::Timeout`] when the deadline passes,
    /// [`TransmissionError::Exhausted`] when the attempt ceiling is reached,
    /// and other variants for state, store, or protocol failures.
    pub fn submit(
        &self,
        key: &DocumentKey,
        options: &SubmitOptions,
    ) -> Result<SubmissionOutcome, TransmissionError> {
        let mut document = self.load(key)?;
        match document.status() {
            DocumentStatus::Signed | DocumentStatus::Error | DocumentStatus::Submitting => {}
            DocumentStatus::Failed if options.manual_resubmit => {}
            DocumentStatus::Pending
            | DocumentStatus::Accepted
            | DocumentStatus::Rejected
            | DocumentStatus::Cancelled => {
                return Ok(SubmissionOutcome {
                    view: document.status_view(),
                    replayed: true,
                });
            }
            status => return Err(invalid_state(&document, status, "submit")),
        }
        let (Some(cune), Some(xml_signed)) =
            (document.cune().map(str::to_string), document.xml_signed().map(str::to_string))
        else {
            return Err(invalid_state(&document, document.status(), "submit"));
        };
        let idempotency_key = IdempotencyKey::for_document(key);
        let deadline = options.deadline_ms.map(|ms| self.clock.now().saturating_add_millis(ms));
        let mut attempts_this_run: u32 = 0;

        loop {
            let started = self.clock.now();
            if document.status() != DocumentStatus::Submitting {
                document.transition(DocumentStatus::Submitting, started, "submission attempt")?;
            }
            let transmission = document.transmission_mut();
            transmission.attempt_count += 1;
            transmission.last_attempt_at = Some(started);
            let attempt = transmission.attempt_count;
            attempts_this_run += 1;
            self.persist(&mut document)?;
            self.audit.record(
                &PipelineAuditEvent::new("submission_attempt", started)
                    .document(key)
                    .status(DocumentStatus::Submitting)
                    .attempt(attempt),
            );

            let request = SubmitRequest {
                environment: document.environment,
                document: key,
                idempotency_key: &idempotency_key,
                cune: &cune,
                xml_signed: &xml_signed,
            };
            let result = self.attempt_once(&request);
            let finished = self.clock.now();
            match result {
                Ok(response) => {
                    self.settle(key, &mut document, &response, finished, "authority response")?;
                    self.record_outcome(&document, finished, attempt);
                    return Ok(SubmissionOutcome {
                        view: document.status_view(),
                        replayed: false,
                    });
                }
                Err(TransportError::Validation {
                    code,
                    message,
                    ..
                }) => {
                    let response = AuthorityResponse {
                        track_id: None,
                        status: RemoteStatus::Rejected,
                        code: Some(code),
                        message: Some(message),
                    };
                    self.settle(key, &mut document, &response, finished, "validation failure")?;
                    self.record_outcome(&document, finished, attempt);
                    return Ok(SubmissionOutcome {
                        view: document.status_view(),
                        replayed: false,
                    });
                }
                Err(err) => {
                    self.record_failure(&mut document, &err, finished, attempt)?;
                    if !err.is_transient() {
                        return Err(TransmissionError::Transport(err));
                    }
                    if !self.policy.allows_another(attempts_this_run) {
                        document.transition(
                            DocumentStatus::Failed,
                            finished,
                            "attempt ceiling reached",
                        )?;
                        self.persist(&mut document)?;
                        self.record_outcome(&document, finished, attempt);
                        return Err(TransmissionError::Exhausted {
                            document: key.to_string(),
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }
                    let delay = self.policy.backoff_delay(attempts_this_run);
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    if let Some(deadline) = deadline
                        && finished.saturating_add_millis(delay_ms) >= deadline
                    {
                        self.audit.record(
                            &PipelineAuditEvent::new("submission_outcome", finished)
                                .document(key)
                                .status(document.status())
                                .attempt(attempt)
                                .message("deadline exceeded"),
                        );
                        return Err(TransmissionError::Timeout {
                            document: key.to_string(),
                            attempts: attempt,
                        });
                    }
                    self.sleeper.sleep(delay);
                }
            }
        }
    }

    /// Queries the authority and applies the answer forward-only.
    ///
    /// # Errors
    ///
    /// Returns [`TransmissionError`] when the document was never submitted,
    /// the query fails, or persistence fails.
    pub fn query(&self, key: &DocumentKey) -> Result<DocumentStatusView, TransmissionError> {
        let mut document = self.load(key)?;
        let status = document.status();
        if matches!(status, DocumentStatus::Draft | DocumentStatus::Generated | DocumentStatus::Signed)
        {
            return Err(invalid_state(&document, status, "query"));
        }
        let idempotency_key = IdempotencyKey::for_document(key);
        let track_id = document.transmission().track_id.clone();
        let target = track_id
            .as_ref()
            .map_or(QueryTarget::Submission(&idempotency_key), QueryTarget::Track);
        let environment = document.environment;
        let response = self.with_retry(|| self.transport.query(environment, target))?;
        let now = self.clock.now();
        let target_status = response.status.document_status();
        let before = document.clone();
        apply_forward_only(&mut document, &response, now, "status query")?;
        if document != before {
            self.persist(&mut document)?;
        }
        self.audit.record(
            &PipelineAuditEvent::new("reconciliation", now)
                .document(key)
                .status(document.status())
                .code(response.code.as_deref())
                .message(format!("authority reports {target_status}")),
        );
        Ok(document.status_view())
    }

    /// Cancels an accepted document.
    ///
    /// Cancelling an already cancelled document returns its current view.
    ///
    /// # Errors
    ///
    /// Returns [`TransmissionError::CancelRejected`] when the authority
    /// refuses, and other variants for state, store, or transport failures.
    pub fn cancel(&self, key: &DocumentKey) -> Result<DocumentStatusView, TransmissionError> {
        let mut document = self.load(key)?;
        match document.status() {
            DocumentStatus::Accepted => {}
            DocumentStatus::Cancelled => return Ok(document.status_view()),
            status => return Err(invalid_state(&document, status, "cancel")),
        }
        let Some(track_id) = document.transmission().track_id.clone() else {
            return Err(invalid_state(&document, document.status(), "cancel"));
        };
        let idempotency_key = IdempotencyKey::for_document(key);
        let environment = document.environment;
        let ack = self
            .with_retry(|| self.transport.cancel(environment, &track_id, &idempotency_key))
            .map_err(|err| match err {
                TransportError::Validation {
                    code,
                    message,
                    ..
                } => TransmissionError::CancelRejected {
                    code,
                    message,
                },
                other => TransmissionError::Transport(other),
            })?;
        let now = self.clock.now();
        document.record_cancellation(CancellationRecord {
            cancellation_id: ack.cancellation_id,
            cancelled_at: now,
            code: ack.code.clone(),
            message: ack.message,
        })?;
        document.transition(DocumentStatus::Cancelled, now, "cancelled by request")?;
        self.persist(&mut document)?;
        self.audit.record(
            &PipelineAuditEvent::new("document_cancelled", now)
                .document(key)
                .status(DocumentStatus::Cancelled)
                .code(ack.code.as_deref()),
        );
        Ok(document.status_view())
    }

    // ------------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------------

    /// Loads a document or reports it missing.
    fn load(&self, key: &DocumentKey) -> Result<ElectronicPayrollDocument, TransmissionError> {
        self.store.load(key)?.ok_or_else(|| TransmissionError::NotFound(key.to_string()))
    }

    /// Persists a document as the next revision.
    fn persist(&self, document: &mut ElectronicPayrollDocument) -> Result<(), StoreError> {
        document.advance_revision();
        self.store.update(document)
    }

    /// Sends one submission and resolves a duplicate answer by querying.
    fn attempt_once(
        &self,
        request: &SubmitRequest<'_>,
    ) -> Result<AuthorityResponse, TransportError> {
        match self.transport.submit(request)? {
            SubmitReply::Received(response) => Ok(response),
            SubmitReply::Duplicate {
                track_id,
            } => {
                let target = track_id
                    .as_ref()
                    .map_or(QueryTarget::Submission(request.idempotency_key), QueryTarget::Track);
                // The record exists, so a refusal here is not a verdict on the document.
                let mut response =
                    self.transport.query(request.environment, target).map_err(|err| match err {
                        TransportError::Validation {
                            status,
                            code,
                            message,
                        } => TransportError::Protocol(format!(
                            "duplicate submission could not be resolved (status {status}, code \
                             {code}): {message}"
                        )),
                        other => other,
                    })?;
                if response.track_id.is_none() {
                    response.track_id = track_id;
                }
                Ok(response)
            }
        }
    }

    /// Applies an attempt's answer and persists it.
    ///
    /// When another writer stored a newer revision while the attempt was in
    /// flight, the answer is rebased onto the stored document forward-only.
    fn settle(
        &self,
        key: &DocumentKey,
        document: &mut ElectronicPayrollDocument,
        response: &AuthorityResponse,
        at: Timestamp,
        reason: &str,
    ) -> Result<(), TransmissionError> {
        apply_response(document, response, at, reason)?;
        match self.persist(document) {
            Ok(()) => return Ok(()),
            Err(StoreError::Conflict(_)) => {}
            Err(err) => return Err(err.into()),
        }
        let mut current = self.load(key)?;
        let before = current.clone();
        apply_forward_only(&mut current, response, at, reason)?;
        if current != before {
            self.persist(&mut current)?;
        }
        *document = current;
        Ok(())
    }

    /// Records a failed attempt and moves the document to `Error`.
    fn record_failure(
        &self,
        document: &mut ElectronicPayrollDocument,
        err: &TransportError,
        at: Timestamp,
        attempt: u32,
    ) -> Result<(), TransmissionError> {
        let transmission = document.transmission_mut();
        transmission.response_code = match err {
            TransportError::Unavailable {
                status, ..
            } => Some(status.to_string()),
            _ => None,
        };
        transmission.response_message = Some(err.to_string());
        document.transition(DocumentStatus::Error, at, "attempt failed")?;
        self.persist(document)?;
        self.audit.record(
            &PipelineAuditEvent::new("submission_outcome", at)
                .document(&document.key)
                .status(DocumentStatus::Error)
                .attempt(attempt)
                .message(err.to_string()),
        );
        Ok(())
    }

    /// Records the final outcome of a submission call.
    fn record_outcome(&self, document: &ElectronicPayrollDocument, at: Timestamp, attempt: u32) {
        let transmission = document.transmission();
        let mut event = PipelineAuditEvent::new("submission_outcome", at)
            .document(&document.key)
            .status(document.status())
            .attempt(attempt)
            .code(transmission.response_code.as_deref());
        if let Some(message) = &transmission.response_message {
            event = event.message(message.clone());
        }
        self.audit.record(&event);
    }

    /// Runs a single-attempt call with the retry policy for transient failures.
    fn with_retry<T>(
        &self,
        mut call: impl FnMut() -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && self.policy.allows_another(attempts) => {
                    self.sleeper.sleep(self.policy.backoff_delay(attempts));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl StatusReconciler for TransmissionClient {
    fn reconcile(&self, document: &DocumentKey) -> Result<DocumentStatus, String> {
        self.query(document).map(|view| view.status).map_err(|err| err.to_string())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds an invalid-state error.
fn invalid_state(
    document: &ElectronicPayrollDocument,
    status: DocumentStatus,
    operation: &'static str,
) -> TransmissionError {
    TransmissionError::InvalidState {
        document: document.key.to_string(),
        status,
        operation,
    }
}

/// Applies `response` only when it moves the document forward.
///
/// A stale answer may still fill in a missing tracking id.
fn apply_forward_only(
    document: &mut ElectronicPayrollDocument,
    response: &AuthorityResponse,
    at: Timestamp,
    reason: &str,
) -> Result<(), InvalidTransition> {
    let status = document.status();
    let target = response.status.document_status();
    if status == target || status.can_transition_to(target) {
        apply_response(document, response, at, reason)?;
    } else if response.track_id.is_some() && document.transmission().track_id.is_none() {
        document.transmission_mut().track_id.clone_from(&response.track_id);
    }
    Ok(())
}

/// Copies an authority answer onto the document and transitions to its status.
fn apply_response(
    document: &mut ElectronicPayrollDocument,
    response: &AuthorityResponse,
    at: Timestamp,
    reason: &str,
) -> Result<(), InvalidTransition> {
    let target = response.status.document_status();
    let transmission = document.transmission_mut();
    if response.track_id.is_some() {
        transmission.track_id.clone_from(&response.track_id);
    }
    transmission.response_code.clone_from(&response.code);
    transmission.response_message.clone_from(&response.message);
    if target.is_final() && transmission.validated_at.is_none() {
        transmission.validated_at = Some(at);
    }
    if document.status() != target {
        document.transition(target, at, reason)?;
    }
    Ok(())
}
