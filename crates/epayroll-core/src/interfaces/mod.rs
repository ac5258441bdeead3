// crates/epayroll-core/src/interfaces/mod.rs
// ============================================================================
// Module: Electronic Payroll Interfaces
// Description: Backend-agnostic traits for storage, signing, and transport.
// Purpose: Define the seams between the pipeline runtime and its adapters.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! The runtime depends only on these traits. Adapters provide persistence
//! (in-memory or `SQLite`), signing (sealed credential bundles), and the
//! authority transport (HTTP). Transport methods perform exactly one remote
//! attempt; retry policy lives in the runtime.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::CredentialRef;
use crate::core::DocumentKey;
use crate::core::DocumentPrefix;
use crate::core::DocumentStatus;
use crate::core::ElectronicPayrollDocument;
use crate::core::Environment;
use crate::core::EventDisposition;
use crate::core::IdempotencyKey;
use crate::core::OrganizationId;
use crate::core::RecordOutcome;
use crate::core::SignatureBlock;
use crate::core::Timestamp;
use crate::core::TrackId;
use crate::core::WebhookEvent;

// ============================================================================
// SECTION: Clock and Sleeper
// ============================================================================

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Timestamp;
}

/// Blocking delay used between retry attempts.
pub trait Sleeper: Send + Sync {
    /// Blocks the caller for the given duration.
    fn sleep(&self, duration: Duration);
}

// ============================================================================
// SECTION: Document Store
// ============================================================================

/// Document store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("document store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("document store corruption: {0}")]
    Corrupt(String),
    /// Store data version is incompatible.
    #[error("document store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data is invalid.
    #[error("document store invalid data: {0}")]
    Invalid(String),
    /// Compare-and-set failed or the record already exists.
    #[error("document store conflict: {0}")]
    Conflict(String),
    /// Record does not exist.
    #[error("document store record not found: {0}")]
    NotFound(String),
    /// Store reported an error.
    #[error("document store error: {0}")]
    Store(String),
}

/// Persistence for payroll documents.
///
/// # Invariants
/// - `insert` accepts only revision zero and rejects existing keys.
/// - `update` succeeds only when the stored revision is exactly one below
///   the document's revision.
pub trait DocumentStore {
    /// Loads a document by key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load(&self, key: &DocumentKey) -> Result<Option<ElectronicPayrollDocument>, StoreError>;

    /// Inserts a new document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the key already exists.
    fn insert(&self, document: &ElectronicPayrollDocument) -> Result<(), StoreError>;

    /// Replaces a document using compare-and-set on its revision.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the stored revision moved and
    /// [`StoreError::NotFound`] when the document does not exist.
    fn update(&self, document: &ElectronicPayrollDocument) -> Result<(), StoreError>;

    /// Lists keys of an organization's documents in the given statuses, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn list_by_status(
        &self,
        organization_id: &OrganizationId,
        statuses: &[DocumentStatus],
    ) -> Result<Vec<DocumentKey>, StoreError>;
}

// ============================================================================
// SECTION: Numbering Store
// ============================================================================

/// Inclusive range of sequence numbers authorized by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingRange {
    /// First number of the range.
    pub start: u64,
    /// Last number of the range.
    pub end: u64,
}

impl NumberingRange {
    /// Returns true when the range is non-empty and starts at one or above.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.start >= 1 && self.start <= self.end
    }

    /// Returns true when two ranges share at least one number.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Reservation state of one registered range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingCursor {
    /// Registered range.
    pub range: NumberingRange,
    /// Next number to hand out; `end + 1` once exhausted.
    pub next: u64,
}

impl NumberingCursor {
    /// Returns true when every number in the range has been handed out.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.next > self.range.end
    }
}

/// Numbering store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NumberingError {
    /// Every registered range is exhausted or none is registered.
    #[error("numbering range exhausted for {organization_id}/{prefix}")]
    RangeExhausted {
        /// Organization.
        organization_id: OrganizationId,
        /// Prefix.
        prefix: DocumentPrefix,
    },
    /// Range is empty, starts at zero, or is not ascending.
    #[error("invalid numbering range: {0}")]
    InvalidRange(String),
    /// Range overlaps a registered range.
    #[error("numbering range overlaps an existing range: {0}")]
    Overlap(String),
    /// Backend failure.
    #[error("numbering store error: {0}")]
    Store(String),
}

/// Atomic allocator of sequence numbers per `(organization, prefix)`.
///
/// # Invariants
/// - A number is never handed out twice, including across restarts.
/// - Numbers within one `(organization, prefix)` are strictly increasing.
pub trait NumberingStore {
    /// Registers a range; registering an identical range again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`NumberingError`] when the range is invalid, overlaps another
    /// range, or does not follow the highest registered range.
    fn register_range(
        &self,
        organization_id: &OrganizationId,
        prefix: &DocumentPrefix,
        range: NumberingRange,
    ) -> Result<(), NumberingError>;

    /// Atomically reserves the next number.
    ///
    /// # Errors
    ///
    /// Returns [`NumberingError::RangeExhausted`] when no number remains.
    fn reserve(
        &self,
        organization_id: &OrganizationId,
        prefix: &DocumentPrefix,
    ) -> Result<u64, NumberingError>;

    /// Returns the registered ranges with their cursors, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`NumberingError::Store`] when the query fails.
    fn cursors(
        &self,
        organization_id: &OrganizationId,
        prefix: &DocumentPrefix,
    ) -> Result<Vec<NumberingCursor>, NumberingError>;
}

// ============================================================================
// SECTION: Webhook Event Store
// ============================================================================

/// Durable log of authority notifications.
///
/// # Invariants
/// - `(document, sequence_id)` is stored at most once.
/// - The cursor never decreases.
pub trait WebhookEventStore {
    /// Records an event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn record(&self, event: &WebhookEvent) -> Result<RecordOutcome, StoreError>;

    /// Returns the highest settled sequence id for a document (zero when none).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn cursor(&self, document: &DocumentKey) -> Result<u64, StoreError>;

    /// Returns unsettled events above the cursor in ascending sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn buffered(&self, document: &DocumentKey) -> Result<Vec<WebhookEvent>, StoreError>;

    /// Settles an event and advances the cursor to at least its sequence id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the event is not recorded.
    fn settle(
        &self,
        document: &DocumentKey,
        sequence_id: u64,
        disposition: EventDisposition,
    ) -> Result<(), StoreError>;

    /// Returns documents holding unsettled events received before `received_before`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn stale_documents(&self, received_before: Timestamp) -> Result<Vec<DocumentKey>, StoreError>;
}

// ============================================================================
// SECTION: Document Signer
// ============================================================================

/// Signing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignError {
    /// Credential cannot be opened, is expired, or does not match its key.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    /// Credential reference is unknown to the signer.
    #[error("credential not found: {0}")]
    CredentialNotFound(String),
    /// Signing failed for another reason.
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Input for one signing operation.
#[derive(Debug, Clone, Copy)]
pub struct SignRequest<'a> {
    /// Credential to sign with.
    pub credential: &'a CredentialRef,
    /// Canonical bytes to sign.
    pub canonical_bytes: &'a [u8],
    /// Signing instant.
    pub signing_time: Timestamp,
}

/// Produces signature blocks over canonical bytes.
pub trait DocumentSigner {
    /// Signs canonical bytes with the referenced credential.
    ///
    /// # Errors
    ///
    /// Returns [`SignError`] when the credential is unusable or signing fails.
    fn sign(&self, request: &SignRequest<'_>) -> Result<SignatureBlock, SignError>;
}

// ============================================================================
// SECTION: Authority Transport
// ============================================================================

/// Status reported by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    /// Received, decision pending.
    Pending,
    /// Accepted.
    Accepted,
    /// Rejected.
    Rejected,
}

impl RemoteStatus {
    /// Returns the document status matching the remote decision.
    #[must_use]
    pub const fn document_status(self) -> DocumentStatus {
        match self {
            Self::Pending => DocumentStatus::Pending,
            Self::Accepted => DocumentStatus::Accepted,
            Self::Rejected => DocumentStatus::Rejected,
        }
    }
}

/// Authority answer to a submission or status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityResponse {
    /// Tracking id assigned by the authority.
    #[serde(default)]
    pub track_id: Option<TrackId>,
    /// Reported status.
    pub status: RemoteStatus,
    /// Response code, verbatim.
    #[serde(default)]
    pub code: Option<String>,
    /// Response message, verbatim.
    #[serde(default)]
    pub message: Option<String>,
}

/// Outcome of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitReply {
    /// The authority processed the submission.
    Received(AuthorityResponse),
    /// The authority already holds a submission with this idempotency key.
    Duplicate {
        /// Tracking id of the existing record, when reported.
        track_id: Option<TrackId>,
    },
}

/// Signed document handed to the transport.
#[derive(Debug, Clone, Copy)]
pub struct SubmitRequest<'a> {
    /// Target environment.
    pub environment: Environment,
    /// Document key.
    pub document: &'a DocumentKey,
    /// Idempotency key for every attempt of this document.
    pub idempotency_key: &'a IdempotencyKey,
    /// CUNE of the document.
    pub cune: &'a str,
    /// Signed XML body.
    pub xml_signed: &'a str,
}

/// Reference used to query a submission.
#[derive(Debug, Clone, Copy)]
pub enum QueryTarget<'a> {
    /// Query by tracking id.
    Track(&'a TrackId),
    /// Query by idempotency key.
    Submission(&'a IdempotencyKey),
}

/// Authority acknowledgement of a cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAck {
    /// Cancellation identifier.
    pub cancellation_id: String,
    /// Response code, verbatim.
    #[serde(default)]
    pub code: Option<String>,
    /// Response message, verbatim.
    #[serde(default)]
    pub message: Option<String>,
}

/// Transport errors, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The attempt timed out.
    #[error("authority request timed out: {0}")]
    Timeout(String),
    /// The connection failed or was interrupted.
    #[error("authority connection failed: {0}")]
    Connection(String),
    /// The authority is temporarily unable to serve the request.
    #[error("authority unavailable (status {status}): {message}")]
    Unavailable {
        /// HTTP status code.
        status: u16,
        /// Response excerpt.
        message: String,
    },
    /// The authority refused the request as invalid.
    #[error("authority validation failure {code}: {message}")]
    Validation {
        /// HTTP status code.
        status: u16,
        /// Response code, verbatim.
        code: String,
        /// Response message, verbatim.
        message: String,
    },
    /// The authority answered with an unexpected payload.
    #[error("authority protocol error: {0}")]
    Protocol(String),
    /// Transport configuration is unusable.
    #[error("authority transport config error: {0}")]
    Config(String),
}

impl TransportError {
    /// Returns true when the failure may succeed on a later attempt.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connection(_) | Self::Unavailable { .. })
    }
}

/// Single-attempt client for the tax authority.
pub trait AuthorityTransport {
    /// Submits a signed document once.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] classified as transient or permanent.
    fn submit(&self, request: &SubmitRequest<'_>) -> Result<SubmitReply, TransportError>;

    /// Queries the status of a submission once.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] classified as transient or permanent.
    fn query(
        &self,
        environment: Environment,
        target: QueryTarget<'_>,
    ) -> Result<AuthorityResponse, TransportError>;

    /// Requests cancellation of an accepted document once.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] classified as transient or permanent.
    fn cancel(
        &self,
        environment: Environment,
        track_id: &TrackId,
        idempotency_key: &IdempotencyKey,
    ) -> Result<CancelAck, TransportError>;
}

// ============================================================================
// SECTION: Status Reconciler
// ============================================================================

/// Resolves a document's authoritative status by querying the authority.
pub trait StatusReconciler {
    /// Queries the authority and applies the answer forward-only.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure when the status cannot be resolved.
    fn reconcile(&self, document: &DocumentKey) -> Result<DocumentStatus, String>;
}
