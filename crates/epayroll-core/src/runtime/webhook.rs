// crates/epayroll-core/src/runtime/webhook.rs
// ============================================================================
// Module: Webhook Ingestor
// Description: Verification, ordering, and application of authority notifications.
// Purpose: Apply asynchronous status updates exactly once and in sequence order.
// Dependencies: hmac, sha2, subtle, serde_json, crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Deliveries are authenticated before anything is recorded:
//! `X-Epayroll-Signature` must equal `sha256=` followed by the hex
//! HMAC-SHA256 of `"{timestamp}.{body}"`, and the timestamp must be within
//! the allowed skew.
//!
//! Verified events are stored keyed by `(document, sequence_id)`. An event
//! is applied only when its sequence id is exactly one above the document's
//! cursor; later events wait in the buffer and are drained in order once the
//! gap fills. Events at or below the cursor are no-ops. Application is
//! forward-only: an event that would regress a final status is discarded.
//! Gaps that stay open past the gap timeout are closed by querying the
//! authority through a [`StatusReconciler`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use hmac::Hmac;
use hmac::Mac;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::core::CancellationRecord;
use crate::core::DocumentError;
use crate::core::DocumentKey;
use crate::core::DocumentStatus;
use crate::core::EventDisposition;
use crate::core::InvalidTransition;
use crate::core::RecordOutcome;
use crate::core::Timestamp;
use crate::core::WebhookEvent;
use crate::core::WebhookEventType;
use crate::core::WebhookPayload;
use crate::core::hex_encode;
use crate::interfaces::Clock;
use crate::interfaces::DocumentStore;
use crate::interfaces::StatusReconciler;
use crate::interfaces::StoreError;
use crate::interfaces::WebhookEventStore;
use crate::runtime::audit::PipelineAuditEvent;
use crate::runtime::audit::SharedAuditSink;
use crate::runtime::store::SharedDocumentStore;
use crate::runtime::store::SharedWebhookEventStore;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header carrying the delivery timestamp (unix milliseconds).
pub const TIMESTAMP_HEADER: &str = "x-epayroll-timestamp";
/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "x-epayroll-signature";
/// Prefix of the signature header value.
const SIGNATURE_PREFIX: &str = "sha256=";
/// Compare-and-set retries when applying one event.
const MAX_APPLY_CONFLICTS: usize = 3;

/// HMAC-SHA256 keyed with the shared webhook secret.
type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Webhook ingestion errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    /// Signature missing, malformed, or wrong.
    #[error("webhook authentication failed: {0}")]
    Unauthorized(String),
    /// Timestamp outside the allowed skew.
    #[error("webhook timestamp outside allowed skew: {0}")]
    StaleTimestamp(String),
    /// Body is not a valid delivery.
    #[error("malformed webhook delivery: {0}")]
    Malformed(String),
    /// Referenced document does not exist.
    #[error("unknown document: {0}")]
    UnknownDocument(String),
    /// Concurrent updates kept winning the compare-and-set.
    #[error("document {0} kept changing while applying an event")]
    Contention(String),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Document mutation was rejected.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// Lifecycle transition was rejected.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Raw delivery as received by the HTTP layer.
#[derive(Debug, Clone, Copy)]
pub struct RawDelivery<'a> {
    /// Timestamp header value.
    pub timestamp: Option<&'a str>,
    /// Signature header value.
    pub signature: Option<&'a str>,
    /// Raw request body.
    pub body: &'a [u8],
}

/// JSON body of a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookDelivery {
    /// Document key as `org/prefix/number`.
    pub document_reference: String,
    /// Event kind.
    pub event_type: WebhookEventType,
    /// Per-document sequence id, starting at one.
    pub sequence_id: u64,
    /// Delivered fields.
    #[serde(default)]
    pub payload: WebhookPayload,
}

/// Result of ingesting one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// The event was applied; buffered successors may have been drained.
    Applied {
        /// Document status after application.
        status: DocumentStatus,
        /// Buffered events applied after this one.
        drained: usize,
    },
    /// The event arrived ahead of a gap and waits in the buffer.
    Buffered {
        /// Sequence id the document is waiting for.
        expected: u64,
    },
    /// The event was already recorded or is at or below the cursor.
    Duplicate,
    /// The event would have regressed the document and was ignored.
    Discarded {
        /// Document status that was kept.
        status: DocumentStatus,
    },
}

/// Summary of one reconciled document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Document key.
    pub document: String,
    /// Status after reconciliation, when the query succeeded.
    pub status: Option<DocumentStatus>,
    /// Buffered events settled during the sweep.
    pub settled: usize,
    /// Failure description, when the query failed.
    pub error: Option<String>,
}

// ============================================================================
// SECTION: Verifier
// ============================================================================

/// Authenticates deliveries with the shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    /// Shared HMAC secret.
    secret: Vec<u8>,
    /// Allowed distance between delivery timestamp and receipt.
    max_skew_ms: u64,
}

impl WebhookVerifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>, max_skew_ms: u64) -> Self {
        Self {
            secret: secret.into(),
            max_skew_ms,
        }
    }

    /// Computes the signature header value for a body.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Unauthorized`] when the secret is unusable.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| WebhookError::Unauthorized("invalid webhook secret".to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(format!("{SIGNATURE_PREFIX}{}", hex_encode(&mac.finalize().into_bytes())))
    }

    /// Verifies a delivery and parses it into an event.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Unauthorized`] or [`WebhookError::StaleTimestamp`]
    /// when authentication fails and [`WebhookError::Malformed`] when the
    /// body is not a valid delivery.
    pub fn verify(
        &self,
        delivery: &RawDelivery<'_>,
        now: Timestamp,
    ) -> Result<WebhookEvent, WebhookError> {
        let timestamp = delivery
            .timestamp
            .ok_or_else(|| WebhookError::Unauthorized("missing timestamp header".to_string()))?;
        let signature = delivery
            .signature
            .ok_or_else(|| WebhookError::Unauthorized("missing signature header".to_string()))?;
        let expected = self.sign(timestamp, delivery.body)?;
        if !bool::from(expected.as_bytes().ct_eq(signature.trim().as_bytes())) {
            return Err(WebhookError::Unauthorized("signature mismatch".to_string()));
        }
        let sent_at = timestamp
            .trim()
            .parse::<i64>()
            .map(Timestamp::from_unix_millis)
            .map_err(|_| WebhookError::Unauthorized("timestamp is not unix millis".to_string()))?;
        if sent_at.abs_diff_millis(now) > self.max_skew_ms {
            return Err(WebhookError::StaleTimestamp(format!(
                "sent {} received {}",
                sent_at.as_unix_millis(),
                now.as_unix_millis()
            )));
        }
        parse_delivery(delivery.body, now)
    }
}

/// Parses a delivery body into an unsettled event.
///
/// # Errors
///
/// Returns [`WebhookError::Malformed`] when the body is not a valid delivery.
pub fn parse_delivery(body: &[u8], received_at: Timestamp) -> Result<WebhookEvent, WebhookError> {
    let delivery: WebhookDelivery =
        serde_json::from_slice(body).map_err(|err| WebhookError::Malformed(err.to_string()))?;
    let document = delivery
        .document_reference
        .parse::<DocumentKey>()
        .map_err(|err| WebhookError::Malformed(err.to_string()))?;
    if delivery.sequence_id == 0 {
        return Err(WebhookError::Malformed("sequence_id starts at 1".to_string()));
    }
    Ok(WebhookEvent {
        document,
        event_type: delivery.event_type,
        sequence_id: delivery.sequence_id,
        payload: delivery.payload,
        received_at,
        disposition: None,
    })
}

// ============================================================================
// SECTION: Ingestor
// ============================================================================

/// Construction parameters for [`WebhookIngestor`].
pub struct WebhookIngestorParams {
    /// Delivery authenticator.
    pub verifier: WebhookVerifier,
    /// Document store.
    pub documents: SharedDocumentStore,
    /// Event store.
    pub events: SharedWebhookEventStore,
    /// Authority status resolver for stale gaps.
    pub reconciler: Arc<dyn StatusReconciler + Send + Sync>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Audit sink.
    pub audit: SharedAuditSink,
    /// Age after which a buffered gap is reconciled.
    pub gap_timeout_ms: u64,
}

/// Ordered, de-duplicating webhook ingestor.
pub struct WebhookIngestor {
    /// Delivery authenticator.
    verifier: WebhookVerifier,
    /// Document store.
    documents: SharedDocumentStore,
    /// Event store.
    events: SharedWebhookEventStore,
    /// Authority status resolver for stale gaps.
    reconciler: Arc<dyn StatusReconciler + Send + Sync>,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Audit sink.
    audit: SharedAuditSink,
    /// Age after which a buffered gap is reconciled.
    gap_timeout_ms: u64,
    /// Serializes cursor reads and advances within the process.
    apply_lock: Mutex<()>,
}

impl WebhookIngestor {
    /// Creates an ingestor.
    #[must_use]
    pub fn new(params: WebhookIngestorParams) -> Self {
        Self {
            verifier: params.verifier,
            documents: params.documents,
            events: params.events,
            reconciler: params.reconciler,
            clock: params.clock,
            audit: params.audit,
            gap_timeout_ms: params.gap_timeout_ms,
            apply_lock: Mutex::new(()),
        }
    }

    /// Verifies and applies a raw delivery.
    ///
    /// Authentication failures are audited and nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError`] when verification or application fails.
    pub fn ingest(&self, delivery: &RawDelivery<'_>) -> Result<IngestOutcome, WebhookError> {
        let now = self.clock.now();
        let event = match self.verifier.verify(delivery, now) {
            Ok(event) => event,
            Err(err) => {
                self.audit.record(
                    &PipelineAuditEvent::new("webhook_rejected", now).message(err.to_string()),
                );
                return Err(err);
            }
        };
        self.apply(&event)
    }

    /// Applies a verified event.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError`] when the document is unknown or persistence fails.
    pub fn apply(&self, event: &WebhookEvent) -> Result<IngestOutcome, WebhookError> {
        let _guard = self
            .apply_lock
            .lock()
            .map_err(|_| StoreError::Store("webhook apply mutex poisoned".to_string()))?;
        if self.documents.load(&event.document)?.is_none() {
            return Err(WebhookError::UnknownDocument(event.document.to_string()));
        }
        let cursor = self.events.cursor(&event.document)?;
        if event.sequence_id <= cursor {
            self.audit_duplicate(event);
            return Ok(IngestOutcome::Duplicate);
        }
        let recorded = self.events.record(event)?;
        if event.sequence_id != cursor + 1 {
            if recorded == RecordOutcome::Duplicate {
                self.audit_duplicate(event);
                return Ok(IngestOutcome::Duplicate);
            }
            self.audit.record(
                &PipelineAuditEvent::new("webhook_buffered", self.clock.now())
                    .document(&event.document)
                    .sequence_id(event.sequence_id)
                    .message(format!("waiting for sequence {}", cursor + 1)),
            );
            return Ok(IngestOutcome::Buffered {
                expected: cursor + 1,
            });
        }
        let outcome = self.apply_one(event)?;
        let drained = self.drain(&event.document)?;
        Ok(match outcome {
            IngestOutcome::Applied {
                status, ..
            } => IngestOutcome::Applied {
                status,
                drained,
            },
            other => other,
        })
    }

    /// Closes gaps that stayed open longer than the gap timeout.
    ///
    /// For each affected document the authority is queried, the answer is
    /// applied forward-only, and buffered events are then settled in order.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError`] when the event store cannot be queried.
    pub fn reconcile_stale(&self) -> Result<Vec<ReconcileReport>, WebhookError> {
        let now = self.clock.now();
        let cutoff = now.saturating_sub_millis(self.gap_timeout_ms);
        let documents = self.events.stale_documents(cutoff)?;
        let mut reports = Vec::with_capacity(documents.len());
        for document in documents {
            let report = match self.reconciler.reconcile(&document) {
                Ok(status) => {
                    let settled = self.settle_after_reconcile(&document)?;
                    ReconcileReport {
                        document: document.to_string(),
                        status: Some(status),
                        settled,
                        error: None,
                    }
                }
                Err(error) => ReconcileReport {
                    document: document.to_string(),
                    status: None,
                    settled: 0,
                    error: Some(error),
                },
            };
            let mut event = PipelineAuditEvent::new("reconciliation", self.clock.now())
                .document(&document)
                .message(format!("gap reconciliation settled {} events", report.settled));
            if let Some(status) = report.status {
                event = event.status(status);
            }
            if let Some(error) = &report.error {
                event = event.message(error.clone());
            }
            self.audit.record(&event);
            reports.push(report);
        }
        Ok(reports)
    }

    // ------------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------------

    /// Applies buffered events that directly follow the cursor.
    fn drain(&self, document: &DocumentKey) -> Result<usize, WebhookError> {
        let mut drained = 0;
        loop {
            let cursor = self.events.cursor(document)?;
            let buffered = self.events.buffered(document)?;
            let Some(next) = buffered.into_iter().find(|event| event.sequence_id == cursor + 1)
            else {
                return Ok(drained);
            };
            self.apply_one(&next)?;
            drained += 1;
        }
    }

    /// Settles every buffered event after the document was reconciled.
    fn settle_after_reconcile(&self, document: &DocumentKey) -> Result<usize, WebhookError> {
        let _guard = self
            .apply_lock
            .lock()
            .map_err(|_| StoreError::Store("webhook apply mutex poisoned".to_string()))?;
        let buffered = self.events.buffered(document)?;
        let settled = buffered.len();
        for event in &buffered {
            self.apply_one(event)?;
        }
        Ok(settled)
    }

    /// Applies one event to its document and settles it.
    fn apply_one(&self, event: &WebhookEvent) -> Result<IngestOutcome, WebhookError> {
        let target = event.event_type.target_status();
        for _ in 0..MAX_APPLY_CONFLICTS {
            let mut document = self
                .documents
                .load(&event.document)?
                .ok_or_else(|| WebhookError::UnknownDocument(event.document.to_string()))?;
            let current = document.status();
            if current == target {
                self.settle(event, EventDisposition::Applied, current)?;
                return Ok(IngestOutcome::Applied {
                    status: current,
                    drained: 0,
                });
            }
            if !current.can_transition_to(target) {
                self.settle(event, EventDisposition::Discarded, current)?;
                return Ok(IngestOutcome::Discarded {
                    status: current,
                });
            }
            let now = self.clock.now();
            let transmission = document.transmission_mut();
            if event.payload.track_id.is_some() {
                transmission.track_id.clone_from(&event.payload.track_id);
            }
            if event.payload.code.is_some() {
                transmission.response_code.clone_from(&event.payload.code);
            }
            if event.payload.message.is_some() {
                transmission.response_message.clone_from(&event.payload.message);
            }
            if target.is_final() && transmission.validated_at.is_none() {
                transmission.validated_at = Some(now);
            }
            if event.event_type == WebhookEventType::Cancelled && document.cancellation().is_none()
            {
                document.record_cancellation(CancellationRecord {
                    cancellation_id: format!("webhook-{}", event.sequence_id),
                    cancelled_at: now,
                    code: event.payload.code.clone(),
                    message: event.payload.message.clone(),
                })?;
            }
            document.transition(target, now, format!("webhook sequence {}", event.sequence_id))?;
            document.advance_revision();
            match self.documents.update(&document) {
                Ok(()) => {
                    self.settle(event, EventDisposition::Applied, target)?;
                    return Ok(IngestOutcome::Applied {
                        status: target,
                        drained: 0,
                    });
                }
                Err(StoreError::Conflict(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Err(WebhookError::Contention(event.document.to_string()))
    }

    /// Settles an event and audits the disposition.
    fn settle(
        &self,
        event: &WebhookEvent,
        disposition: EventDisposition,
        status: DocumentStatus,
    ) -> Result<(), WebhookError> {
        self.events.settle(&event.document, event.sequence_id, disposition)?;
        let name = match disposition {
            EventDisposition::Applied => "webhook_applied",
            EventDisposition::Discarded | EventDisposition::Superseded => "webhook_discarded",
        };
        self.audit.record(
            &PipelineAuditEvent::new(name, self.clock.now())
                .document(&event.document)
                .status(status)
                .sequence_id(event.sequence_id)
                .code(event.payload.code.as_deref())
                .message(event.event_type.as_str()),
        );
        Ok(())
    }

    /// Audits a duplicate or already-settled event.
    fn audit_duplicate(&self, event: &WebhookEvent) {
        self.audit.record(
            &PipelineAuditEvent::new("webhook_duplicate", self.clock.now())
                .document(&event.document)
                .sequence_id(event.sequence_id),
        );
    }
}
