// crates/epayroll-core/src/core/webhook.rs
// ============================================================================
// Module: Webhook Events
// Description: Authority status notifications and their ingestion outcomes.
// Purpose: Describe events as stored for ordering, de-duplication, and replay.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Authority notifications carry a per-document, strictly increasing
//! `sequence_id` starting at 1. Events are stored keyed by
//! `(document, sequence_id)`; the pair is the de-duplication key. The
//! per-document cursor records the highest sequence id that has been settled.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::DocumentKey;
use crate::core::identifiers::TrackId;
use crate::core::lifecycle::DocumentStatus;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Event Types
// ============================================================================

/// Kind of status notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// The authority is still processing the document.
    Pending,
    /// The authority accepted the document.
    Accepted,
    /// The authority rejected the document.
    Rejected,
    /// The authority cancelled the document.
    Cancelled,
}

impl WebhookEventType {
    /// Returns the document status this event drives toward.
    #[must_use]
    pub const fn target_status(self) -> DocumentStatus {
        match self {
            Self::Pending => DocumentStatus::Pending,
            Self::Accepted => DocumentStatus::Accepted,
            Self::Rejected => DocumentStatus::Rejected,
            Self::Cancelled => DocumentStatus::Cancelled,
        }
    }

    /// Returns the stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Optional fields delivered with an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Tracking id assigned by the authority.
    #[serde(default)]
    pub track_id: Option<TrackId>,
    /// Response code, verbatim.
    #[serde(default)]
    pub code: Option<String>,
    /// Response message, verbatim.
    #[serde(default)]
    pub message: Option<String>,
}

/// How a stored event was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDisposition {
    /// The event moved the document or matched its current status.
    Applied,
    /// The event would have regressed a final status and was ignored.
    Discarded,
    /// Reconciliation settled the document before the event was applied.
    Superseded,
}

impl EventDisposition {
    /// Returns the stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Discarded => "discarded",
            Self::Superseded => "superseded",
        }
    }

    /// Parses a stable label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        [Self::Applied, Self::Discarded, Self::Superseded]
            .into_iter()
            .find(|value| value.as_str() == label)
    }
}

// ============================================================================
// SECTION: Event Record
// ============================================================================

/// Verified status notification.
///
/// # Invariants
/// - `sequence_id >= 1`.
/// - `(document, sequence_id)` is unique in the event store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Document the event refers to.
    pub document: DocumentKey,
    /// Event kind.
    pub event_type: WebhookEventType,
    /// Per-document sequence id.
    pub sequence_id: u64,
    /// Delivered fields.
    pub payload: WebhookPayload,
    /// Time the event was received.
    pub received_at: Timestamp,
    /// Settlement outcome once the cursor passes the event.
    #[serde(default)]
    pub disposition: Option<EventDisposition>,
}

impl WebhookEvent {
    /// Returns true once the event has been settled.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.disposition.is_some()
    }
}

/// Result of recording an event in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The event was stored for the first time.
    Inserted,
    /// An event with the same key already exists.
    Duplicate,
}
