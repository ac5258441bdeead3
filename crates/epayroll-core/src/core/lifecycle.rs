// crates/epayroll-core/src/core/lifecycle.rs
// ============================================================================
// Module: Document Lifecycle
// Description: Document status values and the allowed transition table.
// Purpose: Make every status change explicit and reject illegal ones.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A document moves forward through a fixed set of statuses. Only the
//! transitions listed in [`DocumentStatus::can_transition_to`] are legal; the
//! final statuses (`Accepted` awaiting cancellation aside) never regress.
//!
//! `Error` marks an interrupted or failed attempt that may be retried.
//! `Failed` is terminal for automatic retries and only a manual resubmission
//! may leave it toward `Submitting`. Remote outcomes learned out of band
//! (webhooks, reconciliation queries) may still settle `Error` and `Failed`
//! documents because the authority may have received an earlier attempt.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Lifecycle status of a payroll document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Number reserved and content captured; not yet serialized.
    Draft,
    /// Canonical XML produced.
    Generated,
    /// CUNE and signature attached.
    Signed,
    /// A submission attempt is in flight or its outcome is unknown.
    Submitting,
    /// The authority received the document and has not decided yet.
    Pending,
    /// The authority accepted the document.
    Accepted,
    /// The authority rejected the document.
    Rejected,
    /// The accepted document was cancelled.
    Cancelled,
    /// The last attempt failed and may be retried.
    Error,
    /// The document failed permanently for automatic processing.
    Failed,
}

/// Every status in lifecycle order.
pub const ALL_STATUSES: [DocumentStatus; 10] = [
    DocumentStatus::Draft,
    DocumentStatus::Generated,
    DocumentStatus::Signed,
    DocumentStatus::Submitting,
    DocumentStatus::Pending,
    DocumentStatus::Accepted,
    DocumentStatus::Rejected,
    DocumentStatus::Cancelled,
    DocumentStatus::Error,
    DocumentStatus::Failed,
];

impl DocumentStatus {
    /// Returns true when the transition `self -> next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Generated)
                | (Self::Generated, Self::Signed | Self::Failed)
                | (Self::Signed | Self::Error, Self::Submitting)
                | (Self::Submitting, Self::Pending | Self::Accepted | Self::Rejected | Self::Error)
                | (Self::Error, Self::Failed | Self::Pending | Self::Accepted | Self::Rejected)
                | (Self::Failed, Self::Submitting | Self::Pending | Self::Accepted | Self::Rejected)
                | (Self::Pending, Self::Accepted | Self::Rejected)
                | (Self::Accepted, Self::Cancelled)
        )
    }

    /// Returns true for statuses that carry a remote decision.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Cancelled)
    }

    /// Returns true when no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled)
    }

    /// Returns true when the automatic retry sweep may resubmit the document.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Error)
    }

    /// Returns the stable label used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Generated => "generated",
            Self::Signed => "signed",
            Self::Submitting => "submitting",
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
            Self::Failed => "failed",
        }
    }

    /// Parses a stable label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        ALL_STATUSES.into_iter().find(|status| status.as_str() == label)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Error raised when a transition is not in the allowed table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition {from} -> {to}")]
pub struct InvalidTransition {
    /// Current status.
    pub from: DocumentStatus,
    /// Requested status.
    pub to: DocumentStatus,
}

/// Validates a transition.
///
/// # Errors
///
/// Returns [`InvalidTransition`] when `from -> to` is not allowed.
pub const fn check_transition(
    from: DocumentStatus,
    to: DocumentStatus,
) -> Result<(), InvalidTransition> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(InvalidTransition {
            from,
            to,
        })
    }
}
