// crates/epayroll-core/src/core/document.rs
// ============================================================================
// Module: Electronic Payroll Document
// Description: The regulated document, its seal, and its transmission record.
// Purpose: Hold document content and guard write-once and lifecycle invariants.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`ElectronicPayrollDocument`] is the unit persisted by the document store.
//! Content fields are public and fixed at build time. Derived artifacts
//! (canonical XML, CUNE, signature, signed XML), the lifecycle status, and the
//! revision are private and change only through guarded methods:
//!
//! - Canonical bytes and the seal are written once.
//! - Status changes follow the lifecycle table and are appended to history.
//! - The revision increments once per persisted update and drives
//!   compare-and-set in stores.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::hashing::HashAlgorithm;
use crate::core::hashing::HashDigest;
use crate::core::hashing::hash_bytes;
use crate::core::identifiers::DocumentKey;
use crate::core::identifiers::TrackId;
use crate::core::lifecycle::DocumentStatus;
use crate::core::lifecycle::InvalidTransition;
use crate::core::lifecycle::check_transition;
use crate::core::money::Amount;
use crate::core::payroll::DeductionLine;
use crate::core::payroll::EarningLine;
use crate::core::payroll::EmployeeInfo;
use crate::core::payroll::Environment;
use crate::core::payroll::PayrollPeriod;
use crate::core::payroll::PayrollTotals;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Document Type
// ============================================================================

/// Kind of payroll document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Regular per-employee, per-period document.
    Individual,
    /// Adjustment correcting a previously issued document.
    Adjustment,
}

impl DocumentType {
    /// Returns the type code embedded in the CUNE.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Individual => "102",
            Self::Adjustment => "103",
        }
    }

    /// Returns the stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Adjustment => "adjustment",
        }
    }
}

// ============================================================================
// SECTION: Content
// ============================================================================

/// Employer and software identity captured at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployerInfo {
    /// Employer tax identifier.
    pub tax_id: String,
    /// Employer legal name.
    pub legal_name: String,
    /// Registered software identifier.
    pub software_id: String,
}

/// Section of the original document an adjustment line targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSection {
    /// Earnings section.
    Earning,
    /// Deductions section.
    Deduction,
}

impl LineSection {
    /// Returns the stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Earning => "earning",
            Self::Deduction => "deduction",
        }
    }
}

/// Correction of one line of the original document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentLine {
    /// Section of the targeted line.
    pub section: LineSection,
    /// Zero-based position of the targeted line within its section.
    pub index: u32,
    /// Replacement amount.
    pub corrected_amount: Amount,
    /// Replacement percentage for rate-based deductions.
    #[serde(default)]
    pub corrected_percentage: Option<Amount>,
}

/// Link from an adjustment to the document it corrects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentDetails {
    /// Key of the original document.
    pub original: DocumentKey,
    /// Consecutive printed on the original.
    pub original_consecutive: String,
    /// CUNE of the original.
    pub original_cune: String,
    /// Issue date of the original (`YYYY-MM-DD`).
    pub original_issue_date: String,
    /// Corrections in request order.
    pub lines: Vec<AdjustmentLine>,
    /// Optional operator note.
    #[serde(default)]
    pub reason: Option<String>,
}

// ============================================================================
// SECTION: Seal
// ============================================================================

/// Cryptographic signature attached to a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlock {
    /// Signature algorithm label.
    pub algorithm: String,
    /// Digest algorithm label.
    pub digest_algorithm: String,
    /// Base64 digest of the canonical bytes.
    pub digest_value: String,
    /// Canonical JSON that was signed.
    pub signed_info: String,
    /// Base64 signature over `signed_info`.
    pub signature_value: String,
    /// Serial of the signing certificate.
    pub certificate_serial: String,
    /// Hex SHA-256 fingerprint of the certificate public key.
    pub certificate_fingerprint: String,
    /// Time the signature was produced.
    pub signing_time: Timestamp,
}

/// CUNE, signature, and signed XML recorded together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSeal {
    /// Unique electronic payroll code.
    pub cune: String,
    /// Signature block.
    pub signature: SignatureBlock,
    /// Signed XML rendering.
    pub xml_signed: String,
}

// ============================================================================
// SECTION: Transmission Records
// ============================================================================

/// Remote interaction state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionState {
    /// Tracking id assigned by the authority.
    pub track_id: Option<TrackId>,
    /// Last response code, verbatim.
    pub response_code: Option<String>,
    /// Last response message, verbatim.
    pub response_message: Option<String>,
    /// Submission attempts made so far.
    pub attempt_count: u32,
    /// Time of the most recent attempt.
    pub last_attempt_at: Option<Timestamp>,
    /// Time the authority's final decision was recorded.
    pub validated_at: Option<Timestamp>,
}

/// Record of a cancellation accepted by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRecord {
    /// Cancellation identifier assigned by the authority.
    pub cancellation_id: String,
    /// Time the cancellation was recorded.
    pub cancelled_at: Timestamp,
    /// Response code, verbatim.
    pub code: Option<String>,
    /// Response message, verbatim.
    pub message: Option<String>,
}

/// One entry of the append-only status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Status before the change.
    pub from: DocumentStatus,
    /// Status after the change.
    pub to: DocumentStatus,
    /// Time of the change.
    pub at: Timestamp,
    /// Short cause label.
    pub reason: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by guarded document mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// Canonical bytes were already recorded with different content.
    #[error("canonical bytes already recorded for {0}")]
    CanonicalAlreadySet(String),
    /// Seal requested before canonical bytes exist.
    #[error("document {0} has not been serialized")]
    NotSerialized(String),
    /// Seal was already recorded.
    #[error("document {0} is already signed")]
    AlreadySigned(String),
    /// Cancellation was already recorded.
    #[error("document {0} is already cancelled")]
    AlreadyCancelled(String),
    /// Lifecycle transition rejected.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

// ============================================================================
// SECTION: Document
// ============================================================================

/// Inputs for a freshly reserved draft.
#[derive(Debug, Clone)]
pub struct DraftParams {
    /// Reserved key.
    pub key: DocumentKey,
    /// Document kind.
    pub document_type: DocumentType,
    /// Schema version to stamp.
    pub schema_version: String,
    /// Target environment.
    pub environment: Environment,
    /// Issue instant.
    pub issued_at: Timestamp,
    /// Offset used to render issue date and time.
    pub utc_offset_minutes: i16,
    /// Upstream payroll identifier.
    pub payroll_id: String,
    /// Employer identity.
    pub employer: EmployerInfo,
    /// Employee identity.
    pub employee: EmployeeInfo,
    /// Settlement period.
    pub period: PayrollPeriod,
    /// Earnings.
    pub earnings: Vec<EarningLine>,
    /// Deductions.
    pub deductions: Vec<DeductionLine>,
    /// Totals.
    pub totals: PayrollTotals,
    /// Adjustment linkage, for adjustments only.
    pub adjustment: Option<AdjustmentDetails>,
}

/// Regulated electronic payroll document.
///
/// # Invariants
/// - `xml_unsigned` and the seal fields are written at most once.
/// - `status` only changes through [`ElectronicPayrollDocument::transition`].
/// - `revision` increases by one for every persisted update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectronicPayrollDocument {
    /// Document key.
    pub key: DocumentKey,
    /// Document kind.
    pub document_type: DocumentType,
    /// Schema version.
    pub schema_version: String,
    /// Target environment.
    pub environment: Environment,
    /// Issue instant.
    pub issued_at: Timestamp,
    /// Offset used to render issue date and time.
    pub utc_offset_minutes: i16,
    /// Upstream payroll identifier.
    pub payroll_id: String,
    /// Employer identity.
    pub employer: EmployerInfo,
    /// Employee identity.
    pub employee: EmployeeInfo,
    /// Settlement period.
    pub period: PayrollPeriod,
    /// Earnings.
    pub earnings: Vec<EarningLine>,
    /// Deductions.
    pub deductions: Vec<DeductionLine>,
    /// Totals copied from the payroll record.
    pub totals: PayrollTotals,
    /// Adjustment linkage.
    pub adjustment: Option<AdjustmentDetails>,
    /// Lifecycle status.
    status: DocumentStatus,
    /// Persisted revision used for compare-and-set.
    revision: u64,
    /// Canonical XML without the authentication block.
    xml_unsigned: Option<String>,
    /// Digest of `xml_unsigned`.
    canonical_hash: Option<HashDigest>,
    /// Unique electronic payroll code.
    cune: Option<String>,
    /// Signature over the canonical bytes.
    signature: Option<SignatureBlock>,
    /// Canonical XML with the authentication block.
    xml_signed: Option<String>,
    /// Remote interaction state.
    transmission: TransmissionState,
    /// Cancellation record, once cancelled.
    cancellation: Option<CancellationRecord>,
    /// Append-only status history.
    history: Vec<StatusChange>,
}

impl ElectronicPayrollDocument {
    /// Creates a draft document at revision zero.
    #[must_use]
    pub fn draft(params: DraftParams) -> Self {
        Self {
            key: params.key,
            document_type: params.document_type,
            schema_version: params.schema_version,
            environment: params.environment,
            issued_at: params.issued_at,
            utc_offset_minutes: params.utc_offset_minutes,
            payroll_id: params.payroll_id,
            employer: params.employer,
            employee: params.employee,
            period: params.period,
            earnings: params.earnings,
            deductions: params.deductions,
            totals: params.totals,
            adjustment: params.adjustment,
            status: DocumentStatus::Draft,
            revision: 0,
            xml_unsigned: None,
            canonical_hash: None,
            cune: None,
            signature: None,
            xml_signed: None,
            transmission: TransmissionState::default(),
            cancellation: None,
            history: Vec::new(),
        }
    }

    /// Returns the current status.
    #[must_use]
    pub const fn status(&self) -> DocumentStatus {
        self.status
    }

    /// Returns the persisted revision.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Marks the document as one update ahead of its persisted revision.
    pub const fn advance_revision(&mut self) {
        self.revision += 1;
    }

    /// Returns the unsigned canonical XML.
    #[must_use]
    pub fn xml_unsigned(&self) -> Option<&str> {
        self.xml_unsigned.as_deref()
    }

    /// Returns the canonical bytes that were hashed and signed.
    #[must_use]
    pub fn canonical_bytes(&self) -> Option<&[u8]> {
        self.xml_unsigned.as_deref().map(str::as_bytes)
    }

    /// Returns the SHA-256 digest of the canonical bytes.
    #[must_use]
    pub const fn canonical_hash(&self) -> Option<&HashDigest> {
        self.canonical_hash.as_ref()
    }

    /// Returns the CUNE.
    #[must_use]
    pub fn cune(&self) -> Option<&str> {
        self.cune.as_deref()
    }

    /// Returns the signature block.
    #[must_use]
    pub const fn signature(&self) -> Option<&SignatureBlock> {
        self.signature.as_ref()
    }

    /// Returns the signed XML.
    #[must_use]
    pub fn xml_signed(&self) -> Option<&str> {
        self.xml_signed.as_deref()
    }

    /// Returns the transmission record.
    #[must_use]
    pub const fn transmission(&self) -> &TransmissionState {
        &self.transmission
    }

    /// Returns the transmission record for update.
    pub const fn transmission_mut(&mut self) -> &mut TransmissionState {
        &mut self.transmission
    }

    /// Returns the cancellation record.
    #[must_use]
    pub const fn cancellation(&self) -> Option<&CancellationRecord> {
        self.cancellation.as_ref()
    }

    /// Returns the status history.
    #[must_use]
    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    /// Records the canonical XML.
    ///
    /// Recording identical bytes again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::CanonicalAlreadySet`] when different bytes exist.
    pub fn record_canonical(&mut self, xml: String) -> Result<(), DocumentError> {
        match &self.xml_unsigned {
            Some(existing) if *existing == xml => Ok(()),
            Some(_) => Err(DocumentError::CanonicalAlreadySet(self.key.to_string())),
            None => {
                self.canonical_hash = Some(hash_bytes(HashAlgorithm::Sha256, xml.as_bytes()));
                self.xml_unsigned = Some(xml);
                Ok(())
            }
        }
    }

    /// Records the CUNE, signature, and signed XML.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] when the document is unserialized or already sealed.
    pub fn record_seal(&mut self, seal: DocumentSeal) -> Result<(), DocumentError> {
        if self.xml_unsigned.is_none() {
            return Err(DocumentError::NotSerialized(self.key.to_string()));
        }
        if self.cune.is_some() || self.signature.is_some() || self.xml_signed.is_some() {
            return Err(DocumentError::AlreadySigned(self.key.to_string()));
        }
        self.cune = Some(seal.cune);
        self.signature = Some(seal.signature);
        self.xml_signed = Some(seal.xml_signed);
        Ok(())
    }

    /// Records a cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::AlreadyCancelled`] when a record exists.
    pub fn record_cancellation(&mut self, record: CancellationRecord) -> Result<(), DocumentError> {
        if self.cancellation.is_some() {
            return Err(DocumentError::AlreadyCancelled(self.key.to_string()));
        }
        self.cancellation = Some(record);
        Ok(())
    }

    /// Moves the document to a new status and appends a history entry.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when the lifecycle table forbids the change.
    pub fn transition(
        &mut self,
        to: DocumentStatus,
        at: Timestamp,
        reason: impl Into<String>,
    ) -> Result<(), InvalidTransition> {
        check_transition(self.status, to)?;
        self.history.push(StatusChange {
            from: self.status,
            to,
            at,
            reason: reason.into(),
        });
        self.status = to;
        Ok(())
    }

    /// Returns the externally visible status view.
    #[must_use]
    pub fn status_view(&self) -> DocumentStatusView {
        DocumentStatusView {
            key: self.key.to_string(),
            document_type: self.document_type,
            status: self.status,
            cune: self.cune.clone(),
            track_id: self.transmission.track_id.clone(),
            response_code: self.transmission.response_code.clone(),
            response_message: self.transmission.response_message.clone(),
            attempt_count: self.transmission.attempt_count,
            issued_at: self.issued_at,
            last_attempt_at: self.transmission.last_attempt_at,
            validated_at: self.transmission.validated_at,
            cancellation: self.cancellation.clone(),
            revision: self.revision,
        }
    }
}

// ============================================================================
// SECTION: Status View
// ============================================================================

/// Caller-facing summary of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStatusView {
    /// Document key as `org/prefix/number`.
    pub key: String,
    /// Document kind.
    pub document_type: DocumentType,
    /// Lifecycle status.
    pub status: DocumentStatus,
    /// CUNE once signed.
    pub cune: Option<String>,
    /// Authority tracking id.
    pub track_id: Option<TrackId>,
    /// Last response code, verbatim.
    pub response_code: Option<String>,
    /// Last response message, verbatim.
    pub response_message: Option<String>,
    /// Submission attempts made so far.
    pub attempt_count: u32,
    /// Issue instant.
    pub issued_at: Timestamp,
    /// Time of the most recent attempt.
    pub last_attempt_at: Option<Timestamp>,
    /// Time the final decision was recorded.
    pub validated_at: Option<Timestamp>,
    /// Cancellation record.
    pub cancellation: Option<CancellationRecord>,
    /// Persisted revision.
    pub revision: u64,
}
