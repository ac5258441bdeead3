// crates/epayroll-core/src/runtime/builder.rs
// ============================================================================
// Module: Document Builder
// Description: Turns payroll records into draft documents with reserved numbers.
// Purpose: Validate inputs, reserve numbering, and persist the draft.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The builder validates everything it can before reserving a sequence
//! number, so invalid input never consumes a number. Amounts are copied
//! verbatim from the payroll record; the builder only checks that the
//! declared totals balance. Adjustments copy the original's content, apply
//! line corrections, and link back to the original's consecutive and CUNE.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use thiserror::Error;

use crate::core::AdjustmentDetails;
use crate::core::AdjustmentLine;
use crate::core::ConfigurationProfile;
use crate::core::DocumentKey;
use crate::core::DocumentStatus;
use crate::core::DocumentType;
use crate::core::DraftParams;
use crate::core::ElectronicPayrollDocument;
use crate::core::EmployerInfo;
use crate::core::LineSection;
use crate::core::PayrollRecord;
use crate::core::PayrollTotals;
use crate::core::TimeError;
use crate::core::time::issue_moment;
use crate::core::time::parse_calendar_date;
use crate::core::validate_identifier_text;
use crate::interfaces::Clock;
use crate::interfaces::DocumentStore;
use crate::interfaces::NumberingError;
use crate::interfaces::NumberingStore;
use crate::interfaces::StoreError;
use crate::runtime::audit::PipelineAuditEvent;
use crate::runtime::audit::SharedAuditSink;
use crate::runtime::store::SharedDocumentStore;
use crate::runtime::store::SharedNumberingStore;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Document building errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Payroll record and profile belong to different organizations.
    #[error("payroll organization {payroll} does not match profile organization {profile}")]
    OrganizationMismatch {
        /// Organization on the payroll record.
        payroll: String,
        /// Organization on the profile.
        profile: String,
    },
    /// A required legal identity field is empty.
    #[error("missing legal identity field: {0}")]
    MissingLegalIdentity(String),
    /// No sequence number remains in the registered ranges.
    #[error(transparent)]
    RangeExhausted(NumberingError),
    /// Numbering store failure.
    #[error("numbering failure: {0}")]
    Numbering(String),
    /// Payroll content is malformed.
    #[error("malformed payroll: {0}")]
    MalformedPayroll(String),
    /// Declared totals do not balance.
    #[error("totals mismatch: gross {gross} - deductions {deductions} != net {net}")]
    TotalsMismatch {
        /// Gross total.
        gross: String,
        /// Deductions total.
        deductions: String,
        /// Net total.
        net: String,
    },
    /// Adjustment carries no lines.
    #[error("adjustment has no lines")]
    EmptyAdjustment,
    /// Adjustment line does not reference an existing original line.
    #[error("invalid adjustment line: {0}")]
    InvalidAdjustmentLine(String),
    /// Original document has no remote decision yet.
    #[error("original document {document} is {status}; adjustments need accepted or rejected")]
    OriginalNotSettled {
        /// Original document key.
        document: String,
        /// Original status.
        status: DocumentStatus,
    },
    /// Original document does not exist.
    #[error("original document not found: {0}")]
    OriginalNotFound(String),
    /// Issue date could not be rendered.
    #[error(transparent)]
    Time(#[from] TimeError),
    /// Document store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<NumberingError> for BuildError {
    fn from(err: NumberingError) -> Self {
        match err {
            NumberingError::RangeExhausted {
                ..
            } => Self::RangeExhausted(err),
            other => Self::Numbering(other.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Corrections requested for an adjustment document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentRequest {
    /// Key of the document being corrected.
    pub original: DocumentKey,
    /// Line corrections in request order.
    pub lines: Vec<AdjustmentLine>,
    /// Corrected totals computed upstream.
    pub corrected_totals: PayrollTotals,
    /// Optional operator note.
    pub reason: Option<String>,
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Builds and persists draft documents.
pub struct DocumentBuilder {
    /// Sequence number allocator.
    numbering: SharedNumberingStore,
    /// Document store.
    store: SharedDocumentStore,
    /// Time source for issue instants.
    clock: Arc<dyn Clock>,
    /// Audit sink.
    audit: SharedAuditSink,
}

impl DocumentBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(
        numbering: SharedNumberingStore,
        store: SharedDocumentStore,
        clock: Arc<dyn Clock>,
        audit: SharedAuditSink,
    ) -> Self {
        Self {
            numbering,
            store,
            clock,
            audit,
        }
    }

    /// Builds a draft document from a payroll record.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] when validation fails, numbering is exhausted,
    /// or the draft cannot be persisted. Validation failures never consume a
    /// sequence number.
    pub fn build(
        &self,
        payroll: &PayrollRecord,
        profile: &ConfigurationProfile,
    ) -> Result<ElectronicPayrollDocument, BuildError> {
        if payroll.organization_id != profile.organization_id {
            return Err(BuildError::OrganizationMismatch {
                payroll: payroll.organization_id.to_string(),
                profile: profile.organization_id.to_string(),
            });
        }
        validate_profile(profile)?;
        validate_payroll(payroll)?;
        ensure_balanced(&payroll.totals)?;

        let issued_at = self.clock.now();
        issue_moment(issued_at, profile.utc_offset_minutes)?;
        let number = self.numbering.reserve(&profile.organization_id, &profile.prefix)?;
        let document = ElectronicPayrollDocument::draft(DraftParams {
            key: DocumentKey::new(profile.organization_id.clone(), profile.prefix.clone(), number),
            document_type: DocumentType::Individual,
            schema_version: profile.schema_version.clone(),
            environment: profile.environment,
            issued_at,
            utc_offset_minutes: profile.utc_offset_minutes,
            payroll_id: payroll.payroll_id.clone(),
            employer: employer_info(profile),
            employee: payroll.employee.clone(),
            period: payroll.period.clone(),
            earnings: payroll.earnings.clone(),
            deductions: payroll.deductions.clone(),
            totals: payroll.totals.clone(),
            adjustment: None,
        });
        self.store.insert(&document)?;
        self.audit.record(
            &PipelineAuditEvent::new("document_built", issued_at)
                .document(&document.key)
                .status(DocumentStatus::Draft)
                .message(DocumentType::Individual.as_str()),
        );
        Ok(document)
    }

    /// Builds a draft adjustment document correcting a settled original.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] when the original is missing or unsettled, the
    /// request is empty or references unknown lines, totals do not balance,
    /// or numbering is exhausted.
    pub fn build_adjustment(
        &self,
        request: &AdjustmentRequest,
        profile: &ConfigurationProfile,
    ) -> Result<ElectronicPayrollDocument, BuildError> {
        validate_profile(profile)?;
        if request.original.organization_id != profile.organization_id {
            return Err(BuildError::OrganizationMismatch {
                payroll: request.original.organization_id.to_string(),
                profile: profile.organization_id.to_string(),
            });
        }
        let original = self
            .store
            .load(&request.original)?
            .ok_or_else(|| BuildError::OriginalNotFound(request.original.to_string()))?;
        let status = original.status();
        let Some(original_cune) = original.cune().filter(|_| {
            matches!(status, DocumentStatus::Accepted | DocumentStatus::Rejected)
        }) else {
            return Err(BuildError::OriginalNotSettled {
                document: original.key.to_string(),
                status,
            });
        };
        if request.lines.is_empty() {
            return Err(BuildError::EmptyAdjustment);
        }
        ensure_balanced(&request.corrected_totals)?;

        let mut earnings = original.earnings.clone();
        let mut deductions = original.deductions.clone();
        for line in &request.lines {
            let index = usize::try_from(line.index).unwrap_or(usize::MAX);
            let unknown = || {
                BuildError::InvalidAdjustmentLine(format!(
                    "{} line {} does not exist on {}",
                    line.section.as_str(),
                    line.index,
                    original.key
                ))
            };
            match line.section {
                LineSection::Earning => {
                    let target = earnings.get_mut(index).ok_or_else(unknown)?;
                    if line.corrected_percentage.is_some() {
                        return Err(BuildError::InvalidAdjustmentLine(format!(
                            "earning line {} cannot carry a percentage",
                            line.index
                        )));
                    }
                    target.amount = line.corrected_amount.clone();
                }
                LineSection::Deduction => {
                    let target = deductions.get_mut(index).ok_or_else(unknown)?;
                    target.amount = line.corrected_amount.clone();
                    if line.corrected_percentage.is_some() {
                        target.percentage.clone_from(&line.corrected_percentage);
                    }
                }
            }
        }

        let original_moment = issue_moment(original.issued_at, original.utc_offset_minutes)?;
        let adjustment = AdjustmentDetails {
            original: original.key.clone(),
            original_consecutive: original.key.consecutive(),
            original_cune: original_cune.to_string(),
            original_issue_date: original_moment.date,
            lines: request.lines.clone(),
            reason: request.reason.clone(),
        };

        let issued_at = self.clock.now();
        issue_moment(issued_at, profile.utc_offset_minutes)?;
        let number = self.numbering.reserve(&profile.organization_id, &profile.prefix)?;
        let document = ElectronicPayrollDocument::draft(DraftParams {
            key: DocumentKey::new(profile.organization_id.clone(), profile.prefix.clone(), number),
            document_type: DocumentType::Adjustment,
            schema_version: profile.schema_version.clone(),
            environment: profile.environment,
            issued_at,
            utc_offset_minutes: profile.utc_offset_minutes,
            payroll_id: original.payroll_id.clone(),
            employer: employer_info(profile),
            employee: original.employee.clone(),
            period: original.period.clone(),
            earnings,
            deductions,
            totals: request.corrected_totals.clone(),
            adjustment: Some(adjustment),
        });
        self.store.insert(&document)?;
        self.audit.record(
            &PipelineAuditEvent::new("document_built", issued_at)
                .document(&document.key)
                .status(DocumentStatus::Draft)
                .message(format!("adjustment of {}", original.key)),
        );
        Ok(document)
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates the profile's identifiers and legal identity.
fn validate_profile(profile: &ConfigurationProfile) -> Result<(), BuildError> {
    if let Some(field) = profile.legal.first_missing_field() {
        return Err(BuildError::MissingLegalIdentity(field.to_string()));
    }
    validate_identifier_text("organization id", profile.organization_id.as_str())
        .and_then(|()| validate_identifier_text("document prefix", profile.prefix.as_str()))
        .map_err(|err| BuildError::MalformedPayroll(err.to_string()))
}

/// Validates payroll content that the document depends on.
fn validate_payroll(payroll: &PayrollRecord) -> Result<(), BuildError> {
    if payroll.employee.document_number.trim().is_empty() {
        return Err(BuildError::MalformedPayroll("employee document number is empty".to_string()));
    }
    if payroll.earnings.is_empty() {
        return Err(BuildError::MalformedPayroll("payroll has no earnings".to_string()));
    }
    let start = parse_calendar_date(&payroll.period.start_date)
        .map_err(|err| BuildError::MalformedPayroll(err.to_string()))?;
    let end = parse_calendar_date(&payroll.period.end_date)
        .map_err(|err| BuildError::MalformedPayroll(err.to_string()))?;
    if end < start {
        return Err(BuildError::MalformedPayroll(format!(
            "period ends {} before it starts {}",
            payroll.period.end_date, payroll.period.start_date
        )));
    }
    Ok(())
}

/// Checks `gross - deductions == net`.
fn ensure_balanced(totals: &PayrollTotals) -> Result<(), BuildError> {
    if totals.is_balanced() {
        return Ok(());
    }
    Err(BuildError::TotalsMismatch {
        gross: totals.gross.canonical(),
        deductions: totals.deductions.canonical(),
        net: totals.net.canonical(),
    })
}

/// Copies the employer identity from the profile.
fn employer_info(profile: &ConfigurationProfile) -> EmployerInfo {
    EmployerInfo {
        tax_id: profile.legal.employer_tax_id.clone(),
        legal_name: profile.legal.employer_name.clone(),
        software_id: profile.legal.software_id.clone(),
    }
}
