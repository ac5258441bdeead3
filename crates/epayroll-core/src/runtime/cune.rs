// crates/epayroll-core/src/runtime/cune.rs
// ============================================================================
// Module: CUNE Derivation
// Description: Unique electronic payroll code computation.
// Purpose: Derive the SHA-384 code the authority uses to identify a document.
// Dependencies: sha2, crate::core
// ============================================================================

//! ## Overview
//! The CUNE is the lowercase SHA-384 hex digest of a fixed concatenation of
//! document values, rendered exactly as they appear in the canonical XML:
//!
//! `Consecutive ‖ IssueDate ‖ IssueTime ‖ Gross ‖ Deductions ‖ Net ‖
//! EmployerTaxId ‖ EmployeeDocumentNumber ‖ TypeCode ‖ SoftwarePin ‖ EnvCode`
//!
//! The software PIN is an input only; it never appears in the document.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::ElectronicPayrollDocument;
use crate::core::HashAlgorithm;
use crate::core::TimeError;
use crate::core::hash_bytes;
use crate::core::time::issue_moment;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Ordered CUNE input values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuneInput {
    /// Prefix followed by sequence number.
    pub consecutive: String,
    /// Issue date (`YYYY-MM-DD`).
    pub issue_date: String,
    /// Issue time (`HH:MM:SS±hh:mm`).
    pub issue_time: String,
    /// Gross total, canonical text.
    pub gross: String,
    /// Deductions total, canonical text.
    pub deductions: String,
    /// Net total, canonical text.
    pub net: String,
    /// Employer tax identifier.
    pub employer_tax_id: String,
    /// Employee document number.
    pub employee_document: String,
    /// Document type code.
    pub type_code: &'static str,
    /// Software PIN.
    pub software_pin: String,
    /// Environment code.
    pub environment_code: &'static str,
}

impl CuneInput {
    /// Collects the CUNE inputs from a document.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError`] when the issue instant cannot be rendered.
    pub fn from_document(
        document: &ElectronicPayrollDocument,
        software_pin: &str,
    ) -> Result<Self, TimeError> {
        let moment = issue_moment(document.issued_at, document.utc_offset_minutes)?;
        Ok(Self {
            consecutive: document.key.consecutive(),
            issue_date: moment.date,
            issue_time: moment.time,
            gross: document.totals.gross.canonical(),
            deductions: document.totals.deductions.canonical(),
            net: document.totals.net.canonical(),
            employer_tax_id: document.employer.tax_id.clone(),
            employee_document: document.employee.document_number.clone(),
            type_code: document.document_type.code(),
            software_pin: software_pin.to_string(),
            environment_code: document.environment.code(),
        })
    }

    /// Returns the concatenated hash input.
    #[must_use]
    pub fn concatenated(&self) -> String {
        [
            self.consecutive.as_str(),
            &self.issue_date,
            &self.issue_time,
            &self.gross,
            &self.deductions,
            &self.net,
            &self.employer_tax_id,
            &self.employee_document,
            self.type_code,
            &self.software_pin,
            self.environment_code,
        ]
        .concat()
    }

    /// Computes the CUNE.
    #[must_use]
    pub fn compute(&self) -> String {
        hash_bytes(HashAlgorithm::Sha384, self.concatenated().as_bytes()).value
    }
}

/// Computes the CUNE of a document.
///
/// # Errors
///
/// Returns [`TimeError`] when the issue instant cannot be rendered.
pub fn compute_cune(
    document: &ElectronicPayrollDocument,
    software_pin: &str,
) -> Result<String, TimeError> {
    Ok(CuneInput::from_document(document, software_pin)?.compute())
}
