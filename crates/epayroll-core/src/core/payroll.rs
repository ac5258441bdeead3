// crates/epayroll-core/src/core/payroll.rs
// ============================================================================
// Module: Payroll Inputs
// Description: Upstream payroll records and organization profiles.
// Purpose: Describe what the builder consumes; the pipeline never recalculates money.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`PayrollRecord`] arrives from the upstream payroll engine with all
//! amounts already computed. A [`ConfigurationProfile`] carries the
//! organization's legal identity, numbering prefix, credential reference, and
//! environment. Both are read-only inputs to document building.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::CredentialRef;
use crate::core::identifiers::DocumentPrefix;
use crate::core::identifiers::EmployeeRef;
use crate::core::identifiers::OrganizationId;
use crate::core::money::Amount;

// ============================================================================
// SECTION: Payroll Record
// ============================================================================

/// Employee identity carried on the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeInfo {
    /// Upstream employee reference.
    pub reference: EmployeeRef,
    /// National identification document type code.
    pub document_type: String,
    /// National identification document number.
    pub document_number: String,
    /// Full legal name.
    pub full_name: String,
}

/// Settlement period covered by the payroll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollPeriod {
    /// Upstream period reference.
    pub reference: String,
    /// First day of the period (`YYYY-MM-DD`).
    pub start_date: String,
    /// Last day of the period (`YYYY-MM-DD`).
    pub end_date: String,
}

/// Earning entry computed upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningLine {
    /// Earning kind code (for example `basic`, `transport`, `overtime`).
    pub kind: String,
    /// Human-readable concept.
    pub concept: String,
    /// Computed amount.
    pub amount: Amount,
    /// True when the earning is part of the salary base.
    #[serde(default)]
    pub salarial: bool,
}

/// Deduction entry computed upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductionLine {
    /// Deduction kind code (for example `health`, `pension`).
    pub kind: String,
    /// Human-readable concept.
    pub concept: String,
    /// Percentage applied upstream, when the deduction is rate based.
    #[serde(default)]
    pub percentage: Option<Amount>,
    /// Computed amount.
    pub amount: Amount,
}

/// Totals declared by the payroll engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollTotals {
    /// Gross earnings.
    pub gross: Amount,
    /// Total deductions.
    pub deductions: Amount,
    /// Net pay.
    pub net: Amount,
}

impl PayrollTotals {
    /// Returns true when `gross - deductions == net`.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        &self.gross - &self.deductions == self.net
    }
}

/// Finalized payroll for one employee and one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollRecord {
    /// Organization that owns the payroll.
    pub organization_id: OrganizationId,
    /// Upstream payroll identifier.
    pub payroll_id: String,
    /// Employee receiving the payment.
    pub employee: EmployeeInfo,
    /// Settlement period.
    pub period: PayrollPeriod,
    /// Earnings in upstream order.
    pub earnings: Vec<EarningLine>,
    /// Deductions in upstream order.
    pub deductions: Vec<DeductionLine>,
    /// Declared totals.
    pub totals: PayrollTotals,
}

// ============================================================================
// SECTION: Configuration Profile
// ============================================================================

/// Target environment at the tax authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Live environment.
    Production,
    /// Test environment.
    Sandbox,
}

impl Environment {
    /// Returns the environment code embedded in the CUNE.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Production => "1",
            Self::Sandbox => "2",
        }
    }

    /// Returns the stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Sandbox => "sandbox",
        }
    }
}

/// Employer and software identity registered with the authority.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalIdentity {
    /// Employer tax identifier.
    pub employer_tax_id: String,
    /// Employer legal name.
    pub employer_name: String,
    /// Software identifier registered with the authority.
    pub software_id: String,
    /// Software PIN; only ever used as CUNE input.
    pub software_pin: String,
}

impl LegalIdentity {
    /// Returns the name of the first empty field, if any.
    #[must_use]
    pub fn first_missing_field(&self) -> Option<&'static str> {
        [
            ("employer_tax_id", &self.employer_tax_id),
            ("employer_name", &self.employer_name),
            ("software_id", &self.software_id),
            ("software_pin", &self.software_pin),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

impl fmt::Debug for LegalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegalIdentity")
            .field("employer_tax_id", &self.employer_tax_id)
            .field("employer_name", &self.employer_name)
            .field("software_id", &self.software_id)
            .field("software_pin", &"<redacted>")
            .finish()
    }
}

/// Per-organization settings consumed by the builder and signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationProfile {
    /// Organization the profile belongs to.
    pub organization_id: OrganizationId,
    /// Numbering prefix used for new documents.
    pub prefix: DocumentPrefix,
    /// Legal identity printed on documents.
    pub legal: LegalIdentity,
    /// Signing credential reference.
    pub credential: CredentialRef,
    /// Target environment.
    pub environment: Environment,
    /// Fixed UTC offset used to render issue dates and times.
    pub utc_offset_minutes: i16,
    /// Schema version stamped on generated documents.
    pub schema_version: String,
}
