// crates/epayroll-core/src/core/mod.rs
// ============================================================================
// Module: Electronic Payroll Core Types
// Description: Canonical document, payroll, lifecycle, and event structures.
// Purpose: Provide stable, serializable types shared by every pipeline stage.
// Dependencies: serde, bigdecimal, time
// ============================================================================

//! ## Overview
//! Core types describe payroll inputs, the regulated document and its
//! lifecycle, and authority notifications. They are the source of truth for
//! storage, the wire protocols, and the command-line surface.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod document;
pub mod hashing;
pub mod identifiers;
pub mod lifecycle;
pub mod money;
pub mod payroll;
pub mod time;
pub mod webhook;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use document::AdjustmentDetails;
pub use document::AdjustmentLine;
pub use document::CancellationRecord;
pub use document::DocumentError;
pub use document::DocumentSeal;
pub use document::DocumentStatusView;
pub use document::DocumentType;
pub use document::DraftParams;
pub use document::ElectronicPayrollDocument;
pub use document::EmployerInfo;
pub use document::LineSection;
pub use document::SignatureBlock;
pub use document::StatusChange;
pub use document::TransmissionState;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use hashing::hash_bytes;
pub use hashing::hex_encode;
pub use identifiers::CredentialRef;
pub use identifiers::DocumentKey;
pub use identifiers::DocumentPrefix;
pub use identifiers::EmployeeRef;
pub use identifiers::IdempotencyKey;
pub use identifiers::IdentifierError;
pub use identifiers::OrganizationId;
pub use identifiers::TrackId;
pub use identifiers::validate_identifier_text;
pub use lifecycle::ALL_STATUSES;
pub use lifecycle::DocumentStatus;
pub use lifecycle::InvalidTransition;
pub use money::Amount;
pub use money::AmountError;
pub use payroll::ConfigurationProfile;
pub use payroll::DeductionLine;
pub use payroll::EarningLine;
pub use payroll::EmployeeInfo;
pub use payroll::Environment;
pub use payroll::LegalIdentity;
pub use payroll::PayrollPeriod;
pub use payroll::PayrollRecord;
pub use payroll::PayrollTotals;
pub use time::IssueMoment;
pub use time::TimeError;
pub use time::Timestamp;
pub use webhook::EventDisposition;
pub use webhook::RecordOutcome;
pub use webhook::WebhookEvent;
pub use webhook::WebhookEventType;
pub use webhook::WebhookPayload;
