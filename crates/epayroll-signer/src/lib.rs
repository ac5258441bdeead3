// crates/epayroll-signer/src/lib.rs
// ============================================================================
// Module: Electronic Payroll Signer
// Description: Sealed credential bundles and the ed25519 document signer.
// Purpose: Sign canonical payroll bytes without keeping keys in memory.
// Dependencies: crate::{bundle, vault}
// ============================================================================

//! ## Overview
//! Credentials are stored as password-sealed bundles. The
//! [`CredentialVault`] implements [`epayroll_core::DocumentSigner`] by opening
//! the referenced bundle for each call and discarding the key afterwards.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod bundle;
pub mod vault;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use bundle::BUNDLE_FORMAT;
pub use bundle::CertificateRecord;
pub use bundle::CredentialBundle;
pub use bundle::CredentialError;
pub use bundle::CredentialParams;
pub use bundle::DEFAULT_KDF_ITERATIONS;
pub use bundle::MIN_KDF_ITERATIONS;
pub use bundle::OpenedCredential;
pub use vault::CredentialVault;
pub use vault::SignedInfo;
pub use vault::digest_value;
pub use vault::verify_signature;
pub use vault::verify_signed_document;
