// crates/epayroll-core/src/core/identifiers.rs
// ============================================================================
// Module: Electronic Payroll Identifiers
// Description: Typed identifiers for organizations, documents, and submissions.
// Purpose: Typed document keys and idempotency keys with stable text forms.
// Dependencies: serde, sha2
// ============================================================================

//! ## Overview
//! Identifiers are opaque strings except for [`DocumentKey`], which carries the
//! `(organization, prefix, sequence number)` triple that names a document for
//! its whole life. The key renders as `org/prefix/number` on the wire and in
//! logs, so identifier text may never contain `/`.
//!
//! The [`IdempotencyKey`] is a pure function of the document key. Every
//! submission attempt for the same document reuses it, which is what lets the
//! authority collapse retries into a single remote record.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::hashing::HashAlgorithm;
use crate::core::hashing::hash_bytes;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum length of any textual identifier.
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Prefix applied to every idempotency key.
pub const IDEMPOTENCY_KEY_PREFIX: &str = "epk-";

/// Field separator used when hashing the document key.
const KEY_FIELD_SEPARATOR: u8 = 0x1f;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when identifier text is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Identifier text is empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
    /// Identifier text exceeds the length limit.
    #[error("{0} exceeds {MAX_IDENTIFIER_LENGTH} characters")]
    TooLong(&'static str),
    /// Identifier text contains a forbidden character.
    #[error("{0} contains forbidden character '{1}'")]
    ForbiddenCharacter(&'static str, char),
    /// Document key text is malformed.
    #[error("invalid document key: {0}")]
    MalformedKey(String),
}

/// Validates identifier text shared by organizations, prefixes, and references.
///
/// # Errors
///
/// Returns [`IdentifierError`] when the text is empty, too long, or contains
/// `/`, whitespace, or control characters.
pub fn validate_identifier_text(label: &'static str, text: &str) -> Result<(), IdentifierError> {
    if text.is_empty() {
        return Err(IdentifierError::Empty(label));
    }
    if text.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(IdentifierError::TooLong(label));
    }
    if let Some(ch) = text.chars().find(|ch| *ch == '/' || ch.is_whitespace() || ch.is_control()) {
        return Err(IdentifierError::ForbiddenCharacter(label, ch));
    }
    Ok(())
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Organization (tenant) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(String);

impl OrganizationId {
    /// Creates a new organization identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrganizationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Numbering prefix assigned to an organization by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentPrefix(String);

impl DocumentPrefix {
    /// Creates a new document prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    /// Returns the prefix as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentPrefix {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Upstream employee reference carried from the payroll record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeRef(String);

impl EmployeeRef {
    /// Creates a new employee reference.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Returns the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmployeeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tracking identifier assigned by the tax authority on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    /// Creates a new tracking identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Reference to a sealed signing credential held by the signer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialRef(String);

impl CredentialRef {
    /// Creates a new credential reference.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Returns the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// SECTION: Document Key
// ============================================================================

/// Unique name of a payroll document.
///
/// # Invariants
/// - `(organization_id, prefix, sequence_number)` is unique across all documents.
/// - The key never changes after the number is reserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    /// Issuing organization.
    pub organization_id: OrganizationId,
    /// Numbering prefix.
    pub prefix: DocumentPrefix,
    /// Sequence number reserved from the numbering range.
    pub sequence_number: u64,
}

impl DocumentKey {
    /// Creates a new document key.
    #[must_use]
    pub const fn new(
        organization_id: OrganizationId,
        prefix: DocumentPrefix,
        sequence_number: u64,
    ) -> Self {
        Self {
            organization_id,
            prefix,
            sequence_number,
        }
    }

    /// Returns the consecutive (prefix followed by number) printed on the document.
    #[must_use]
    pub fn consecutive(&self) -> String {
        format!("{}{}", self.prefix, self.sequence_number)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.organization_id, self.prefix, self.sequence_number)
    }
}

impl FromStr for DocumentKey {
    type Err = IdentifierError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut parts = text.split('/');
        let (Some(org), Some(prefix), Some(number), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IdentifierError::MalformedKey(text.to_string()));
        };
        validate_identifier_text("organization id", org)?;
        validate_identifier_text("document prefix", prefix)?;
        let sequence_number = number
            .parse::<u64>()
            .map_err(|_| IdentifierError::MalformedKey(text.to_string()))?;
        Ok(Self::new(OrganizationId::new(org), DocumentPrefix::new(prefix), sequence_number))
    }
}

// ============================================================================
// SECTION: Idempotency Key
// ============================================================================

/// Idempotency key attached to every submission of a document.
///
/// # Invariants
/// - Derived only from the [`DocumentKey`]; identical for every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derives the idempotency key for a document.
    #[must_use]
    pub fn for_document(key: &DocumentKey) -> Self {
        let sequence = key.sequence_number.to_string();
        let mut material = Vec::with_capacity(
            key.organization_id.as_str().len() + key.prefix.as_str().len() + sequence.len() + 2,
        );
        material.extend_from_slice(key.organization_id.as_str().as_bytes());
        material.push(KEY_FIELD_SEPARATOR);
        material.extend_from_slice(key.prefix.as_str().as_bytes());
        material.push(KEY_FIELD_SEPARATOR);
        material.extend_from_slice(sequence.as_bytes());
        let digest = hash_bytes(HashAlgorithm::Sha256, &material);
        Self(format!("{IDEMPOTENCY_KEY_PREFIX}{}", digest.value))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
