// crates/epayroll-core/src/core/hashing.rs
// ============================================================================
// Module: Electronic Payroll Digests
// Description: Content digests for stored documents, keys, and the CUNE.
// Purpose: Keep every digest the pipeline produces on one hashing surface.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Three digests flow through the pipeline:
//! - stored document snapshots are hashed over their RFC 8785 JSON form so a
//!   store can detect tampering on load,
//! - canonical XML and idempotency material are hashed with SHA-256,
//! - the CUNE is SHA-384 over its fixed concatenation.
//!
//! Digests render as lowercase hex. [`HashDigest`] displays as
//! `algorithm:hex`, the form used in logs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::fmt::Write as _;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use sha2::Sha384;
use subtle::ConstantTimeEq;
use thiserror::Error;

// ============================================================================
// SECTION: Algorithms
// ============================================================================

/// Digest algorithms used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// Document snapshots, canonical XML, idempotency keys.
    Sha256,
    /// CUNE.
    Sha384,
}

impl HashAlgorithm {
    /// Label stored next to persisted digests.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
        }
    }

    /// Length of the hex rendering.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha384 => 96,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Digest
// ============================================================================

/// Hex digest tagged with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Algorithm that produced `value`.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex.
    pub value: String,
}

impl HashDigest {
    /// Returns true when `bytes` hash to this digest.
    ///
    /// The comparison runs in constant time over the hex text.
    #[must_use]
    pub fn matches(&self, bytes: &[u8]) -> bool {
        let actual = hash_bytes(self.algorithm, bytes);
        actual.value.as_bytes().ct_eq(self.value.as_bytes()).into()
    }
}

impl fmt::Display for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Hashes `bytes` with `algorithm`.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    let value = match algorithm {
        HashAlgorithm::Sha256 => hex_encode(&Sha256::digest(bytes)),
        HashAlgorithm::Sha384 => hex_encode(&Sha384::digest(bytes)),
    };
    HashDigest {
        algorithm,
        value,
    }
}

/// Lowercase hex rendering of `bytes`.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

// ============================================================================
// SECTION: Canonical JSON
// ============================================================================

/// Canonical JSON failure.
#[derive(Debug, Error)]
pub enum HashError {
    /// The value could not be rendered as RFC 8785 JSON.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

/// RFC 8785 bytes of `value`, used for stored snapshots and signed info.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when `value` cannot be serialized.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test fixtures use unwraps for clarity.")]

    use super::HashAlgorithm;
    use super::canonical_json_bytes;
    use super::hash_bytes;
    use super::hex_encode;

    #[test]
    fn known_vectors() {
        let sha256 = hash_bytes(HashAlgorithm::Sha256, b"abc");
        assert_eq!(sha256.value, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        let sha384 = hash_bytes(HashAlgorithm::Sha384, b"abc");
        assert_eq!(
            sha384.value,
            "cb00753f45a35e8bb5a03d699ac65007272c32ab0eded1631a8b605a43ff5bed8086072ba1e7cc2358baeca134c825a7"
        );
        assert_eq!(sha384.value.len(), HashAlgorithm::Sha384.hex_len());
    }

    #[test]
    fn digest_matches_only_its_input() {
        let digest = hash_bytes(HashAlgorithm::Sha256, b"<PayrollDocument/>");
        assert!(digest.matches(b"<PayrollDocument/>"));
        assert!(!digest.matches(b"<PayrollDocument />"));
        assert!(digest.to_string().starts_with("sha256:"));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let value = serde_json::json!({"b": 1, "a": [true, null]});
        assert_eq!(canonical_json_bytes(&value).unwrap(), br#"{"a":[true,null],"b":1}"#);
        assert_eq!(hex_encode(&[0x00, 0xab, 0x0f]), "00ab0f");
    }
}
