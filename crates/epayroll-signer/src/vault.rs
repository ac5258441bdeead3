// crates/epayroll-signer/src/vault.rs
// ============================================================================
// Module: Credential Vault
// Description: Document signer backed by sealed credential bundles.
// Purpose: Produce and verify signature blocks over canonical bytes.
// Dependencies: ed25519-dalek, epayroll-core, serde_jcs
// ============================================================================

//! ## Overview
//! [`CredentialVault`] keeps sealed bundles and their passwords by credential
//! reference. Each signing call takes the credential's lock, opens the bundle,
//! signs, and drops the decrypted key before returning, so key material lives
//! only for the duration of one call.
//!
//! The signature covers a canonical JSON `SignedInfo` object that binds the
//! SHA-256 digest of the canonical bytes to the signing time and certificate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::Signature;
use ed25519_dalek::Signer;
use epayroll_core::CredentialRef;
use epayroll_core::DocumentSigner;
use epayroll_core::ElectronicPayrollDocument;
use epayroll_core::SignError;
use epayroll_core::SignRequest;
use epayroll_core::SignatureBlock;
use epayroll_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::bundle::CertificateRecord;
use crate::bundle::CredentialBundle;
use crate::bundle::CredentialError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Signature algorithm label.
pub const SIGNATURE_ALGORITHM: &str = "ed25519";
/// Digest algorithm label.
pub const DIGEST_ALGORITHM: &str = "sha256";

// ============================================================================
// SECTION: Signed Info
// ============================================================================

/// Object whose canonical JSON bytes are signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignedInfo {
    /// Signature algorithm label.
    pub algorithm: String,
    /// Digest algorithm label.
    pub digest_algorithm: String,
    /// Base64 SHA-256 digest of the canonical bytes.
    pub digest_value: String,
    /// Signing instant.
    pub signing_time: Timestamp,
    /// Certificate serial.
    pub certificate_serial: String,
    /// Hex SHA-256 fingerprint of the certificate public key.
    pub certificate_fingerprint: String,
}

/// Returns the base64 SHA-256 digest of `bytes`.
#[must_use]
pub fn digest_value(bytes: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(bytes))
}

// ============================================================================
// SECTION: Vault
// ============================================================================

/// Registered credential.
struct VaultEntry {
    /// Sealed bundle.
    bundle: CredentialBundle,
    /// Bundle password.
    password: Zeroizing<String>,
    /// Serializes access to this credential.
    lock: Mutex<()>,
}

/// Signer holding sealed credentials by reference.
#[derive(Default)]
pub struct CredentialVault {
    /// Entries keyed by credential reference.
    entries: BTreeMap<String, VaultEntry>,
}

impl CredentialVault {
    /// Creates an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bundle under `reference` after checking the password.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Invalid`] when the bundle cannot be opened.
    pub fn register(
        &mut self,
        reference: &CredentialRef,
        bundle: CredentialBundle,
        password: impl Into<String>,
    ) -> Result<(), CredentialError> {
        let password = Zeroizing::new(password.into());
        drop(bundle.open(&password)?);
        self.entries.insert(
            reference.as_str().to_string(),
            VaultEntry {
                bundle,
                password,
                lock: Mutex::new(()),
            },
        );
        Ok(())
    }

    /// Reads a bundle file and registers it under `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the file cannot be read or opened.
    pub fn register_file(
        &mut self,
        reference: &CredentialRef,
        path: &Path,
        password: impl Into<String>,
    ) -> Result<(), CredentialError> {
        let bundle = CredentialBundle::read_from(path)?;
        self.register(reference, bundle, password)
    }

    /// Returns the certificate registered under `reference`.
    #[must_use]
    pub fn certificate(&self, reference: &CredentialRef) -> Option<&CertificateRecord> {
        self.entries.get(reference.as_str()).map(|entry| &entry.bundle.certificate)
    }

    /// Returns the registered references.
    #[must_use]
    pub fn references(&self) -> Vec<CredentialRef> {
        self.entries.keys().map(CredentialRef::new).collect()
    }
}

impl DocumentSigner for CredentialVault {
    fn sign(&self, request: &SignRequest<'_>) -> Result<SignatureBlock, SignError> {
        let entry = self
            .entries
            .get(request.credential.as_str())
            .ok_or_else(|| SignError::CredentialNotFound(request.credential.to_string()))?;
        let _guard = entry
            .lock
            .lock()
            .map_err(|_| SignError::Signing("credential mutex poisoned".to_string()))?;

        let opened = entry.bundle.open(&entry.password).map_err(sign_error)?;
        let certificate = opened.certificate();
        if !certificate.is_valid_at(request.signing_time) {
            return Err(SignError::InvalidCredential(format!(
                "certificate {} is not valid at {}",
                certificate.serial,
                request.signing_time.as_unix_millis()
            )));
        }

        let info = SignedInfo {
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            digest_algorithm: DIGEST_ALGORITHM.to_string(),
            digest_value: digest_value(request.canonical_bytes),
            signing_time: request.signing_time,
            certificate_serial: certificate.serial.clone(),
            certificate_fingerprint: certificate.fingerprint().map_err(sign_error)?,
        };
        let signed_info =
            serde_jcs::to_string(&info).map_err(|err| SignError::Signing(err.to_string()))?;
        let signature = opened.signing_key().sign(signed_info.as_bytes());

        Ok(SignatureBlock {
            algorithm: info.algorithm,
            digest_algorithm: info.digest_algorithm,
            digest_value: info.digest_value,
            signed_info,
            signature_value: STANDARD.encode(signature.to_bytes()),
            certificate_serial: info.certificate_serial,
            certificate_fingerprint: info.certificate_fingerprint,
            signing_time: info.signing_time,
        })
    }
}

/// Maps bundle failures onto signing errors.
fn sign_error(err: CredentialError) -> SignError {
    match err {
        CredentialError::Invalid(message) => SignError::InvalidCredential(message),
        CredentialError::Params(message) | CredentialError::Io(message) => {
            SignError::Signing(message)
        }
    }
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Verifies a stored signature block against its canonical bytes.
///
/// # Errors
///
/// Returns [`CredentialError::Invalid`] when the digest, the signed info, or
/// the ed25519 signature does not match.
pub fn verify_signature(
    canonical_bytes: &[u8],
    signature: &SignatureBlock,
    certificate: &CertificateRecord,
) -> Result<(), CredentialError> {
    if signature.algorithm != SIGNATURE_ALGORITHM || signature.digest_algorithm != DIGEST_ALGORITHM
    {
        return Err(CredentialError::Invalid("unsupported signature algorithm".to_string()));
    }
    if signature.certificate_serial != certificate.serial {
        return Err(CredentialError::Invalid("certificate serial mismatch".to_string()));
    }
    let expected_digest = digest_value(canonical_bytes);
    if signature.digest_value != expected_digest {
        return Err(CredentialError::Invalid("digest mismatch".to_string()));
    }

    let info: SignedInfo = serde_json::from_str(&signature.signed_info)
        .map_err(|_| CredentialError::Invalid("signed info is malformed".to_string()))?;
    if info.digest_value != expected_digest
        || info.signing_time != signature.signing_time
        || info.certificate_serial != certificate.serial
        || info.certificate_fingerprint != certificate.fingerprint()?
    {
        return Err(CredentialError::Invalid("signed info does not match document".to_string()));
    }

    let bytes = STANDARD
        .decode(&signature.signature_value)
        .map_err(|_| CredentialError::Invalid("signature is not base64".to_string()))?;
    let ed_signature = Signature::try_from(bytes.as_slice())
        .map_err(|_| CredentialError::Invalid("signature length".to_string()))?;
    certificate
        .verifying_key()?
        .verify_strict(signature.signed_info.as_bytes(), &ed_signature)
        .map_err(|_| CredentialError::Invalid("signature verification failed".to_string()))
}

/// Verifies the signature stored on a signed document.
///
/// # Errors
///
/// Returns [`CredentialError::Invalid`] when the document is unsigned or the
/// signature does not verify.
pub fn verify_signed_document(
    document: &ElectronicPayrollDocument,
    certificate: &CertificateRecord,
) -> Result<(), CredentialError> {
    let canonical = document
        .canonical_bytes()
        .ok_or_else(|| CredentialError::Invalid("document has no canonical bytes".to_string()))?;
    let signature = document
        .signature()
        .ok_or_else(|| CredentialError::Invalid("document is not signed".to_string()))?;
    verify_signature(canonical, signature, certificate)
}
