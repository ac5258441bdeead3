// crates/epayroll-signer/src/bundle.rs
// ============================================================================
// Module: Credential Bundles
// Description: Password-sealed certificate and private key envelopes.
// Purpose: Keep signing keys encrypted at rest and open them per call.
// Dependencies: chacha20poly1305, ed25519-dalek, pbkdf2, zeroize
// ============================================================================

//! ## Overview
//! A [`CredentialBundle`] is a JSON envelope holding a public certificate
//! record and an encrypted payload. The payload key is derived from the
//! password with PBKDF2-HMAC-SHA256 and the payload is sealed with
//! XChaCha20-Poly1305, authenticating the envelope header as associated data.
//!
//! Security posture: bundle files are untrusted input. Every failure to open
//! a bundle is reported as [`CredentialError::Invalid`] without saying which
//! check failed, and decrypted key material is zeroized on drop.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::XChaCha20Poly1305;
use chacha20poly1305::XNonce;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::aead::KeyInit;
use chacha20poly1305::aead::Payload;
use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use epayroll_core::HashAlgorithm;
use epayroll_core::Timestamp;
use epayroll_core::hash_bytes;
use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;
use zeroize::ZeroizeOnDrop;
use zeroize::Zeroizing;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Envelope format label.
pub const BUNDLE_FORMAT: &str = "epayroll-credential/v1";
/// Key derivation label.
pub const KDF_ALGORITHM: &str = "pbkdf2-hmac-sha256";
/// Cipher label.
pub const CIPHER_ALGORITHM: &str = "xchacha20poly1305";
/// Minimum accepted PBKDF2 iteration count.
pub const MIN_KDF_ITERATIONS: u32 = 10_000;
/// Iteration count used for new bundles.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
/// Maximum bundle file size in bytes.
pub const MAX_BUNDLE_BYTES: u64 = 64 * 1024;
/// Salt length in bytes.
const SALT_LEN: usize = 16;
/// XChaCha20 nonce length in bytes.
const NONCE_LEN: usize = 24;
/// Ed25519 secret key length in bytes.
const SECRET_LEN: usize = 32;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Credential bundle errors.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Bundle cannot be opened or its contents are unusable.
    #[error("invalid credential: {0}")]
    Invalid(String),
    /// Bundle parameters are invalid.
    #[error("invalid credential parameters: {0}")]
    Params(String),
    /// Bundle file could not be read or written.
    #[error("credential io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Certificate
// ============================================================================

/// Public certificate record bound to a signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateRecord {
    /// Certificate subject (usually the employer legal name).
    pub subject: String,
    /// Issuing authority.
    pub issuer: String,
    /// Certificate serial number.
    pub serial: String,
    /// Start of the validity window.
    pub not_before: Timestamp,
    /// End of the validity window, inclusive.
    pub not_after: Timestamp,
    /// Base64 ed25519 public key.
    pub public_key: String,
}

impl CertificateRecord {
    /// Returns true when `at` falls inside the validity window.
    #[must_use]
    pub fn is_valid_at(&self, at: Timestamp) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// Returns the hex SHA-256 fingerprint of the public key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Invalid`] when the public key is not base64.
    pub fn fingerprint(&self) -> Result<String, CredentialError> {
        let bytes = STANDARD
            .decode(&self.public_key)
            .map_err(|_| CredentialError::Invalid("public key is not base64".to_string()))?;
        Ok(hash_bytes(HashAlgorithm::Sha256, &bytes).value)
    }

    /// Decodes the ed25519 verifying key.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Invalid`] when the key is malformed.
    pub fn verifying_key(&self) -> Result<VerifyingKey, CredentialError> {
        let bytes = STANDARD
            .decode(&self.public_key)
            .map_err(|_| CredentialError::Invalid("public key is not base64".to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CredentialError::Invalid("public key length".to_string()))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|_| CredentialError::Invalid("public key is not an ed25519 point".to_string()))
    }
}

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// Key derivation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KdfParams {
    /// KDF label.
    pub algorithm: String,
    /// Base64 salt.
    pub salt: String,
    /// Iteration count.
    pub iterations: u32,
}

/// Cipher parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CipherParams {
    /// Cipher label.
    pub algorithm: String,
    /// Base64 nonce.
    pub nonce: String,
}

/// Sealed credential envelope as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialBundle {
    /// Envelope format label.
    pub format: String,
    /// Public certificate record.
    pub certificate: CertificateRecord,
    /// Key derivation parameters.
    pub kdf: KdfParams,
    /// Cipher parameters.
    pub cipher: CipherParams,
    /// Base64 ciphertext of the sealed payload.
    pub ciphertext: String,
}

/// Authenticated header; any change to it invalidates the ciphertext.
#[derive(Serialize)]
struct EnvelopeHeader<'a> {
    /// Envelope format label.
    format: &'a str,
    /// Public certificate record.
    certificate: &'a CertificateRecord,
    /// Key derivation parameters.
    kdf: &'a KdfParams,
    /// Cipher parameters.
    cipher: &'a CipherParams,
}

/// Encrypted payload contents.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(deny_unknown_fields)]
struct SealedPayload {
    /// Certificate serial the key belongs to.
    serial: String,
    /// Base64 ed25519 secret key.
    secret_key: String,
}

/// Inputs for a new credential bundle.
#[derive(Debug, Clone)]
pub struct CredentialParams {
    /// Certificate subject.
    pub subject: String,
    /// Certificate issuer.
    pub issuer: String,
    /// Certificate serial number.
    pub serial: String,
    /// Start of the validity window.
    pub not_before: Timestamp,
    /// End of the validity window.
    pub not_after: Timestamp,
    /// PBKDF2 iteration count.
    pub iterations: u32,
}

/// Decrypted signing material. Zeroized on drop.
pub struct OpenedCredential {
    /// Public certificate record.
    certificate: CertificateRecord,
    /// Ed25519 signing key.
    signing_key: SigningKey,
}

impl OpenedCredential {
    /// Returns the certificate record.
    #[must_use]
    pub const fn certificate(&self) -> &CertificateRecord {
        &self.certificate
    }

    /// Returns the signing key.
    #[must_use]
    pub const fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl CredentialBundle {
    /// Generates a fresh key pair and seals it under `password`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Params`] for an empty password, an inverted
    /// validity window, or too few KDF iterations.
    pub fn generate(params: CredentialParams, password: &str) -> Result<Self, CredentialError> {
        let mut secret = Zeroizing::new([0_u8; SECRET_LEN]);
        rand::thread_rng().fill_bytes(&mut secret[..]);
        Self::seal(params, &secret, password)
    }

    /// Seals an existing ed25519 secret key under `password`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Params`] when parameters are invalid.
    pub fn seal(
        params: CredentialParams,
        secret: &[u8; SECRET_LEN],
        password: &str,
    ) -> Result<Self, CredentialError> {
        if password.is_empty() {
            return Err(CredentialError::Params("password must not be empty".to_string()));
        }
        if params.not_after < params.not_before {
            return Err(CredentialError::Params("validity window is inverted".to_string()));
        }
        if params.iterations < MIN_KDF_ITERATIONS {
            return Err(CredentialError::Params(format!(
                "kdf iterations must be at least {MIN_KDF_ITERATIONS}"
            )));
        }
        if params.serial.trim().is_empty() {
            return Err(CredentialError::Params("serial must not be empty".to_string()));
        }

        let signing_key = SigningKey::from_bytes(secret);
        let certificate = CertificateRecord {
            subject: params.subject,
            issuer: params.issuer,
            serial: params.serial,
            not_before: params.not_before,
            not_after: params.not_after,
            public_key: STANDARD.encode(signing_key.verifying_key().to_bytes()),
        };

        let mut salt = [0_u8; SALT_LEN];
        let mut nonce = [0_u8; NONCE_LEN];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let mut bundle = Self {
            format: BUNDLE_FORMAT.to_string(),
            certificate,
            kdf: KdfParams {
                algorithm: KDF_ALGORITHM.to_string(),
                salt: STANDARD.encode(salt),
                iterations: params.iterations,
            },
            cipher: CipherParams {
                algorithm: CIPHER_ALGORITHM.to_string(),
                nonce: STANDARD.encode(nonce),
            },
            ciphertext: String::new(),
        };

        let payload = SealedPayload {
            serial: bundle.certificate.serial.clone(),
            secret_key: STANDARD.encode(secret),
        };
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&payload).map_err(|err| CredentialError::Params(err.to_string()))?,
        );
        let aad = bundle.header_bytes()?;
        let key = derive_key(password, &salt, params.iterations);
        let key_bytes: &[u8; 32] = &key;
        let cipher = XChaCha20Poly1305::new(key_bytes.into());
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_slice(),
                    aad: &aad,
                },
            )
            .map_err(|_| CredentialError::Params("encryption failed".to_string()))?;
        bundle.ciphertext = STANDARD.encode(ciphertext);
        Ok(bundle)
    }

    /// Decrypts the bundle and checks the key against the certificate.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Invalid`] on a wrong password, tampered
    /// envelope, malformed payload, or certificate and key mismatch.
    pub fn open(&self, password: &str) -> Result<OpenedCredential, CredentialError> {
        if self.format != BUNDLE_FORMAT
            || self.kdf.algorithm != KDF_ALGORITHM
            || self.cipher.algorithm != CIPHER_ALGORITHM
        {
            return Err(invalid("unsupported envelope"));
        }
        if self.kdf.iterations < MIN_KDF_ITERATIONS {
            return Err(invalid("kdf iterations below minimum"));
        }
        let salt = STANDARD.decode(&self.kdf.salt).map_err(|_| invalid("malformed envelope"))?;
        let nonce = STANDARD.decode(&self.cipher.nonce).map_err(|_| invalid("malformed envelope"))?;
        if nonce.len() != NONCE_LEN || salt.is_empty() {
            return Err(invalid("malformed envelope"));
        }
        let ciphertext =
            STANDARD.decode(&self.ciphertext).map_err(|_| invalid("malformed envelope"))?;

        let aad = self.header_bytes()?;
        let key = derive_key(password, &salt, self.kdf.iterations);
        let key_bytes: &[u8; 32] = &key;
        let cipher = XChaCha20Poly1305::new(key_bytes.into());
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    XNonce::from_slice(&nonce),
                    Payload {
                        msg: ciphertext.as_slice(),
                        aad: &aad,
                    },
                )
                .map_err(|_| invalid("wrong password or tampered bundle"))?,
        );
        let payload: SealedPayload =
            serde_json::from_slice(&plaintext).map_err(|_| invalid("malformed payload"))?;
        if payload.serial != self.certificate.serial {
            return Err(invalid("payload does not belong to certificate"));
        }

        let secret = Zeroizing::new(
            STANDARD.decode(&payload.secret_key).map_err(|_| invalid("malformed payload"))?,
        );
        let secret: &[u8; SECRET_LEN] =
            secret.as_slice().try_into().map_err(|_| invalid("malformed payload"))?;
        let signing_key = SigningKey::from_bytes(secret);
        let expected = self.certificate.verifying_key()?;
        if signing_key.verifying_key() != expected {
            return Err(invalid("private key does not match certificate"));
        }
        Ok(OpenedCredential {
            certificate: self.certificate.clone(),
            signing_key,
        })
    }

    /// Reads a bundle from disk.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Io`] when the file cannot be read and
    /// [`CredentialError::Invalid`] when it is oversized or not a bundle.
    pub fn read_from(path: &Path) -> Result<Self, CredentialError> {
        let metadata = fs::metadata(path).map_err(|err| CredentialError::Io(err.to_string()))?;
        if metadata.len() > MAX_BUNDLE_BYTES {
            return Err(invalid("bundle file exceeds size limit"));
        }
        let bytes = fs::read(path).map_err(|err| CredentialError::Io(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|_| invalid("bundle file is not a credential"))
    }

    /// Writes the bundle to disk as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Io`] when the file cannot be written.
    pub fn write_to(&self, path: &Path) -> Result<(), CredentialError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|err| CredentialError::Io(err.to_string()))?;
        fs::write(path, bytes).map_err(|err| CredentialError::Io(err.to_string()))
    }

    /// Returns the canonical JSON bytes of the authenticated header.
    fn header_bytes(&self) -> Result<Vec<u8>, CredentialError> {
        serde_jcs::to_vec(&EnvelopeHeader {
            format: &self.format,
            certificate: &self.certificate,
            kdf: &self.kdf,
            cipher: &self.cipher,
        })
        .map_err(|_| invalid("envelope header cannot be canonicalized"))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Derives the payload key from the password.
fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0_u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key[..]);
    key
}

/// Builds an opaque invalid-credential error.
fn invalid(reason: &str) -> CredentialError {
    CredentialError::Invalid(reason.to_string())
}
