// crates/epayroll-signer/tests/credential.rs
// ============================================================================
// Module: Credential Tests
// Description: Bundle sealing, vault signing, and signature verification.
// ============================================================================
//! ## Overview
//! Exercises the sealed credential envelope and the vault signer, including
//! every path that must fail closed as an invalid credential.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]

use epayroll_core::CredentialRef;
use epayroll_core::DocumentSigner;
use epayroll_core::SignError;
use epayroll_core::SignRequest;
use epayroll_core::SignatureBlock;
use epayroll_core::Timestamp;
use epayroll_signer::CredentialBundle;
use epayroll_signer::CredentialError;
use epayroll_signer::CredentialParams;
use epayroll_signer::CredentialVault;
use epayroll_signer::MIN_KDF_ITERATIONS;
use epayroll_signer::SignedInfo;
use epayroll_signer::verify_signature;

const PASSWORD: &str = "correct horse battery staple";
const NOT_BEFORE: i64 = 1_704_067_200_000;
const NOT_AFTER: i64 = 1_735_689_599_000;
const CANONICAL: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?><PayrollDocument/>";

fn params() -> CredentialParams {
    CredentialParams {
        subject: "Acme Payroll S.A.S.".to_string(),
        issuer: "Test CA".to_string(),
        serial: "0A1B2C".to_string(),
        not_before: Timestamp::from_unix_millis(NOT_BEFORE),
        not_after: Timestamp::from_unix_millis(NOT_AFTER),
        iterations: MIN_KDF_ITERATIONS,
    }
}

fn vault(bundle: CredentialBundle) -> (CredentialVault, CredentialRef) {
    let reference = CredentialRef::new("acme-signing");
    let mut vault = CredentialVault::new();
    vault.register(&reference, bundle, PASSWORD).unwrap();
    (vault, reference)
}

fn sign_at(
    vault: &CredentialVault,
    reference: &CredentialRef,
    at: i64,
) -> Result<SignatureBlock, SignError> {
    vault.sign(&SignRequest {
        credential: reference,
        canonical_bytes: CANONICAL,
        signing_time: Timestamp::from_unix_millis(at),
    })
}

#[test]
fn sealed_bundle_opens_with_the_right_password() {
    let bundle = CredentialBundle::generate(params(), PASSWORD).unwrap();
    let opened = bundle.open(PASSWORD).unwrap();
    assert_eq!(opened.certificate(), &bundle.certificate);
    assert_eq!(opened.certificate().serial, "0A1B2C");
    assert_eq!(
        opened.signing_key().verifying_key(),
        bundle.certificate.verifying_key().unwrap()
    );
    assert!(!bundle.ciphertext.contains(PASSWORD));
}

#[test]
fn wrong_password_and_tampering_are_invalid() {
    let bundle = CredentialBundle::generate(params(), PASSWORD).unwrap();
    assert!(matches!(bundle.open("wrong"), Err(CredentialError::Invalid(_))));

    let mut tampered = bundle.clone();
    tampered.certificate.subject = "Mallory Ltda".to_string();
    assert!(matches!(tampered.open(PASSWORD), Err(CredentialError::Invalid(_))));

    let mut tampered = bundle.clone();
    tampered.kdf.iterations = MIN_KDF_ITERATIONS - 1;
    assert!(matches!(tampered.open(PASSWORD), Err(CredentialError::Invalid(_))));

    let mut tampered = bundle;
    let mut chars: Vec<char> = tampered.ciphertext.chars().collect();
    chars[4] = if chars[4] == 'A' { 'B' } else { 'A' };
    tampered.ciphertext = chars.into_iter().collect();
    assert!(matches!(tampered.open(PASSWORD), Err(CredentialError::Invalid(_))));
}

#[test]
fn certificate_swap_is_detected() {
    let bundle = CredentialBundle::generate(params(), PASSWORD).unwrap();
    let other = CredentialBundle::generate(params(), PASSWORD).unwrap();
    let mut swapped = bundle;
    swapped.certificate.public_key = other.certificate.public_key;
    assert!(matches!(swapped.open(PASSWORD), Err(CredentialError::Invalid(_))));
}

#[test]
fn weak_parameters_are_refused() {
    let mut weak = params();
    weak.iterations = 1_000;
    assert!(matches!(
        CredentialBundle::generate(weak, PASSWORD),
        Err(CredentialError::Params(_))
    ));

    let mut inverted = params();
    inverted.not_after = Timestamp::from_unix_millis(NOT_BEFORE - 1);
    assert!(matches!(
        CredentialBundle::generate(inverted, PASSWORD),
        Err(CredentialError::Params(_))
    ));

    assert!(matches!(CredentialBundle::generate(params(), ""), Err(CredentialError::Params(_))));
}

#[test]
fn bundle_survives_a_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("acme.credential.json");
    let bundle = CredentialBundle::generate(params(), PASSWORD).unwrap();
    bundle.write_to(&path).unwrap();

    let read = CredentialBundle::read_from(&path).unwrap();
    assert_eq!(read, bundle);
    let mut vault = CredentialVault::new();
    let reference = CredentialRef::new("acme-signing");
    vault.register_file(&reference, &path, PASSWORD).unwrap();
    assert_eq!(vault.references(), vec![reference]);

    std::fs::write(&path, b"{\"format\":\"pkcs12\"}").unwrap();
    assert!(matches!(CredentialBundle::read_from(&path), Err(CredentialError::Invalid(_))));
}

#[test]
fn vault_signature_verifies_against_the_certificate() {
    let (vault, reference) = vault(CredentialBundle::generate(params(), PASSWORD).unwrap());
    let certificate = vault.certificate(&reference).unwrap().clone();
    let block = sign_at(&vault, &reference, NOT_BEFORE + 1_000).unwrap();

    assert_eq!(block.algorithm, "ed25519");
    assert_eq!(block.certificate_serial, "0A1B2C");
    assert_eq!(block.certificate_fingerprint, certificate.fingerprint().unwrap());
    let info: SignedInfo = serde_json::from_str(&block.signed_info).unwrap();
    assert_eq!(info.digest_value, block.digest_value);
    assert_eq!(serde_jcs::to_string(&info).unwrap(), block.signed_info);

    verify_signature(CANONICAL, &block, &certificate).unwrap();
    assert!(matches!(
        verify_signature(b"<PayrollDocument/>", &block, &certificate),
        Err(CredentialError::Invalid(_))
    ));

    let mut forged = block;
    forged.signing_time = Timestamp::from_unix_millis(NOT_BEFORE + 2_000);
    assert!(verify_signature(CANONICAL, &forged, &certificate).is_err());
}

#[test]
fn signing_is_deterministic_for_identical_input() {
    let (vault, reference) = vault(CredentialBundle::generate(params(), PASSWORD).unwrap());
    let first = sign_at(&vault, &reference, NOT_BEFORE).unwrap();
    let second = sign_at(&vault, &reference, NOT_BEFORE).unwrap();
    assert_eq!(first, second);
}

#[test]
fn signing_outside_the_validity_window_is_an_invalid_credential() {
    let (vault, reference) = vault(CredentialBundle::generate(params(), PASSWORD).unwrap());
    assert!(matches!(
        sign_at(&vault, &reference, NOT_AFTER + 1),
        Err(SignError::InvalidCredential(_))
    ));
    assert!(matches!(
        sign_at(&vault, &reference, NOT_BEFORE - 1),
        Err(SignError::InvalidCredential(_))
    ));
    assert!(sign_at(&vault, &reference, NOT_AFTER).is_ok());
}

#[test]
fn unknown_reference_and_wrong_registration_password_fail() {
    let bundle = CredentialBundle::generate(params(), PASSWORD).unwrap();
    let mut vault = CredentialVault::new();
    let reference = CredentialRef::new("acme-signing");
    assert!(matches!(
        vault.register(&reference, bundle, "nope"),
        Err(CredentialError::Invalid(_))
    ));
    assert!(matches!(
        sign_at(&vault, &reference, NOT_BEFORE),
        Err(SignError::CredentialNotFound(_))
    ));
}

#[test]
fn concurrent_signing_shares_one_credential() {
    let (vault, reference) = vault(CredentialBundle::generate(params(), PASSWORD).unwrap());
    let certificate = vault.certificate(&reference).unwrap().clone();
    let (vault, reference) = (&vault, &reference);
    let blocks: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4_i64)
            .map(|offset| scope.spawn(move || sign_at(vault, reference, NOT_BEFORE + offset)))
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap().unwrap()).collect()
    });
    for block in &blocks {
        verify_signature(CANONICAL, block, &certificate).unwrap();
    }
}
