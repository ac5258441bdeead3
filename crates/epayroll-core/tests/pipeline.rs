// crates/epayroll-core/tests/pipeline.rs
// ============================================================================
// Module: Pipeline Tests
// Description: End-to-end build, serialize, sign, and submit scenarios.
// ============================================================================
//! ## Overview
//! Drives documents through the in-memory pipeline against a scripted
//! authority and checks lifecycle, retry, and idempotency behavior.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]

mod common;

use std::sync::atomic::Ordering;

use common::Harness;
use common::payroll;
use common::profile;
use epayroll_core::AuthorityResponse;
use epayroll_core::BuildError;
use epayroll_core::Clock;
use epayroll_core::DocumentError;
use epayroll_core::DocumentStore;
use epayroll_core::DocumentStatus;
use epayroll_core::PipelineError;
use epayroll_core::RemoteStatus;
use epayroll_core::RetryPolicy;
use epayroll_core::RetrySweepOptions;
use epayroll_core::SignError;
use epayroll_core::SubmitOptions;
use epayroll_core::TrackId;
use epayroll_core::TransmissionError;
use epayroll_core::TransportError;

fn unavailable() -> TransportError {
    TransportError::Unavailable {
        status: 500,
        message: "internal error".to_string(),
    }
}

#[test]
fn accepted_submission_records_track_id_and_cune() {
    let harness = Harness::new();
    let outcome =
        harness.pipeline.process(&payroll(), &profile(), &SubmitOptions::default()).unwrap();

    assert!(!outcome.replayed);
    assert_eq!(outcome.view.status, DocumentStatus::Accepted);
    assert_eq!(outcome.view.track_id, Some(TrackId::new("T1")));
    assert_eq!(outcome.view.attempt_count, 1);
    let cune = outcome.view.cune.unwrap();
    assert_eq!(cune.len(), 96);
    assert!(cune.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert!(outcome.view.validated_at.is_some());
}

#[test]
fn resubmitting_an_accepted_document_replays_without_side_effects() {
    let harness = Harness::new();
    let key = harness.signed_document();
    let first = harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap();
    let second = harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap();

    assert!(second.replayed);
    assert_eq!(first.view.track_id, second.view.track_id);
    assert_eq!(harness.authority.submission_count(), 1);
    assert_eq!(harness.authority.record_count(), 1);
}

#[test]
fn duplicate_answer_resolves_through_query() {
    let harness = Harness::new();
    let key = harness.signed_document();
    harness.authority.lose_next_response.store(true, Ordering::SeqCst);
    let outcome = harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap();

    assert_eq!(outcome.view.status, DocumentStatus::Accepted);
    assert_eq!(outcome.view.track_id, Some(TrackId::new("T1")));
    assert_eq!(outcome.view.attempt_count, 2);
    assert_eq!(harness.authority.submission_count(), 2);
    assert_eq!(harness.authority.record_count(), 1);
    assert_eq!(harness.authority.query_count(), 1);
}

#[test]
fn unresolvable_duplicate_leaves_the_document_in_error() {
    let harness = Harness::new();
    let key = harness.signed_document();
    harness.authority.lose_next_response.store(true, Ordering::SeqCst);
    harness.authority.push_query(Err(TransportError::Validation {
        status: 404,
        code: "404".to_string(),
        message: "unknown submission".to_string(),
    }));
    let err = harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Transmission(TransmissionError::Transport(TransportError::Protocol(_)))
    ));
    let view = harness.pipeline.status(&key).unwrap();
    assert_eq!(view.status, DocumentStatus::Error);
    assert_eq!(view.attempt_count, 2);
    assert!(view.response_code.is_none());
    assert!(view.validated_at.is_none());
    assert_eq!(harness.authority.record_count(), 1);
}

#[test]
fn webhook_during_submission_is_not_overwritten() {
    let harness = Harness::new();
    let key = harness.signed_document();
    let documents = harness.documents.clone();
    let clock = harness.clock.clone();
    let webhook_key = key.clone();
    harness.authority.push_submit(Ok(RemoteStatus::Pending));
    harness.authority.while_submitting(move || {
        let mut document = documents.load(&webhook_key).unwrap().unwrap();
        assert_eq!(document.status(), DocumentStatus::Submitting);
        document.transition(DocumentStatus::Accepted, clock.now(), "webhook").unwrap();
        document.advance_revision();
        documents.update(&document).unwrap();
    });
    let outcome = harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap();

    assert_eq!(outcome.view.status, DocumentStatus::Accepted);
    assert_eq!(outcome.view.track_id, Some(TrackId::new("T1")));
    let stored = harness.load(&key);
    assert_eq!(stored.status(), DocumentStatus::Accepted);
    assert_eq!(stored.transmission().track_id, Some(TrackId::new("T1")));
    let history: Vec<DocumentStatus> = stored.history().iter().map(|change| change.to).collect();
    assert_eq!(history.last(), Some(&DocumentStatus::Accepted));
    assert!(!history.contains(&DocumentStatus::Pending));
}

#[test]
fn answer_arriving_after_a_concurrent_update_still_advances() {
    let harness = Harness::new();
    let key = harness.signed_document();
    let documents = harness.documents.clone();
    let clock = harness.clock.clone();
    let webhook_key = key.clone();
    harness.authority.while_submitting(move || {
        let mut document = documents.load(&webhook_key).unwrap().unwrap();
        document.transition(DocumentStatus::Pending, clock.now(), "webhook").unwrap();
        document.advance_revision();
        documents.update(&document).unwrap();
    });
    let outcome = harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap();

    assert_eq!(outcome.view.status, DocumentStatus::Accepted);
    assert_eq!(outcome.view.response_code.as_deref(), Some("00"));
    assert!(outcome.view.validated_at.is_some());
    assert_eq!(harness.load(&key).status(), DocumentStatus::Accepted);
}

#[test]
fn transient_failures_then_success_counts_every_attempt() {
    let harness = Harness::new();
    let key = harness.signed_document();
    for _ in 0..3 {
        harness.authority.push_submit(Err(unavailable()));
    }
    let outcome = harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap();

    assert_eq!(outcome.view.status, DocumentStatus::Accepted);
    assert_eq!(outcome.view.attempt_count, 4);
    assert_eq!(harness.sleeper.delays().len(), 3);
    let history: Vec<DocumentStatus> =
        harness.load(&key).history().iter().map(|change| change.to).collect();
    assert_eq!(
        history,
        vec![
            DocumentStatus::Generated,
            DocumentStatus::Signed,
            DocumentStatus::Submitting,
            DocumentStatus::Error,
            DocumentStatus::Submitting,
            DocumentStatus::Error,
            DocumentStatus::Submitting,
            DocumentStatus::Error,
            DocumentStatus::Submitting,
            DocumentStatus::Accepted,
        ]
    );
}

#[test]
fn validation_failure_rejects_without_retry() {
    let harness = Harness::new();
    let key = harness.signed_document();
    harness.authority.push_submit(Err(TransportError::Validation {
        status: 422,
        code: "NIE024".to_string(),
        message: "employer tax id not registered".to_string(),
    }));
    let outcome = harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap();

    assert_eq!(outcome.view.status, DocumentStatus::Rejected);
    assert_eq!(outcome.view.attempt_count, 1);
    assert_eq!(outcome.view.response_code.as_deref(), Some("NIE024"));
    assert_eq!(outcome.view.response_message.as_deref(), Some("employer tax id not registered"));
    assert!(harness.sleeper.delays().is_empty());
}

#[test]
fn exhausting_the_ceiling_marks_the_document_failed() {
    let harness = Harness::with_policy(RetryPolicy::immediate(3));
    let key = harness.signed_document();
    for _ in 0..3 {
        harness.authority.push_submit(Err(unavailable()));
    }
    let err = harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Transmission(TransmissionError::Exhausted {
            attempts: 3,
            ..
        })
    ));
    assert!(err.is_retryable());
    let view = harness.pipeline.status(&key).unwrap();
    assert_eq!(view.status, DocumentStatus::Failed);
    assert_eq!(view.attempt_count, 3);
    assert!(view.response_message.is_some());
}

#[test]
fn failed_documents_resubmit_only_with_operator_intent() {
    let harness = Harness::with_policy(RetryPolicy::immediate(1));
    let key = harness.signed_document();
    harness.authority.push_submit(Err(unavailable()));
    harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap_err();
    assert_eq!(harness.pipeline.status(&key).unwrap().status, DocumentStatus::Failed);

    let err = harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Transmission(TransmissionError::InvalidState {
            status: DocumentStatus::Failed,
            ..
        })
    ));

    let outcome = harness
        .pipeline
        .submit(
            &key,
            &SubmitOptions {
                deadline_ms: None,
                manual_resubmit: true,
            },
        )
        .unwrap();
    assert_eq!(outcome.view.status, DocumentStatus::Accepted);
    assert_eq!(outcome.view.attempt_count, 2);
}

#[test]
fn deadline_leaves_the_document_in_error() {
    let harness = Harness::with_policy(RetryPolicy {
        max_attempts: 10,
        initial_backoff_ms: 1_000,
        max_backoff_ms: 1_000,
        multiplier: 1,
        jitter: false,
    });
    let key = harness.signed_document();
    for _ in 0..10 {
        harness.authority.push_submit(Err(TransportError::Connection("reset".to_string())));
    }
    let err = harness
        .pipeline
        .submit(
            &key,
            &SubmitOptions {
                deadline_ms: Some(2_500),
                manual_resubmit: false,
            },
        )
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Transmission(TransmissionError::Timeout {
            attempts: 3,
            ..
        })
    ));
    let view = harness.pipeline.status(&key).unwrap();
    assert_eq!(view.status, DocumentStatus::Error);
    assert_eq!(view.attempt_count, 3);
}

#[test]
fn retry_sweep_redrives_documents_in_error() {
    let harness = Harness::with_policy(RetryPolicy::immediate(2));
    let key = harness.signed_document();
    harness.authority.push_submit(Err(TransportError::Protocol("garbled".to_string())));
    let err = harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(harness.pipeline.status(&key).unwrap().status, DocumentStatus::Error);

    let entries = harness
        .pipeline
        .retry_pending(&profile().organization_id, &RetrySweepOptions::default())
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].document, key);
    assert_eq!(entries[0].result.as_ref().unwrap().status, DocumentStatus::Accepted);
    assert_eq!(harness.authority.record_count(), 1);
}

#[test]
fn pending_documents_are_refreshed_forward_only() {
    let harness = Harness::new();
    let key = harness.signed_document();
    harness.authority.push_submit(Ok(RemoteStatus::Pending));
    let outcome = harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap();
    assert_eq!(outcome.view.status, DocumentStatus::Pending);

    harness.authority.push_query(Ok(AuthorityResponse {
        track_id: Some(TrackId::new("T1")),
        status: RemoteStatus::Accepted,
        code: Some("00".to_string()),
        message: Some("validated".to_string()),
    }));
    let entries = harness.pipeline.refresh_pending(&profile().organization_id).unwrap();
    assert_eq!(entries[0].result.as_ref().unwrap().status, DocumentStatus::Accepted);

    harness.authority.push_query(Ok(AuthorityResponse {
        track_id: Some(TrackId::new("T1")),
        status: RemoteStatus::Pending,
        code: None,
        message: None,
    }));
    let view = harness.pipeline.refresh(&key).unwrap();
    assert_eq!(view.status, DocumentStatus::Accepted);
    assert_eq!(view.response_message.as_deref(), Some("validated"));
}

#[test]
fn cancel_requires_accepted_and_records_the_cancellation() {
    let harness = Harness::new();
    let key = harness.signed_document();
    let err = harness.pipeline.cancel(&key).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Transmission(TransmissionError::InvalidState {
            status: DocumentStatus::Signed,
            ..
        })
    ));

    harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap();
    let view = harness.pipeline.cancel(&key).unwrap();
    assert_eq!(view.status, DocumentStatus::Cancelled);
    let cancellation = view.cancellation.unwrap();
    assert_eq!(cancellation.cancellation_id, "C-T1");
    assert!(harness.audit.event_names().contains(&"document_cancelled"));

    let again = harness.pipeline.cancel(&key).unwrap();
    assert_eq!(again.status, DocumentStatus::Cancelled);
}

#[test]
fn refused_cancellation_keeps_the_document_accepted() {
    let harness = Harness::new();
    let key = harness.signed_document();
    harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap();
    harness.authority.push_cancel(Err(TransportError::Validation {
        status: 409,
        code: "CAN01".to_string(),
        message: "period closed".to_string(),
    }));
    let err = harness.pipeline.cancel(&key).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Transmission(TransmissionError::CancelRejected {
            ..
        })
    ));
    assert_eq!(harness.pipeline.status(&key).unwrap().status, DocumentStatus::Accepted);
}

#[test]
fn signing_twice_is_rejected() {
    let harness = Harness::new();
    let key = harness.signed_document();
    let err = harness.pipeline.sign(&key, &profile()).unwrap_err();
    assert!(matches!(err, PipelineError::Document(DocumentError::AlreadySigned(_))));
}

#[test]
fn signing_with_another_organizations_profile_is_refused() {
    let harness = Harness::new();
    let key = harness.pipeline.build(&payroll(), &profile()).unwrap();
    harness.pipeline.serialize(&key).unwrap();
    let mut foreign = profile();
    foreign.organization_id = "globex".into();
    let err = harness.pipeline.sign(&key, &foreign).unwrap_err();

    assert!(matches!(err, PipelineError::OrganizationMismatch { .. }));
    let view = harness.pipeline.status(&key).unwrap();
    assert_eq!(view.status, DocumentStatus::Generated);
    assert!(view.cune.is_none());
}

#[test]
fn invalid_credential_fails_the_document() {
    let harness = Harness::new();
    harness.signer.invalid.store(true, Ordering::SeqCst);
    let key = harness.pipeline.build(&payroll(), &profile()).unwrap();
    harness.pipeline.serialize(&key).unwrap();
    let err = harness.pipeline.sign(&key, &profile()).unwrap_err();

    assert!(matches!(err, PipelineError::Sign(SignError::InvalidCredential(_))));
    assert!(!err.is_retryable());
    let view = harness.pipeline.status(&key).unwrap();
    assert_eq!(view.status, DocumentStatus::Failed);
    assert!(view.cune.is_none());
}

#[test]
fn missing_legal_identity_is_reported_before_numbering() {
    let harness = Harness::new();
    let mut incomplete = profile();
    incomplete.legal.software_pin = String::new();
    let err = harness.pipeline.build(&payroll(), &incomplete).unwrap_err();
    assert!(matches!(err, PipelineError::Build(BuildError::MissingLegalIdentity(_))));

    let key = harness.pipeline.build(&payroll(), &profile()).unwrap();
    assert_eq!(key.sequence_number, 1);
}

#[test]
fn audit_trail_covers_every_stage() {
    let harness = Harness::new();
    harness.pipeline.process(&payroll(), &profile(), &SubmitOptions::default()).unwrap();
    let names = harness.audit.event_names();
    assert_eq!(
        names,
        vec![
            "document_built",
            "document_serialized",
            "document_signed",
            "submission_attempt",
            "submission_outcome",
        ]
    );
    let serialized = serde_json::to_string(&harness.audit.events()).unwrap();
    assert!(!serialized.contains("75315"));
}
