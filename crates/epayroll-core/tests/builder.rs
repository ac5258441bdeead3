// crates/epayroll-core/tests/builder.rs
// ============================================================================
// Module: Builder Tests
// Description: Numbering ranges, validation, and adjustment documents.
// ============================================================================
//! ## Overview
//! Validates that building reserves unique numbers, rejects bad input before
//! consuming a number, and links adjustments to their originals.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    reason = "Tests use unwrap and panic on deterministic fixtures."
)]

mod common;

use std::collections::BTreeSet;

use common::Harness;
use common::amount;
use common::payroll;
use common::profile;
use epayroll_core::AdjustmentLine;
use epayroll_core::AdjustmentRequest;
use epayroll_core::BuildError;
use epayroll_core::DocumentKey;
use epayroll_core::DocumentStatus;
use epayroll_core::DocumentType;
use epayroll_core::LineSection;
use epayroll_core::NumberingError;
use epayroll_core::NumberingRange;
use epayroll_core::NumberingStore;
use epayroll_core::PayrollTotals;
use epayroll_core::PipelineError;
use epayroll_core::SubmitOptions;

fn corrected_totals() -> PayrollTotals {
    PayrollTotals {
        gross: amount("2100000"),
        deductions: amount("160000"),
        net: amount("1940000"),
    }
}

fn earning_fix(index: u32) -> AdjustmentLine {
    AdjustmentLine {
        section: LineSection::Earning,
        index,
        corrected_amount: amount("100000"),
        corrected_percentage: None,
    }
}

fn accepted_original(harness: &Harness) -> DocumentKey {
    let key = harness.signed_document();
    harness.pipeline.submit(&key, &SubmitOptions::default()).unwrap();
    key
}

fn build_error(err: PipelineError) -> BuildError {
    match err {
        PipelineError::Build(err) => err,
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn numbers_are_reserved_in_order_across_ranges() {
    let harness = Harness::new();
    let mut narrow = profile();
    narrow.prefix = "NX".into();
    harness
        .numbering
        .register_range(
            &narrow.organization_id,
            &narrow.prefix,
            NumberingRange {
                start: 1,
                end: 2,
            },
        )
        .unwrap();

    let first = harness.pipeline.build(&payroll(), &narrow).unwrap();
    let second = harness.pipeline.build(&payroll(), &narrow).unwrap();
    assert_eq!((first.sequence_number, second.sequence_number), (1, 2));

    let err = build_error(harness.pipeline.build(&payroll(), &narrow).unwrap_err());
    assert!(matches!(err, BuildError::RangeExhausted(_)));

    harness
        .numbering
        .register_range(
            &narrow.organization_id,
            &narrow.prefix,
            NumberingRange {
                start: 10,
                end: 11,
            },
        )
        .unwrap();
    let third = harness.pipeline.build(&payroll(), &narrow).unwrap();
    assert_eq!(third.sequence_number, 10);
}

#[test]
fn overlapping_ranges_are_refused_and_identical_ones_ignored() {
    let harness = Harness::new();
    let profile = profile();
    let err = harness
        .numbering
        .register_range(
            &profile.organization_id,
            &profile.prefix,
            NumberingRange {
                start: 500,
                end: 1500,
            },
        )
        .unwrap_err();
    assert!(matches!(err, NumberingError::Overlap(_)));

    harness
        .numbering
        .register_range(
            &profile.organization_id,
            &profile.prefix,
            NumberingRange {
                start: 1,
                end: 1000,
            },
        )
        .unwrap();
    assert_eq!(
        harness.numbering.cursors(&profile.organization_id, &profile.prefix).unwrap().len(),
        1
    );
}

#[test]
fn concurrent_builds_receive_distinct_increasing_numbers() {
    let harness = Harness::new();
    let profile = profile();
    let payroll = payroll();
    let (harness, profile, payroll) = (&harness, &profile, &payroll);
    let per_thread: Vec<Vec<u64>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(move || {
                    (0..25)
                        .map(|_| harness.pipeline.build(payroll, profile).unwrap().sequence_number)
                        .collect::<Vec<u64>>()
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    for numbers in &per_thread {
        assert!(numbers.windows(2).all(|pair| pair[0] < pair[1]));
    }
    let all: BTreeSet<u64> = per_thread.iter().flatten().copied().collect();
    assert_eq!(all.len(), 200);
    assert_eq!(all.iter().next_back(), Some(&200));
}

#[test]
fn unbalanced_totals_do_not_consume_a_number() {
    let harness = Harness::new();
    let mut record = payroll();
    record.totals.net = amount("1980605.99");
    let err = build_error(harness.pipeline.build(&record, &profile()).unwrap_err());
    assert!(matches!(err, BuildError::TotalsMismatch { .. }));

    let key = harness.pipeline.build(&payroll(), &profile()).unwrap();
    assert_eq!(key.sequence_number, 1);
}

#[test]
fn mismatched_organization_is_rejected() {
    let harness = Harness::new();
    let mut record = payroll();
    record.organization_id = "globex".into();
    let err = build_error(harness.pipeline.build(&record, &profile()).unwrap_err());
    assert!(matches!(err, BuildError::OrganizationMismatch { .. }));
}

#[test]
fn adjustment_links_original_and_follows_the_same_pipeline() {
    let harness = Harness::new();
    let original = accepted_original(&harness);
    let original_cune = harness.load(&original).cune().unwrap().to_string();

    let key = harness
        .pipeline
        .build_adjustment(
            &AdjustmentRequest {
                original: original.clone(),
                lines: vec![earning_fix(1)],
                corrected_totals: corrected_totals(),
                reason: Some("transport aid overpaid".to_string()),
            },
            &profile(),
        )
        .unwrap();
    assert_eq!(key.sequence_number, 2);

    let document = harness.load(&key);
    assert_eq!(document.document_type, DocumentType::Adjustment);
    assert_eq!(document.status(), DocumentStatus::Draft);
    assert_eq!(document.earnings[1].amount, amount("100000"));
    assert_eq!(document.earnings[0].amount, amount("2000000"));
    let link = document.adjustment.as_ref().unwrap();
    assert_eq!(link.original_consecutive, "NE1");
    assert_eq!(link.original_cune, original_cune);
    assert_eq!(link.original_issue_date, "2024-01-30");

    let outcome = harness.pipeline.drive(&key, &profile(), &SubmitOptions::default()).unwrap();
    assert_eq!(outcome.view.status, DocumentStatus::Accepted);
    assert_ne!(outcome.view.cune.as_deref(), Some(original_cune.as_str()));
    let xml = harness.load(&key).xml_unsigned().unwrap().to_string();
    assert!(xml.contains(&format!("<OriginalCune>{original_cune}</OriginalCune>")));
    assert!(xml.contains("<AdjustmentLine section=\"earning\" index=\"1\">"));
    assert_eq!(harness.load(&original).status(), DocumentStatus::Accepted);
}

#[test]
fn empty_adjustment_is_rejected_without_consuming_a_number() {
    let harness = Harness::new();
    let original = accepted_original(&harness);
    let err = build_error(
        harness
            .pipeline
            .build_adjustment(
                &AdjustmentRequest {
                    original,
                    lines: Vec::new(),
                    corrected_totals: corrected_totals(),
                    reason: None,
                },
                &profile(),
            )
            .unwrap_err(),
    );
    assert_eq!(err, BuildError::EmptyAdjustment);
    assert_eq!(harness.pipeline.build(&payroll(), &profile()).unwrap().sequence_number, 2);
}

#[test]
fn adjustment_lines_must_reference_existing_lines() {
    let harness = Harness::new();
    let original = accepted_original(&harness);
    let err = build_error(
        harness
            .pipeline
            .build_adjustment(
                &AdjustmentRequest {
                    original,
                    lines: vec![earning_fix(7)],
                    corrected_totals: corrected_totals(),
                    reason: None,
                },
                &profile(),
            )
            .unwrap_err(),
    );
    assert!(matches!(err, BuildError::InvalidAdjustmentLine(_)));
}

#[test]
fn adjustment_requires_a_settled_original() {
    let harness = Harness::new();
    let original = harness.signed_document();
    let err = build_error(
        harness
            .pipeline
            .build_adjustment(
                &AdjustmentRequest {
                    original,
                    lines: vec![earning_fix(0)],
                    corrected_totals: corrected_totals(),
                    reason: None,
                },
                &profile(),
            )
            .unwrap_err(),
    );
    assert!(matches!(
        err,
        BuildError::OriginalNotSettled {
            status: DocumentStatus::Signed,
            ..
        }
    ));
}
