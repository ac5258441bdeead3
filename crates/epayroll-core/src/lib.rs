// crates/epayroll-core/src/lib.rs
// ============================================================================
// Module: Electronic Payroll Core Library
// Description: Public API surface for the electronic payroll pipeline.
// Purpose: Expose core types, interfaces, and runtime stages.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Electronic payroll core turns finished payroll records into signed,
//! canonical XML documents, submits them to the tax authority idempotently,
//! and tracks their lifecycle through responses and webhook notifications.
//! Storage, signing, and the authority wire protocol are reached through
//! explicit interfaces so backends stay swappable.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::AuthorityResponse;
pub use interfaces::AuthorityTransport;
pub use interfaces::CancelAck;
pub use interfaces::Clock;
pub use interfaces::DocumentSigner;
pub use interfaces::DocumentStore;
pub use interfaces::NumberingCursor;
pub use interfaces::NumberingError;
pub use interfaces::NumberingRange;
pub use interfaces::NumberingStore;
pub use interfaces::QueryTarget;
pub use interfaces::RemoteStatus;
pub use interfaces::SignError;
pub use interfaces::SignRequest;
pub use interfaces::Sleeper;
pub use interfaces::StatusReconciler;
pub use interfaces::StoreError;
pub use interfaces::SubmitReply;
pub use interfaces::SubmitRequest;
pub use interfaces::TransportError;
pub use interfaces::WebhookEventStore;
pub use runtime::AdjustmentRequest;
pub use runtime::AuditSink;
pub use runtime::BuildError;
pub use runtime::IngestOutcome;
pub use runtime::PayrollPipeline;
pub use runtime::PayrollPipelineParams;
pub use runtime::PipelineAuditEvent;
pub use runtime::PipelineError;
pub use runtime::RetryPolicy;
pub use runtime::RetrySweepOptions;
pub use runtime::SharedAuditSink;
pub use runtime::SubmitOptions;
pub use runtime::TransmissionClient;
pub use runtime::TransmissionError;
pub use runtime::WebhookError;
pub use runtime::WebhookIngestor;
pub use runtime::WebhookVerifier;
