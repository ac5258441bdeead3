// crates/epayroll-core/src/runtime/mod.rs
// ============================================================================
// Module: Electronic Payroll Runtime
// Description: Pipeline stages, in-memory stores, audit sinks, and clocks.
// Purpose: Drive payroll documents from payroll record to authority outcome.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules implement every pipeline stage on top of the backend
//! agnostic interfaces. Command-line, HTTP, and test surfaces all call into
//! the same [`PayrollPipeline`] and [`WebhookIngestor`] so lifecycle rules are
//! enforced in one place.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod audit;
pub mod builder;
pub mod clock;
pub mod cune;
pub mod pipeline;
pub mod retry;
pub mod serializer;
pub mod store;
pub mod transmission;
pub mod webhook;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditSink;
pub use audit::FileAuditSink;
pub use audit::MemoryAuditSink;
pub use audit::NoopAuditSink;
pub use audit::PipelineAuditEvent;
pub use audit::SharedAuditSink;
pub use audit::StderrAuditSink;
pub use builder::AdjustmentRequest;
pub use builder::BuildError;
pub use builder::DocumentBuilder;
pub use clock::ManualClock;
pub use clock::ManualSleeper;
pub use clock::SystemClock;
pub use clock::ThreadSleeper;
pub use cune::CuneInput;
pub use cune::compute_cune;
pub use pipeline::PayrollPipeline;
pub use pipeline::PayrollPipelineParams;
pub use pipeline::PipelineError;
pub use pipeline::RetrySweepOptions;
pub use pipeline::SweepEntry;
pub use retry::RetryPolicy;
pub use serializer::SerializeError;
pub use serializer::render_canonical;
pub use serializer::render_signed;
pub use serializer::serialize_document;
pub use store::InMemoryDocumentStore;
pub use store::InMemoryNumberingStore;
pub use store::InMemoryWebhookEventStore;
pub use store::SharedDocumentStore;
pub use store::SharedNumberingStore;
pub use store::SharedWebhookEventStore;
pub use store::admit_range;
pub use transmission::SubmissionOutcome;
pub use transmission::SubmitOptions;
pub use transmission::TransmissionClient;
pub use transmission::TransmissionClientParams;
pub use transmission::TransmissionError;
pub use webhook::IngestOutcome;
pub use webhook::RawDelivery;
pub use webhook::ReconcileReport;
pub use webhook::SIGNATURE_HEADER;
pub use webhook::TIMESTAMP_HEADER;
pub use webhook::WebhookDelivery;
pub use webhook::WebhookError;
pub use webhook::WebhookIngestor;
pub use webhook::WebhookIngestorParams;
pub use webhook::WebhookVerifier;
pub use webhook::parse_delivery;
