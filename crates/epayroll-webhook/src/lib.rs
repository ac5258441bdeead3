// crates/epayroll-webhook/src/lib.rs
// ============================================================================
// Module: Electronic Payroll Webhook
// Description: Inbound authority notification endpoint.
// Purpose: Expose the webhook ingestor over HTTP and reconcile stale gaps.
// Dependencies: epayroll-core, epayroll-config, axum, tokio
// ============================================================================

//! ## Overview
//! This crate serves the authority webhook. Authentication, ordering, and
//! de-duplication live in [`epayroll_core::WebhookIngestor`]; this crate
//! adds the HTTP surface, body limits, and the periodic reconciler.

pub mod server;

pub use server::HEALTH_PATH;
pub use server::WEBHOOK_PATH;
pub use server::WebhookServer;
pub use server::WebhookServerDeps;
pub use server::WebhookServerError;
pub use server::reconcile_once;
pub use server::router;
pub use server::spawn_reconciler;
pub use server::startup_warnings;
