// crates/epayroll-transport/src/lib.rs
// ============================================================================
// Module: Electronic Payroll Transport
// Description: HTTP adapter for the tax authority submission protocol.
// Purpose: Implement the authority transport interface over blocking HTTP.
// Dependencies: crate::http
// ============================================================================

//! ## Overview
//! Provides [`HttpAuthorityTransport`], the production implementation of
//! [`epayroll_core::AuthorityTransport`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod http;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use http::AuthorityEndpoints;
pub use http::CUNE_HEADER;
pub use http::DEFAULT_MAX_RESPONSE_BYTES;
pub use http::DOCUMENT_KEY_HEADER;
pub use http::HttpAuthorityTransport;
pub use http::HttpTransportConfig;
pub use http::IDEMPOTENCY_KEY_HEADER;
