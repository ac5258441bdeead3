// crates/epayroll-cli/src/lib.rs
// ============================================================================
// Module: Electronic Payroll CLI Library
// Description: Service assembly shared by the `epayroll` binary and its tests.
// Purpose: Expose configuration-driven wiring without the command dispatcher.
// Dependencies: epayroll-config, epayroll-core, epayroll-signer,
//               epayroll-store-sqlite, epayroll-transport
// ============================================================================

//! ## Overview
//! The binary in `main.rs` parses arguments and renders output; everything
//! that turns an [`epayroll_config::EpayrollConfig`] into live stores, a
//! signer, and a pipeline lives here.

pub mod services;

pub use services::PayrollServices;
pub use services::PayrollStores;
pub use services::ReadLimitError;
pub use services::ServicesError;
pub use services::audit_sink;
pub use services::certificate_for;
pub use services::profile_for;
pub use services::read_bytes_with_limit;
