// crates/epayroll-store-sqlite/src/lib.rs
// ============================================================================
// Module: Electronic Payroll SQLite Store
// Description: SQLite-backed persistence for documents, numbering, and events.
// Purpose: Provide durable stores shared by the CLI and the webhook server.
// Dependencies: crate::store
// ============================================================================

//! ## Overview
//! Exposes [`SqlitePayrollStore`], one database implementing every store
//! interface of the pipeline.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_DOCUMENT_BYTES;
pub use store::SqliteJournalMode;
pub use store::SqlitePayrollStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteSynchronous;
