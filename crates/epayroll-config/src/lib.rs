// crates/epayroll-config/src/lib.rs
// ============================================================================
// Module: Electronic Payroll Config Library
// Description: Configuration model, validation, and reloadable service.
// Purpose: Single source of truth for epayroll.toml semantics.
// Dependencies: epayroll-core, epayroll-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `epayroll-config` defines the configuration model for the payroll
//! pipeline. It provides strict, fail-closed validation and a
//! [`ConfigService`] holding the process-wide snapshot.
//!
//! Security posture: config inputs are untrusted; secrets are referenced by
//! environment variable and never printed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod service;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use service::ConfigService;
