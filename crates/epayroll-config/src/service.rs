// crates/epayroll-config/src/service.rs
// ============================================================================
// Module: Configuration Service
// Description: Process-wide configuration snapshot with explicit reload.
// Purpose: Give every component one validated view of the configuration.
// Dependencies: crate::config
// ============================================================================

//! ## Overview
//! [`ConfigService`] owns the resolved configuration path and the current
//! validated snapshot. Readers take an `Arc` of the snapshot, so a reload never
//! changes configuration underneath an operation already in flight. Reload is
//! explicit and synchronous; a failed reload keeps the previous snapshot.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use epayroll_core::ConfigurationProfile;
use epayroll_core::OrganizationId;

use crate::config::ConfigError;
use crate::config::EpayrollConfig;
use crate::config::resolve_path;

// ============================================================================
// SECTION: Service
// ============================================================================

/// Reloadable configuration holder.
///
/// # Invariants
/// - The held snapshot always passed validation.
#[derive(Debug)]
pub struct ConfigService {
    /// Resolved configuration file path.
    path: PathBuf,
    /// Current snapshot.
    current: RwLock<Arc<EpayrollConfig>>,
}

impl ConfigService {
    /// Resolves the path, loads, and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = resolve_path(path)?;
        let config = EpayrollConfig::load_resolved(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(config)),
        })
    }

    /// Returns the resolved configuration path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<EpayrollConfig> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Re-reads the file and swaps in the new snapshot when it validates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the new file is invalid; the previous
    /// snapshot stays current.
    pub fn reload(&self) -> Result<Arc<EpayrollConfig>, ConfigError> {
        let config = Arc::new(EpayrollConfig::load_resolved(&self.path)?);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::clone(&config);
        drop(guard);
        Ok(config)
    }

    /// Returns the configuration profile for `organization_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownOrganization`] when no entry matches.
    pub fn profile(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<ConfigurationProfile, ConfigError> {
        self.current()
            .organization(organization_id)
            .map(crate::config::OrganizationConfig::profile)
            .ok_or_else(|| ConfigError::UnknownOrganization(organization_id.to_string()))
    }
}
