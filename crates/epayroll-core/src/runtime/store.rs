// crates/epayroll-core/src/runtime/store.rs
// ============================================================================
// Module: Electronic Payroll In-Memory Stores
// Description: In-memory document, numbering, and webhook event stores.
// Purpose: Provide deterministic store implementations without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! In-memory implementations of the store traits for tests and local demos,
//! plus the `Shared*` wrappers that let runtime components hold any backend
//! behind an `Arc` trait object. The in-memory stores are not durable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::DocumentKey;
use crate::core::DocumentPrefix;
use crate::core::DocumentStatus;
use crate::core::ElectronicPayrollDocument;
use crate::core::EventDisposition;
use crate::core::OrganizationId;
use crate::core::RecordOutcome;
use crate::core::Timestamp;
use crate::core::WebhookEvent;
use crate::interfaces::DocumentStore;
use crate::interfaces::NumberingCursor;
use crate::interfaces::NumberingError;
use crate::interfaces::NumberingRange;
use crate::interfaces::NumberingStore;
use crate::interfaces::StoreError;
use crate::interfaces::WebhookEventStore;

// ============================================================================
// SECTION: In-Memory Document Store
// ============================================================================

/// In-memory document store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDocumentStore {
    /// Documents keyed by document key.
    documents: Arc<Mutex<BTreeMap<DocumentKey, ElectronicPayrollDocument>>>,
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn load(&self, key: &DocumentKey) -> Result<Option<ElectronicPayrollDocument>, StoreError> {
        let guard = self
            .documents
            .lock()
            .map_err(|_| StoreError::Store("document store mutex poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn insert(&self, document: &ElectronicPayrollDocument) -> Result<(), StoreError> {
        if document.revision() != 0 {
            return Err(StoreError::Invalid(format!(
                "insert requires revision 0, got {}",
                document.revision()
            )));
        }
        let mut guard = self
            .documents
            .lock()
            .map_err(|_| StoreError::Store("document store mutex poisoned".to_string()))?;
        if guard.contains_key(&document.key) {
            return Err(StoreError::Conflict(format!("document {} already exists", document.key)));
        }
        guard.insert(document.key.clone(), document.clone());
        drop(guard);
        Ok(())
    }

    fn update(&self, document: &ElectronicPayrollDocument) -> Result<(), StoreError> {
        let mut guard = self
            .documents
            .lock()
            .map_err(|_| StoreError::Store("document store mutex poisoned".to_string()))?;
        let Some(stored) = guard.get_mut(&document.key) else {
            return Err(StoreError::NotFound(document.key.to_string()));
        };
        if stored.revision() + 1 != document.revision() {
            return Err(StoreError::Conflict(format!(
                "document {} is at revision {}, update carries {}",
                document.key,
                stored.revision(),
                document.revision()
            )));
        }
        *stored = document.clone();
        drop(guard);
        Ok(())
    }

    fn list_by_status(
        &self,
        organization_id: &OrganizationId,
        statuses: &[DocumentStatus],
    ) -> Result<Vec<DocumentKey>, StoreError> {
        let guard = self
            .documents
            .lock()
            .map_err(|_| StoreError::Store("document store mutex poisoned".to_string()))?;
        Ok(guard
            .values()
            .filter(|doc| {
                doc.key.organization_id == *organization_id && statuses.contains(&doc.status())
            })
            .map(|doc| doc.key.clone())
            .collect())
    }
}

// ============================================================================
// SECTION: In-Memory Numbering Store
// ============================================================================

/// In-memory numbering store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryNumberingStore {
    /// Ascending cursors per `(organization, prefix)`.
    ranges: Arc<Mutex<BTreeMap<(OrganizationId, DocumentPrefix), Vec<NumberingCursor>>>>,
}

impl InMemoryNumberingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Checks a new range against the registered cursors.
///
/// Returns `Ok(false)` when the identical range is already registered.
///
/// # Errors
///
/// Returns [`NumberingError`] when the range is invalid, overlapping, or out of order.
pub fn admit_range(
    existing: &[NumberingCursor],
    range: NumberingRange,
) -> Result<bool, NumberingError> {
    if !range.is_valid() {
        return Err(NumberingError::InvalidRange(format!("{}..={}", range.start, range.end)));
    }
    if existing.iter().any(|cursor| cursor.range == range) {
        return Ok(false);
    }
    if let Some(cursor) = existing.iter().find(|cursor| cursor.range.overlaps(&range)) {
        return Err(NumberingError::Overlap(format!(
            "{}..={} overlaps {}..={}",
            range.start, range.end, cursor.range.start, cursor.range.end
        )));
    }
    if let Some(last) = existing.last()
        && range.start <= last.range.end
    {
        return Err(NumberingError::InvalidRange(format!(
            "{}..={} must follow {}..={}",
            range.start, range.end, last.range.start, last.range.end
        )));
    }
    Ok(true)
}

impl NumberingStore for InMemoryNumberingStore {
    fn register_range(
        &self,
        organization_id: &OrganizationId,
        prefix: &DocumentPrefix,
        range: NumberingRange,
    ) -> Result<(), NumberingError> {
        let mut guard = self
            .ranges
            .lock()
            .map_err(|_| NumberingError::Store("numbering store mutex poisoned".to_string()))?;
        let cursors = guard.entry((organization_id.clone(), prefix.clone())).or_default();
        if admit_range(cursors, range)? {
            cursors.push(NumberingCursor {
                range,
                next: range.start,
            });
        }
        drop(guard);
        Ok(())
    }

    fn reserve(
        &self,
        organization_id: &OrganizationId,
        prefix: &DocumentPrefix,
    ) -> Result<u64, NumberingError> {
        let mut guard = self
            .ranges
            .lock()
            .map_err(|_| NumberingError::Store("numbering store mutex poisoned".to_string()))?;
        let cursor = guard
            .get_mut(&(organization_id.clone(), prefix.clone()))
            .and_then(|cursors| cursors.iter_mut().find(|cursor| !cursor.is_exhausted()));
        let Some(cursor) = cursor else {
            return Err(NumberingError::RangeExhausted {
                organization_id: organization_id.clone(),
                prefix: prefix.clone(),
            });
        };
        let number = cursor.next;
        cursor.next += 1;
        drop(guard);
        Ok(number)
    }

    fn cursors(
        &self,
        organization_id: &OrganizationId,
        prefix: &DocumentPrefix,
    ) -> Result<Vec<NumberingCursor>, NumberingError> {
        let guard = self
            .ranges
            .lock()
            .map_err(|_| NumberingError::Store("numbering store mutex poisoned".to_string()))?;
        Ok(guard.get(&(organization_id.clone(), prefix.clone())).cloned().unwrap_or_default())
    }
}

// ============================================================================
// SECTION: In-Memory Webhook Event Store
// ============================================================================

/// Event log state guarded by one mutex.
#[derive(Debug, Default)]
struct EventLog {
    /// Events keyed by document and sequence id.
    events: BTreeMap<(DocumentKey, u64), WebhookEvent>,
    /// Settled cursor per document.
    cursors: BTreeMap<DocumentKey, u64>,
}

/// In-memory webhook event store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryWebhookEventStore {
    /// Event log protected by a mutex.
    log: Arc<Mutex<EventLog>>,
}

impl InMemoryWebhookEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WebhookEventStore for InMemoryWebhookEventStore {
    fn record(&self, event: &WebhookEvent) -> Result<RecordOutcome, StoreError> {
        let mut guard = self
            .log
            .lock()
            .map_err(|_| StoreError::Store("webhook event store mutex poisoned".to_string()))?;
        let key = (event.document.clone(), event.sequence_id);
        if guard.events.contains_key(&key) {
            return Ok(RecordOutcome::Duplicate);
        }
        guard.events.insert(key, event.clone());
        drop(guard);
        Ok(RecordOutcome::Inserted)
    }

    fn cursor(&self, document: &DocumentKey) -> Result<u64, StoreError> {
        let guard = self
            .log
            .lock()
            .map_err(|_| StoreError::Store("webhook event store mutex poisoned".to_string()))?;
        Ok(guard.cursors.get(document).copied().unwrap_or(0))
    }

    fn buffered(&self, document: &DocumentKey) -> Result<Vec<WebhookEvent>, StoreError> {
        let guard = self
            .log
            .lock()
            .map_err(|_| StoreError::Store("webhook event store mutex poisoned".to_string()))?;
        let cursor = guard.cursors.get(document).copied().unwrap_or(0);
        Ok(guard
            .events
            .values()
            .filter(|event| {
                event.document == *document && event.sequence_id > cursor && !event.is_settled()
            })
            .cloned()
            .collect())
    }

    fn settle(
        &self,
        document: &DocumentKey,
        sequence_id: u64,
        disposition: EventDisposition,
    ) -> Result<(), StoreError> {
        let mut guard = self
            .log
            .lock()
            .map_err(|_| StoreError::Store("webhook event store mutex poisoned".to_string()))?;
        let Some(event) = guard.events.get_mut(&(document.clone(), sequence_id)) else {
            return Err(StoreError::NotFound(format!("{document}#{sequence_id}")));
        };
        event.disposition = Some(disposition);
        let cursor = guard.cursors.entry(document.clone()).or_insert(0);
        *cursor = (*cursor).max(sequence_id);
        drop(guard);
        Ok(())
    }

    fn stale_documents(&self, received_before: Timestamp) -> Result<Vec<DocumentKey>, StoreError> {
        let guard = self
            .log
            .lock()
            .map_err(|_| StoreError::Store("webhook event store mutex poisoned".to_string()))?;
        let mut keys: Vec<DocumentKey> = guard
            .events
            .values()
            .filter(|event| {
                let cursor = guard.cursors.get(&event.document).copied().unwrap_or(0);
                !event.is_settled()
                    && event.sequence_id > cursor
                    && event.received_at < received_before
            })
            .map(|event| event.document.clone())
            .collect();
        drop(guard);
        keys.dedup();
        Ok(keys)
    }
}

// ============================================================================
// SECTION: Shared Store Wrappers
// ============================================================================

/// Shared document store backed by an `Arc` trait object.
#[derive(Clone)]
pub struct SharedDocumentStore {
    /// Inner store implementation.
    inner: Arc<dyn DocumentStore + Send + Sync>,
}

impl SharedDocumentStore {
    /// Wraps a document store in a shared, clonable wrapper.
    #[must_use]
    pub fn from_store(store: impl DocumentStore + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an existing shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn DocumentStore + Send + Sync>) -> Self {
        Self {
            inner: store,
        }
    }
}

impl DocumentStore for SharedDocumentStore {
    fn load(&self, key: &DocumentKey) -> Result<Option<ElectronicPayrollDocument>, StoreError> {
        self.inner.load(key)
    }

    fn insert(&self, document: &ElectronicPayrollDocument) -> Result<(), StoreError> {
        self.inner.insert(document)
    }

    fn update(&self, document: &ElectronicPayrollDocument) -> Result<(), StoreError> {
        self.inner.update(document)
    }

    fn list_by_status(
        &self,
        organization_id: &OrganizationId,
        statuses: &[DocumentStatus],
    ) -> Result<Vec<DocumentKey>, StoreError> {
        self.inner.list_by_status(organization_id, statuses)
    }
}

/// Shared numbering store backed by an `Arc` trait object.
#[derive(Clone)]
pub struct SharedNumberingStore {
    /// Inner store implementation.
    inner: Arc<dyn NumberingStore + Send + Sync>,
}

impl SharedNumberingStore {
    /// Wraps a numbering store in a shared, clonable wrapper.
    #[must_use]
    pub fn from_store(store: impl NumberingStore + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an existing shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn NumberingStore + Send + Sync>) -> Self {
        Self {
            inner: store,
        }
    }
}

impl NumberingStore for SharedNumberingStore {
    fn register_range(
        &self,
        organization_id: &OrganizationId,
        prefix: &DocumentPrefix,
        range: NumberingRange,
    ) -> Result<(), NumberingError> {
        self.inner.register_range(organization_id, prefix, range)
    }

    fn reserve(
        &self,
        organization_id: &OrganizationId,
        prefix: &DocumentPrefix,
    ) -> Result<u64, NumberingError> {
        self.inner.reserve(organization_id, prefix)
    }

    fn cursors(
        &self,
        organization_id: &OrganizationId,
        prefix: &DocumentPrefix,
    ) -> Result<Vec<NumberingCursor>, NumberingError> {
        self.inner.cursors(organization_id, prefix)
    }
}

/// Shared webhook event store backed by an `Arc` trait object.
#[derive(Clone)]
pub struct SharedWebhookEventStore {
    /// Inner store implementation.
    inner: Arc<dyn WebhookEventStore + Send + Sync>,
}

impl SharedWebhookEventStore {
    /// Wraps an event store in a shared, clonable wrapper.
    #[must_use]
    pub fn from_store(store: impl WebhookEventStore + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an existing shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn WebhookEventStore + Send + Sync>) -> Self {
        Self {
            inner: store,
        }
    }
}

impl WebhookEventStore for SharedWebhookEventStore {
    fn record(&self, event: &WebhookEvent) -> Result<RecordOutcome, StoreError> {
        self.inner.record(event)
    }

    fn cursor(&self, document: &DocumentKey) -> Result<u64, StoreError> {
        self.inner.cursor(document)
    }

    fn buffered(&self, document: &DocumentKey) -> Result<Vec<WebhookEvent>, StoreError> {
        self.inner.buffered(document)
    }

    fn settle(
        &self,
        document: &DocumentKey,
        sequence_id: u64,
        disposition: EventDisposition,
    ) -> Result<(), StoreError> {
        self.inner.settle(document, sequence_id, disposition)
    }

    fn stale_documents(&self, received_before: Timestamp) -> Result<Vec<DocumentKey>, StoreError> {
        self.inner.stale_documents(received_before)
    }
}
