// crates/epayroll-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Payroll Store
// Description: Durable document, numbering, and webhook event persistence.
// Purpose: Survive restarts without reusing numbers or losing transitions.
// Dependencies: epayroll-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`SqlitePayrollStore`] implements [`DocumentStore`], [`NumberingStore`], and
//! [`WebhookEventStore`] on one `SQLite` database. Documents are stored as
//! canonical JSON with a content hash that is verified on every load.
//! Document updates are compare-and-set on the revision column, and number
//! reservation runs inside an immediate transaction so concurrent processes
//! sharing the file never hand out the same number.
//!
//! Security posture: database contents are untrusted; loads fail closed on
//! hash mismatch or malformed rows.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use epayroll_core::DocumentKey;
use epayroll_core::DocumentPrefix;
use epayroll_core::DocumentStatus;
use epayroll_core::DocumentStore;
use epayroll_core::ElectronicPayrollDocument;
use epayroll_core::EventDisposition;
use epayroll_core::HashAlgorithm;
use epayroll_core::HashDigest;
use epayroll_core::NumberingCursor;
use epayroll_core::NumberingError;
use epayroll_core::NumberingRange;
use epayroll_core::NumberingStore;
use epayroll_core::OrganizationId;
use epayroll_core::RecordOutcome;
use epayroll_core::StoreError;
use epayroll_core::Timestamp;
use epayroll_core::WebhookEvent;
use epayroll_core::WebhookEventStore;
use epayroll_core::hashing::canonical_json_bytes;
use epayroll_core::hash_bytes;
use epayroll_core::runtime::admit_range;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Current schema version.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of any single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum serialized document size in bytes.
pub const MAX_DOCUMENT_BYTES: usize = 4 * 1024 * 1024;
/// Hash algorithm for stored document snapshots.
const DOCUMENT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Journal mode applied at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// Write-ahead log; readers do not block the numbering writer.
    #[default]
    Wal,
    /// Rollback journal truncated after each commit.
    Truncate,
    /// Rollback journal deleted after each commit.
    Delete,
}

/// `synchronous` level applied at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSynchronous {
    /// Fsync on every commit.
    #[default]
    Full,
    /// Full plus a directory sync after journal deletion.
    Extra,
    /// Fsync at WAL checkpoints only.
    Normal,
}

/// `[store]` settings for the `SQLite` backend.
///
/// Issued documents are legal records, so the defaults favour durability:
/// WAL with `synchronous = full`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteStoreConfig {
    /// Database file.
    pub path: PathBuf,
    /// How long a writer waits on a locked database.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// Sync level.
    #[serde(default)]
    pub synchronous: SqliteSynchronous,
}

impl SqliteStoreConfig {
    /// Durable defaults for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            synchronous: SqliteSynchronous::default(),
        }
    }

    /// Pragma statements run on every new connection.
    #[must_use]
    pub fn pragma_batch(&self) -> String {
        let journal = match self.journal_mode {
            SqliteJournalMode::Wal => "WAL",
            SqliteJournalMode::Truncate => "TRUNCATE",
            SqliteJournalMode::Delete => "DELETE",
        };
        let synchronous = match self.synchronous {
            SqliteSynchronous::Full => "FULL",
            SqliteSynchronous::Extra => "EXTRA",
            SqliteSynchronous::Normal => "NORMAL",
        };
        format!(
            "PRAGMA foreign_keys = ON; PRAGMA journal_mode = {journal}; PRAGMA synchronous = {synchronous};"
        )
    }
}

/// Serde default for `busy_timeout_ms`.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Failures of the `SQLite` backend.
///
/// Messages name document keys, never document contents.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or hash mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data or configuration.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Compare-and-set failed or the record already exists.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
    /// Record does not exist.
    #[error("sqlite store record not found: {0}")]
    NotFound(String),
    /// Payload exceeded the size limit.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
            SqliteStoreError::TooLarge {
                max_bytes,
                actual_bytes,
            } => Self::Invalid(format!(
                "document_json exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

impl From<SqliteStoreError> for NumberingError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Store(error.to_string())
    }
}

/// Maps a rusqlite error into a store error.
fn db_error(err: &rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed payroll store.
///
/// # Invariants
/// - Document loads verify stored hashes before deserialization.
/// - Connection access within one process is serialized through a mutex.
#[derive(Debug, Clone)]
pub struct SqlitePayrollStore {
    /// Shared `SQLite` connection.
    connection: Arc<Mutex<Connection>>,
}

impl SqlitePayrollStore {
    /// Opens the store, creating the schema when missing.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the path is unsafe or the database
    /// cannot be opened or initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        prepare_store_path(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Runs `SELECT 1` to confirm the database is usable.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn readiness(&self) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        guard.query_row("SELECT 1", [], |_| Ok(())).map_err(|err| db_error(&err))
    }

    /// Locks the connection.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("sqlite store mutex poisoned".to_string()))
    }

    /// Loads and verifies one document.
    fn load_document(
        &self,
        key: &DocumentKey,
    ) -> Result<Option<ElectronicPayrollDocument>, SqliteStoreError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT document_json, document_hash, hash_algorithm FROM documents WHERE \
                 organization_id = ?1 AND prefix = ?2 AND sequence_number = ?3",
                params![key.organization_id.as_str(), key.prefix.as_str(), to_i64(key.sequence_number)?],
                |row| {
                    let bytes: Vec<u8> = row.get(0)?;
                    let hash: String = row.get(1)?;
                    let algorithm: String = row.get(2)?;
                    Ok((bytes, hash, algorithm))
                },
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        drop(guard);
        let Some((bytes, hash, algorithm)) = row else {
            return Ok(None);
        };
        if algorithm != DOCUMENT_HASH_ALGORITHM.as_str() {
            return Err(SqliteStoreError::Corrupt(format!(
                "unsupported hash algorithm for document {key}: {algorithm}"
            )));
        }
        if bytes.len() > MAX_DOCUMENT_BYTES {
            return Err(SqliteStoreError::TooLarge {
                max_bytes: MAX_DOCUMENT_BYTES,
                actual_bytes: bytes.len(),
            });
        }
        let stored = HashDigest {
            algorithm: DOCUMENT_HASH_ALGORITHM,
            value: hash,
        };
        if !stored.matches(&bytes) {
            return Err(SqliteStoreError::Corrupt(format!("hash mismatch for document {key}")));
        }
        let document: ElectronicPayrollDocument = serde_json::from_slice(&bytes)
            .map_err(|err| SqliteStoreError::Corrupt(format!("document {key}: {err}")))?;
        if document.key != *key {
            return Err(SqliteStoreError::Corrupt(format!("document {key} stored under wrong key")));
        }
        Ok(Some(document))
    }

    /// Inserts or replaces a document.
    fn write_document(
        &self,
        document: &ElectronicPayrollDocument,
        insert: bool,
    ) -> Result<(), SqliteStoreError> {
        let snapshot = DocumentSnapshot::prepare(document)?;
        let key = &document.key;
        let sequence = to_i64(key.sequence_number)?;
        let mut guard = self.lock()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(&err))?;
        let stored: Option<i64> = tx
            .query_row(
                "SELECT revision FROM documents WHERE organization_id = ?1 AND prefix = ?2 AND \
                 sequence_number = ?3",
                params![key.organization_id.as_str(), key.prefix.as_str(), sequence],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        match (insert, stored) {
            (true, Some(_)) => {
                return Err(SqliteStoreError::Conflict(format!("document {key} already exists")));
            }
            (true, None) => {
                tx.execute(
                    "INSERT INTO documents (organization_id, prefix, sequence_number, status, \
                     revision, document_json, document_hash, hash_algorithm) VALUES (?1, ?2, ?3, \
                     ?4, ?5, ?6, ?7, ?8)",
                    params![
                        key.organization_id.as_str(),
                        key.prefix.as_str(),
                        sequence,
                        document.status().as_str(),
                        snapshot.revision,
                        snapshot.bytes,
                        snapshot.hash,
                        DOCUMENT_HASH_ALGORITHM.as_str(),
                    ],
                )
                .map_err(|err| db_error(&err))?;
            }
            (false, None) => return Err(SqliteStoreError::NotFound(key.to_string())),
            (false, Some(revision)) => {
                if revision + 1 != snapshot.revision {
                    return Err(SqliteStoreError::Conflict(format!(
                        "document {key} is at revision {revision}, update carries {}",
                        snapshot.revision
                    )));
                }
                tx.execute(
                    "UPDATE documents SET status = ?4, revision = ?5, document_json = ?6, \
                     document_hash = ?7 WHERE organization_id = ?1 AND prefix = ?2 AND \
                     sequence_number = ?3 AND revision = ?8",
                    params![
                        key.organization_id.as_str(),
                        key.prefix.as_str(),
                        sequence,
                        document.status().as_str(),
                        snapshot.revision,
                        snapshot.bytes,
                        snapshot.hash,
                        revision,
                    ],
                )
                .map_err(|err| db_error(&err))?;
            }
        }
        tx.commit().map_err(|err| db_error(&err))?;
        drop(guard);
        Ok(())
    }
}

/// Serialized document ready for persistence.
struct DocumentSnapshot {
    /// Canonical JSON bytes.
    bytes: Vec<u8>,
    /// Hex digest of `bytes`.
    hash: String,
    /// Document revision.
    revision: i64,
}

impl DocumentSnapshot {
    /// Serializes and hashes a document.
    fn prepare(document: &ElectronicPayrollDocument) -> Result<Self, SqliteStoreError> {
        let bytes = canonical_json_bytes(document)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        if bytes.len() > MAX_DOCUMENT_BYTES {
            return Err(SqliteStoreError::TooLarge {
                max_bytes: MAX_DOCUMENT_BYTES,
                actual_bytes: bytes.len(),
            });
        }
        let hash = hash_bytes(DOCUMENT_HASH_ALGORITHM, &bytes).value;
        Ok(Self {
            bytes,
            hash,
            revision: to_i64(document.revision())?,
        })
    }
}

// ============================================================================
// SECTION: Document Store
// ============================================================================

impl DocumentStore for SqlitePayrollStore {
    fn load(&self, key: &DocumentKey) -> Result<Option<ElectronicPayrollDocument>, StoreError> {
        self.load_document(key).map_err(StoreError::from)
    }

    fn insert(&self, document: &ElectronicPayrollDocument) -> Result<(), StoreError> {
        if document.revision() != 0 {
            return Err(StoreError::Invalid(format!(
                "insert requires revision 0, got {}",
                document.revision()
            )));
        }
        self.write_document(document, true).map_err(StoreError::from)
    }

    fn update(&self, document: &ElectronicPayrollDocument) -> Result<(), StoreError> {
        self.write_document(document, false).map_err(StoreError::from)
    }

    fn list_by_status(
        &self,
        organization_id: &OrganizationId,
        statuses: &[DocumentStatus],
    ) -> Result<Vec<DocumentKey>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT prefix, sequence_number, status FROM documents WHERE organization_id = \
                 ?1 ORDER BY prefix, sequence_number",
            )
            .map_err(|err| db_error(&err))?;
        let rows = statement
            .query_map(params![organization_id.as_str()], |row| {
                let prefix: String = row.get(0)?;
                let sequence: i64 = row.get(1)?;
                let status: String = row.get(2)?;
                Ok((prefix, sequence, status))
            })
            .map_err(|err| db_error(&err))?;
        let mut keys = Vec::new();
        for row in rows {
            let (prefix, sequence, status) = row.map_err(|err| db_error(&err))?;
            if statuses.iter().any(|wanted| wanted.as_str() == status) {
                keys.push(DocumentKey {
                    organization_id: organization_id.clone(),
                    prefix: DocumentPrefix::new(prefix),
                    sequence_number: to_u64(sequence)?,
                });
            }
        }
        Ok(keys)
    }
}

// ============================================================================
// SECTION: Numbering Store
// ============================================================================

/// Loads the cursors of one `(organization, prefix)` inside a transaction.
fn load_cursors(
    tx: &Transaction<'_>,
    organization_id: &OrganizationId,
    prefix: &DocumentPrefix,
) -> Result<Vec<NumberingCursor>, SqliteStoreError> {
    let mut statement = tx
        .prepare(
            "SELECT range_start, range_end, next_number FROM numbering_ranges WHERE \
             organization_id = ?1 AND prefix = ?2 ORDER BY range_start",
        )
        .map_err(|err| db_error(&err))?;
    let rows = statement
        .query_map(params![organization_id.as_str(), prefix.as_str()], |row| {
            let start: i64 = row.get(0)?;
            let end: i64 = row.get(1)?;
            let next: i64 = row.get(2)?;
            Ok((start, end, next))
        })
        .map_err(|err| db_error(&err))?;
    let mut cursors = Vec::new();
    for row in rows {
        let (start, end, next) = row.map_err(|err| db_error(&err))?;
        let cursor = NumberingCursor {
            range: NumberingRange {
                start: to_u64(start)?,
                end: to_u64(end)?,
            },
            next: to_u64(next)?,
        };
        if !cursor.range.is_valid()
            || cursor.next < cursor.range.start
            || cursor.next > cursor.range.end.saturating_add(1)
        {
            return Err(SqliteStoreError::Corrupt(format!(
                "numbering cursor out of range for {organization_id}/{prefix}"
            )));
        }
        cursors.push(cursor);
    }
    Ok(cursors)
}

impl NumberingStore for SqlitePayrollStore {
    fn register_range(
        &self,
        organization_id: &OrganizationId,
        prefix: &DocumentPrefix,
        range: NumberingRange,
    ) -> Result<(), NumberingError> {
        let mut guard = self.lock()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(&err))?;
        let cursors = load_cursors(&tx, organization_id, prefix)?;
        if admit_range(&cursors, range)? {
            tx.execute(
                "INSERT INTO numbering_ranges (organization_id, prefix, range_start, range_end, \
                 next_number) VALUES (?1, ?2, ?3, ?4, ?3)",
                params![
                    organization_id.as_str(),
                    prefix.as_str(),
                    to_i64(range.start)?,
                    to_i64(range.end)?,
                ],
            )
            .map_err(|err| db_error(&err))?;
        }
        tx.commit().map_err(|err| db_error(&err))?;
        drop(guard);
        Ok(())
    }

    fn reserve(
        &self,
        organization_id: &OrganizationId,
        prefix: &DocumentPrefix,
    ) -> Result<u64, NumberingError> {
        let mut guard = self.lock()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(&err))?;
        let cursors = load_cursors(&tx, organization_id, prefix)?;
        let Some(cursor) = cursors.into_iter().find(|cursor| !cursor.is_exhausted()) else {
            return Err(NumberingError::RangeExhausted {
                organization_id: organization_id.clone(),
                prefix: prefix.clone(),
            });
        };
        let number = cursor.next;
        let updated = tx
            .execute(
                "UPDATE numbering_ranges SET next_number = ?4 WHERE organization_id = ?1 AND \
                 prefix = ?2 AND range_start = ?3",
                params![
                    organization_id.as_str(),
                    prefix.as_str(),
                    to_i64(cursor.range.start)?,
                    to_i64(number.saturating_add(1))?,
                ],
            )
            .map_err(|err| db_error(&err))?;
        if updated != 1 {
            return Err(NumberingError::Store(format!(
                "numbering range vanished for {organization_id}/{prefix}"
            )));
        }
        tx.commit().map_err(|err| db_error(&err))?;
        drop(guard);
        Ok(number)
    }

    fn cursors(
        &self,
        organization_id: &OrganizationId,
        prefix: &DocumentPrefix,
    ) -> Result<Vec<NumberingCursor>, NumberingError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_error(&err))?;
        let cursors = load_cursors(&tx, organization_id, prefix)?;
        tx.commit().map_err(|err| db_error(&err))?;
        drop(guard);
        Ok(cursors)
    }
}

// ============================================================================
// SECTION: Webhook Event Store
// ============================================================================

/// Key columns shared by event rows and cursors.
fn event_key_params(document: &DocumentKey) -> Result<(String, String, i64), SqliteStoreError> {
    Ok((
        document.organization_id.as_str().to_string(),
        document.prefix.as_str().to_string(),
        to_i64(document.sequence_number)?,
    ))
}

/// Reads the settled cursor inside a connection.
fn read_cursor(connection: &Connection, document: &DocumentKey) -> Result<u64, SqliteStoreError> {
    let (organization, prefix, sequence) = event_key_params(document)?;
    let cursor: Option<i64> = connection
        .query_row(
            "SELECT cursor FROM webhook_cursors WHERE organization_id = ?1 AND prefix = ?2 AND \
             sequence_number = ?3",
            params![organization, prefix, sequence],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| db_error(&err))?;
    cursor.map_or(Ok(0), to_u64)
}

/// Decodes an event row.
fn decode_event(bytes: &[u8], disposition: Option<String>) -> Result<WebhookEvent, SqliteStoreError> {
    let mut event: WebhookEvent = serde_json::from_slice(bytes)
        .map_err(|err| SqliteStoreError::Corrupt(format!("webhook event: {err}")))?;
    event.disposition = match disposition.as_deref() {
        None => None,
        Some(label) => Some(parse_disposition(label)?),
    };
    Ok(event)
}

/// Parses a stored disposition label.
fn parse_disposition(label: &str) -> Result<EventDisposition, SqliteStoreError> {
    [EventDisposition::Applied, EventDisposition::Discarded, EventDisposition::Superseded]
        .into_iter()
        .find(|disposition| disposition.as_str() == label)
        .ok_or_else(|| SqliteStoreError::Corrupt(format!("unknown event disposition: {label}")))
}

impl WebhookEventStore for SqlitePayrollStore {
    fn record(&self, event: &WebhookEvent) -> Result<RecordOutcome, StoreError> {
        let (organization, prefix, sequence) = event_key_params(&event.document)?;
        let mut stored = event.clone();
        stored.disposition = None;
        let bytes = serde_json::to_vec(&stored)
            .map_err(|err| StoreError::Invalid(format!("webhook event: {err}")))?;
        let guard = self.lock()?;
        let inserted = guard
            .execute(
                "INSERT OR IGNORE INTO webhook_events (organization_id, prefix, sequence_number, \
                 sequence_id, event_json, received_at, disposition) VALUES (?1, ?2, ?3, ?4, ?5, \
                 ?6, ?7)",
                params![
                    organization,
                    prefix,
                    sequence,
                    to_i64(event.sequence_id)?,
                    bytes,
                    event.received_at.as_unix_millis(),
                    event.disposition.map(EventDisposition::as_str),
                ],
            )
            .map_err(|err| db_error(&err))?;
        drop(guard);
        Ok(if inserted == 1 { RecordOutcome::Inserted } else { RecordOutcome::Duplicate })
    }

    fn cursor(&self, document: &DocumentKey) -> Result<u64, StoreError> {
        let guard = self.lock()?;
        let cursor = read_cursor(&guard, document)?;
        drop(guard);
        Ok(cursor)
    }

    fn buffered(&self, document: &DocumentKey) -> Result<Vec<WebhookEvent>, StoreError> {
        let (organization, prefix, sequence) = event_key_params(document)?;
        let guard = self.lock()?;
        let cursor = to_i64(read_cursor(&guard, document)?)?;
        let mut statement = guard
            .prepare(
                "SELECT event_json, disposition FROM webhook_events WHERE organization_id = ?1 \
                 AND prefix = ?2 AND sequence_number = ?3 AND sequence_id > ?4 AND disposition \
                 IS NULL ORDER BY sequence_id",
            )
            .map_err(|err| db_error(&err))?;
        let rows = statement
            .query_map(params![organization, prefix, sequence, cursor], |row| {
                let bytes: Vec<u8> = row.get(0)?;
                let disposition: Option<String> = row.get(1)?;
                Ok((bytes, disposition))
            })
            .map_err(|err| db_error(&err))?;
        let mut events = Vec::new();
        for row in rows {
            let (bytes, disposition) = row.map_err(|err| db_error(&err))?;
            events.push(decode_event(&bytes, disposition)?);
        }
        Ok(events)
    }

    fn settle(
        &self,
        document: &DocumentKey,
        sequence_id: u64,
        disposition: EventDisposition,
    ) -> Result<(), StoreError> {
        let (organization, prefix, sequence) = event_key_params(document)?;
        let sequence_id_i64 = to_i64(sequence_id)?;
        let mut guard = self.lock()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(&err))?;
        let updated = tx
            .execute(
                "UPDATE webhook_events SET disposition = ?5 WHERE organization_id = ?1 AND prefix \
                 = ?2 AND sequence_number = ?3 AND sequence_id = ?4",
                params![organization, prefix, sequence, sequence_id_i64, disposition.as_str()],
            )
            .map_err(|err| db_error(&err))?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("{document}#{sequence_id}")));
        }
        tx.execute(
            "INSERT INTO webhook_cursors (organization_id, prefix, sequence_number, cursor) \
             VALUES (?1, ?2, ?3, ?4) ON CONFLICT (organization_id, prefix, sequence_number) DO \
             UPDATE SET cursor = MAX(cursor, excluded.cursor)",
            params![organization, prefix, sequence, sequence_id_i64],
        )
        .map_err(|err| db_error(&err))?;
        tx.commit().map_err(|err| db_error(&err))?;
        drop(guard);
        Ok(())
    }

    fn stale_documents(&self, received_before: Timestamp) -> Result<Vec<DocumentKey>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT DISTINCT e.organization_id, e.prefix, e.sequence_number FROM \
                 webhook_events e LEFT JOIN webhook_cursors c ON c.organization_id = \
                 e.organization_id AND c.prefix = e.prefix AND c.sequence_number = \
                 e.sequence_number WHERE e.disposition IS NULL AND e.sequence_id > \
                 COALESCE(c.cursor, 0) AND e.received_at < ?1 ORDER BY e.organization_id, \
                 e.prefix, e.sequence_number",
            )
            .map_err(|err| db_error(&err))?;
        let rows = statement
            .query_map(params![received_before.as_unix_millis()], |row| {
                let organization: String = row.get(0)?;
                let prefix: String = row.get(1)?;
                let sequence: i64 = row.get(2)?;
                Ok((organization, prefix, sequence))
            })
            .map_err(|err| db_error(&err))?;
        let mut keys = Vec::new();
        for row in rows {
            let (organization, prefix, sequence) = row.map_err(|err| db_error(&err))?;
            keys.push(DocumentKey {
                organization_id: OrganizationId::new(organization),
                prefix: DocumentPrefix::new(prefix),
                sequence_number: to_u64(sequence)?,
            });
        }
        Ok(keys)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Converts an unsigned value to an `SQLite` integer.
fn to_i64(value: u64) -> Result<i64, SqliteStoreError> {
    i64::try_from(value)
        .map_err(|_| SqliteStoreError::Invalid(format!("value exceeds sqlite integer range: {value}")))
}

/// Converts a stored integer back to an unsigned value.
fn to_u64(value: i64) -> Result<u64, SqliteStoreError> {
    u64::try_from(value).map_err(|_| SqliteStoreError::Corrupt(format!("negative stored value: {value}")))
}

/// Rejects unusable store paths and creates the parent directory.
fn prepare_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let invalid = |reason: &str| SqliteStoreError::Invalid(format!("store path {reason}"));
    if path.as_os_str().is_empty() {
        return Err(invalid("must not be empty"));
    }
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(invalid("exceeds length limit"));
    }
    if path.components().any(|component| component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH) {
        return Err(invalid("contains an overlong component"));
    }
    if path.is_dir() {
        return Err(invalid("names a directory"));
    }
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
        }
        Some(_) => Ok(()),
        None => Err(SqliteStoreError::Io("store path has no parent directory".to_string())),
    }
}

/// Opens the database file and applies configured pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let connection = Connection::open_with_flags(
        &config.path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
    )
    .map_err(|err| db_error(&err))?;
    connection.execute_batch(&config.pragma_batch()).map_err(|err| db_error(&err))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| db_error(&err))?;
    Ok(connection)
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| db_error(&err))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| db_error(&err))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| db_error(&err))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| db_error(&err))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS documents (
                    organization_id TEXT NOT NULL,
                    prefix TEXT NOT NULL,
                    sequence_number INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    revision INTEGER NOT NULL,
                    document_json BLOB NOT NULL,
                    document_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    PRIMARY KEY (organization_id, prefix, sequence_number)
                );
                CREATE INDEX IF NOT EXISTS idx_documents_status
                    ON documents (organization_id, status);
                CREATE TABLE IF NOT EXISTS numbering_ranges (
                    organization_id TEXT NOT NULL,
                    prefix TEXT NOT NULL,
                    range_start INTEGER NOT NULL,
                    range_end INTEGER NOT NULL,
                    next_number INTEGER NOT NULL,
                    PRIMARY KEY (organization_id, prefix, range_start)
                );
                CREATE TABLE IF NOT EXISTS webhook_events (
                    organization_id TEXT NOT NULL,
                    prefix TEXT NOT NULL,
                    sequence_number INTEGER NOT NULL,
                    sequence_id INTEGER NOT NULL,
                    event_json BLOB NOT NULL,
                    received_at INTEGER NOT NULL,
                    disposition TEXT,
                    PRIMARY KEY (organization_id, prefix, sequence_number, sequence_id)
                );
                CREATE INDEX IF NOT EXISTS idx_webhook_events_pending
                    ON webhook_events (disposition, received_at);
                CREATE TABLE IF NOT EXISTS webhook_cursors (
                    organization_id TEXT NOT NULL,
                    prefix TEXT NOT NULL,
                    sequence_number INTEGER NOT NULL,
                    cursor INTEGER NOT NULL,
                    PRIMARY KEY (organization_id, prefix, sequence_number)
                );",
            )
            .map_err(|err| db_error(&err))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| db_error(&err))?;
    Ok(())
}
