// crates/epayroll-core/src/runtime/audit.rs
// ============================================================================
// Module: Pipeline Audit Logging
// Description: Structured JSON-line events for pipeline stages.
// Purpose: Emit redacted audit records without a hard logging dependency.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every stage reports a [`PipelineAuditEvent`] to an [`AuditSink`]. Events
//! carry document keys, statuses, and verbatim authority codes; they never
//! carry credential material, software PINs, or XML bodies. Sinks write one
//! JSON object per line so deployments can route them to any log pipeline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Serialize;

use crate::core::DocumentKey;
use crate::core::DocumentStatus;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Event
// ============================================================================

/// Pipeline audit event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Document key when the event concerns one document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    /// Document status after the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DocumentStatus>,
    /// Submission attempt number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Webhook sequence id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u64>,
    /// Authority or internal code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Free-form detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PipelineAuditEvent {
    /// Creates an event with no optional fields.
    #[must_use]
    pub const fn new(event: &'static str, at: Timestamp) -> Self {
        Self {
            event,
            timestamp_ms: at.as_unix_millis(),
            document: None,
            status: None,
            attempt: None,
            sequence_id: None,
            code: None,
            message: None,
        }
    }

    /// Sets the document key.
    #[must_use]
    pub fn document(mut self, key: &DocumentKey) -> Self {
        self.document = Some(key.to_string());
        self
    }

    /// Sets the resulting status.
    #[must_use]
    pub const fn status(mut self, status: DocumentStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the attempt number.
    #[must_use]
    pub const fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Sets the webhook sequence id.
    #[must_use]
    pub const fn sequence_id(mut self, sequence_id: u64) -> Self {
        self.sequence_id = Some(sequence_id);
        self
    }

    /// Sets the code.
    #[must_use]
    pub fn code(mut self, code: Option<&str>) -> Self {
        self.code = code.map(ToString::to_string);
        self
    }

    /// Sets the detail message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for pipeline events.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &PipelineAuditEvent);
}

/// Shared audit sink handle.
pub type SharedAuditSink = Arc<dyn AuditSink>;

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &PipelineAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that appends JSON lines to a file.
pub struct FileAuditSink {
    /// File handle guarded for concurrent writes.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &PipelineAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &PipelineAuditEvent) {}
}

/// Audit sink that keeps events in memory for inspection.
#[derive(Default)]
pub struct MemoryAuditSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<PipelineAuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineAuditEvent> {
        self.events.lock().map(|guard| guard.clone()).unwrap_or_default()
    }

    /// Returns the recorded event names in order.
    #[must_use]
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events().iter().map(|event| event.event).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &PipelineAuditEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test fixtures use unwraps for clarity.")]

    use super::*;

    #[test]
    fn file_sink_appends_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let key = DocumentKey::new("acme".into(), "NE".into(), 3);
        let at = Timestamp::from_unix_millis(1_706_671_800_000);

        FileAuditSink::new(&path).unwrap().record(
            &PipelineAuditEvent::new("document_signed", at)
                .document(&key)
                .status(DocumentStatus::Signed),
        );
        FileAuditSink::new(&path)
            .unwrap()
            .record(&PipelineAuditEvent::new("submission_attempt", at).attempt(1).code(None));

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> =
            text.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "document_signed");
        assert_eq!(lines[0]["document"], "acme/NE/3");
        assert_eq!(lines[0]["status"], "signed");
        assert_eq!(lines[1]["attempt"], 1);
        assert!(lines[1].get("code").is_none());
    }
}
