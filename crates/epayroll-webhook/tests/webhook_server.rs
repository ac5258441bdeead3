// crates/epayroll-webhook/tests/webhook_server.rs
// ============================================================================
// Module: Webhook Server Tests
// Description: HTTP status mapping, body limits, and gap reconciliation.
// Purpose: Validate the webhook endpoint against in-memory stores.
// ============================================================================

//! ## Overview
//! Drives the router in-process with `tower::ServiceExt::oneshot` and checks
//! that each ingest outcome and failure maps to the expected HTTP answer.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use epayroll_config::EpayrollConfig;
use epayroll_core::Amount;
use epayroll_core::Clock;
use epayroll_core::DocumentKey;
use epayroll_core::DocumentStatus;
use epayroll_core::DocumentStore;
use epayroll_core::DocumentType;
use epayroll_core::DraftParams;
use epayroll_core::ElectronicPayrollDocument;
use epayroll_core::EmployeeInfo;
use epayroll_core::EmployeeRef;
use epayroll_core::EmployerInfo;
use epayroll_core::Environment;
use epayroll_core::PayrollPeriod;
use epayroll_core::PayrollTotals;
use epayroll_core::StatusReconciler;
use epayroll_core::Timestamp;
use epayroll_core::WebhookIngestor;
use epayroll_core::WebhookVerifier;
use epayroll_core::runtime::InMemoryDocumentStore;
use epayroll_core::runtime::InMemoryWebhookEventStore;
use epayroll_core::runtime::ManualClock;
use epayroll_core::runtime::MemoryAuditSink;
use epayroll_core::runtime::SIGNATURE_HEADER;
use epayroll_core::runtime::SharedDocumentStore;
use epayroll_core::runtime::SharedWebhookEventStore;
use epayroll_core::runtime::TIMESTAMP_HEADER;
use epayroll_core::runtime::WebhookIngestorParams;
use epayroll_webhook::HEALTH_PATH;
use epayroll_webhook::WEBHOOK_PATH;
use epayroll_webhook::WebhookServer;
use epayroll_webhook::WebhookServerDeps;
use epayroll_webhook::WebhookServerError;
use epayroll_webhook::reconcile_once;
use epayroll_webhook::router;
use epayroll_webhook::startup_warnings;
use serde_json::Value;
use serde_json::json;
use tower::ServiceExt;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

const SECRET: &str = "whsec-0123456789abcdef";
const START_MS: i64 = 1_706_671_800_000;
const GAP_TIMEOUT_MS: u64 = 60_000;
const MAX_BODY_BYTES: usize = 4096;

/// Reconciler that reports a fixed status and counts queries.
#[derive(Default)]
struct CountingReconciler {
    calls: Mutex<Vec<String>>,
}

impl StatusReconciler for CountingReconciler {
    fn reconcile(&self, document: &DocumentKey) -> Result<DocumentStatus, String> {
        self.calls.lock().unwrap().push(document.to_string());
        Ok(DocumentStatus::Accepted)
    }
}

struct Fixture {
    clock: ManualClock,
    documents: SharedDocumentStore,
    reconciler: Arc<CountingReconciler>,
    ingestor: Arc<WebhookIngestor>,
    app: Router,
}

impl Fixture {
    fn new() -> Self {
        let clock = ManualClock::new(Timestamp::from_unix_millis(START_MS));
        let documents = SharedDocumentStore::from_store(InMemoryDocumentStore::new());
        let events = SharedWebhookEventStore::from_store(InMemoryWebhookEventStore::new());
        let reconciler = Arc::new(CountingReconciler::default());
        let ingestor = Arc::new(WebhookIngestor::new(WebhookIngestorParams {
            verifier: WebhookVerifier::new(SECRET, 300_000),
            documents: documents.clone(),
            events,
            reconciler: reconciler.clone(),
            clock: Arc::new(clock.clone()),
            audit: Arc::new(MemoryAuditSink::new()),
            gap_timeout_ms: GAP_TIMEOUT_MS,
        }));
        let app = router(Arc::clone(&ingestor), MAX_BODY_BYTES);
        Self {
            clock,
            documents,
            reconciler,
            ingestor,
            app,
        }
    }

    /// Inserts a document the authority has left pending.
    fn pending_document(&self, sequence_number: u64) -> DocumentKey {
        let key = DocumentKey::new("acme".into(), "NE".into(), sequence_number);
        let zero = Amount::parse("0").unwrap();
        let mut document = ElectronicPayrollDocument::draft(DraftParams {
            key: key.clone(),
            document_type: DocumentType::Individual,
            schema_version: "1.0".to_string(),
            environment: Environment::Sandbox,
            issued_at: self.clock.now(),
            utc_offset_minutes: -300,
            payroll_id: format!("run-{sequence_number}"),
            employer: EmployerInfo {
                tax_id: "900123456".to_string(),
                legal_name: "Acme Payroll S.A.S.".to_string(),
                software_id: "sw-001".to_string(),
            },
            employee: EmployeeInfo {
                reference: EmployeeRef::new("emp-7"),
                document_type: "CC".to_string(),
                document_number: "1020304050".to_string(),
                full_name: "Ana María Gómez".to_string(),
            },
            period: PayrollPeriod {
                reference: "2024-01".to_string(),
                start_date: "2024-01-01".to_string(),
                end_date: "2024-01-31".to_string(),
            },
            earnings: Vec::new(),
            deductions: Vec::new(),
            totals: PayrollTotals {
                gross: zero.clone(),
                deductions: zero.clone(),
                net: zero,
            },
            adjustment: None,
        });
        let now = self.clock.now();
        for status in [
            DocumentStatus::Generated,
            DocumentStatus::Signed,
            DocumentStatus::Submitting,
            DocumentStatus::Pending,
        ] {
            document.transition(status, now, "fixture").unwrap();
        }
        self.documents.insert(&document).unwrap();
        key
    }

    fn status(&self, key: &DocumentKey) -> DocumentStatus {
        self.documents.load(key).unwrap().unwrap().status()
    }

    async fn post(&self, body: Vec<u8>, signature: Option<String>) -> (StatusCode, Value) {
        let timestamp = self.clock.now().as_unix_millis().to_string();
        let signature = signature.unwrap_or_else(|| {
            WebhookVerifier::new(SECRET, 0).sign(&timestamp, &body).unwrap()
        });
        let request = Request::builder()
            .method("POST")
            .uri(WEBHOOK_PATH)
            .header("content-type", "application/json")
            .header(TIMESTAMP_HEADER, timestamp)
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body))
            .unwrap();
        send(self.app.clone(), request).await
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn delivery(key: &DocumentKey, event_type: &str, sequence_id: u64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "document_reference": key.to_string(),
        "event_type": event_type,
        "sequence_id": sequence_id,
        "payload": {"track_id": "T1", "code": "00", "message": event_type},
    }))
    .unwrap()
}

// ============================================================================
// SECTION: Deliveries
// ============================================================================

#[tokio::test]
async fn signed_delivery_is_applied_and_answers_accepted() {
    let fixture = Fixture::new();
    let key = fixture.pending_document(1);

    let (status, body) = fixture.post(delivery(&key, "accepted", 1), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "applied");
    assert_eq!(body["drained"], 0);
    assert_eq!(fixture.status(&key), DocumentStatus::Accepted);

    let (status, body) = fixture.post(delivery(&key, "accepted", 1), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "duplicate");
}

#[tokio::test]
async fn out_of_order_delivery_is_buffered() {
    let fixture = Fixture::new();
    let key = fixture.pending_document(1);

    let (status, body) = fixture.post(delivery(&key, "accepted", 2), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "buffered");
    assert_eq!(body["expected"], 1);
    assert_eq!(fixture.status(&key), DocumentStatus::Pending);
}

#[tokio::test]
async fn bad_signature_is_unauthorized_without_detail() {
    let fixture = Fixture::new();
    let key = fixture.pending_document(1);

    let forged = WebhookVerifier::new("another-secret-value", 0)
        .sign(&fixture.clock.now().as_unix_millis().to_string(), b"{}")
        .unwrap();
    let (status, body) = fixture.post(delivery(&key, "accepted", 1), Some(forged)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
    assert_eq!(body["message"], "delivery authentication failed");
    assert_eq!(fixture.status(&key), DocumentStatus::Pending);
}

#[tokio::test]
async fn missing_headers_are_unauthorized() {
    let fixture = Fixture::new();
    let key = fixture.pending_document(1);
    let request = Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .body(Body::from(delivery(&key, "accepted", 1)))
        .unwrap();
    let (status, _) = send(fixture.app.clone(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_and_unknown_deliveries_are_reported() {
    let fixture = Fixture::new();

    let (status, body) = fixture.post(b"{\"document_reference\":1}".to_vec(), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "malformed");

    let unknown = DocumentKey::new("acme".into(), "NE".into(), 404);
    let (status, body) = fixture.post(delivery(&unknown, "accepted", 1), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown_document");
}

#[tokio::test]
async fn oversized_body_is_rejected_before_verification() {
    let fixture = Fixture::new();
    let (status, _) = fixture.post(vec![b' '; MAX_BODY_BYTES + 1], None).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn health_endpoint_answers_ok() {
    let fixture = Fixture::new();
    let request = Request::builder().uri(HEALTH_PATH).body(Body::empty()).unwrap();
    let (status, body) = send(fixture.app.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

// ============================================================================
// SECTION: Reconciliation
// ============================================================================

#[tokio::test]
async fn stale_gap_is_reconciled_after_timeout() {
    let fixture = Fixture::new();
    let key = fixture.pending_document(1);
    let (_, body) = fixture.post(delivery(&key, "accepted", 2), None).await;
    assert_eq!(body["outcome"], "buffered");

    let reports = reconcile_once(Arc::clone(&fixture.ingestor)).await.unwrap();
    assert!(reports.is_empty());
    assert!(fixture.reconciler.calls.lock().unwrap().is_empty());

    fixture.clock.advance(Duration::from_millis(GAP_TIMEOUT_MS + 1));
    let reports = reconcile_once(Arc::clone(&fixture.ingestor)).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].document, key.to_string());
    assert_eq!(reports[0].status, Some(DocumentStatus::Accepted));
    assert!(reports[0].error.is_none());
    assert_eq!(*fixture.reconciler.calls.lock().unwrap(), vec![key.to_string()]);
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

fn deps(fixture: &Fixture) -> WebhookServerDeps {
    WebhookServerDeps {
        documents: fixture.documents.clone(),
        events: SharedWebhookEventStore::from_store(InMemoryWebhookEventStore::new()),
        reconciler: fixture.reconciler.clone(),
        clock: Arc::new(fixture.clock.clone()),
        audit: Arc::new(MemoryAuditSink::new()),
    }
}

#[test]
fn server_builds_from_config() {
    let fixture = Fixture::new();
    let config = EpayrollConfig::from_toml_str(
        "[server]\nbind = \"127.0.0.1:9191\"\n\n[webhook]\nsecret = \"0123456789abcdef0123456789abcdef\"\n",
    )
    .unwrap();
    let server = WebhookServer::from_config(&config, deps(&fixture)).unwrap();
    assert_eq!(server.bind_addr().port(), 9191);
}

#[test]
fn server_requires_a_webhook_secret() {
    let fixture = Fixture::new();
    let config = EpayrollConfig::from_toml_str("").unwrap();
    let result = WebhookServer::from_config(&config, deps(&fixture));
    assert!(matches!(result, Err(WebhookServerError::Config(_))));
}

#[test]
fn weak_deployments_produce_warnings() {
    let loopback = "127.0.0.1:8088".parse().unwrap();
    assert!(startup_warnings(loopback, 32).is_empty());

    let warnings = startup_warnings("0.0.0.0:8088".parse().unwrap(), 16);
    assert_eq!(warnings.len(), 2);
    assert!(warnings[0].contains("plain http"));
    assert!(warnings[1].contains("shorter than 32 bytes"));
}
