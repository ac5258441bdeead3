// crates/epayroll-webhook/src/server.rs
// ============================================================================
// Module: Webhook Server
// Description: HTTP receiver for authority status notifications.
// Purpose: Authenticate deliveries and hand them to the webhook ingestor.
// Dependencies: epayroll-core, epayroll-config, axum, tokio
// ============================================================================

//! ## Overview
//! The webhook server exposes `POST /webhooks/authority` and `GET /healthz`.
//! Deliveries are size-checked, then verified and applied by
//! [`WebhookIngestor`] on the blocking pool, since stores and the reconciler
//! perform blocking I/O. A background task periodically reconciles sequence
//! gaps that waited longer than the configured timeout.
//!
//! Security posture: request bodies and headers are untrusted. Authentication
//! failures answer `401` without detail, and nothing is recorded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use epayroll_config::EpayrollConfig;
use epayroll_core::Clock;
use epayroll_core::SharedAuditSink;
use epayroll_core::StatusReconciler;
use epayroll_core::WebhookError;
use epayroll_core::WebhookIngestor;
use epayroll_core::WebhookVerifier;
use epayroll_core::runtime::RawDelivery;
use epayroll_core::runtime::ReconcileReport;
use epayroll_core::runtime::SIGNATURE_HEADER;
use epayroll_core::runtime::SharedDocumentStore;
use epayroll_core::runtime::SharedWebhookEventStore;
use epayroll_core::runtime::TIMESTAMP_HEADER;
use epayroll_core::runtime::WebhookIngestorParams;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Delivery route.
pub const WEBHOOK_PATH: &str = "/webhooks/authority";
/// Liveness route.
pub const HEALTH_PATH: &str = "/healthz";
/// Secret length below which a startup warning is printed.
pub const RECOMMENDED_SECRET_BYTES: usize = 32;

// ============================================================================
// SECTION: Server
// ============================================================================

/// Collaborators the server wires into its ingestor.
pub struct WebhookServerDeps {
    /// Document store.
    pub documents: SharedDocumentStore,
    /// Webhook event store.
    pub events: SharedWebhookEventStore,
    /// Authority status resolver for stale gaps.
    pub reconciler: Arc<dyn StatusReconciler + Send + Sync>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Audit sink.
    pub audit: SharedAuditSink,
}

/// Webhook server instance.
pub struct WebhookServer {
    /// Shared ingestor.
    ingestor: Arc<WebhookIngestor>,
    /// Bind address.
    bind: SocketAddr,
    /// Maximum request body size.
    max_body_bytes: usize,
    /// Interval between reconciliation passes.
    reconcile_interval: Duration,
}

impl WebhookServer {
    /// Builds a server from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookServerError::Config`] when the bind address or the
    /// webhook secret cannot be resolved.
    pub fn from_config(
        config: &EpayrollConfig,
        deps: WebhookServerDeps,
    ) -> Result<Self, WebhookServerError> {
        let bind =
            config.server.bind_addr().map_err(|err| WebhookServerError::Config(err.to_string()))?;
        let secret = config
            .webhook
            .resolve_secret()
            .map_err(|err| WebhookServerError::Config(err.to_string()))?;
        for warning in startup_warnings(bind, secret.len()) {
            let _ = writeln!(std::io::stderr(), "epayroll-webhook: WARNING: {warning}");
        }
        let ingestor = WebhookIngestor::new(WebhookIngestorParams {
            verifier: WebhookVerifier::new(secret, config.webhook.max_skew_ms),
            documents: deps.documents,
            events: deps.events,
            reconciler: deps.reconciler,
            clock: deps.clock,
            audit: deps.audit,
            gap_timeout_ms: config.webhook.gap_timeout_ms,
        });
        Ok(Self {
            ingestor: Arc::new(ingestor),
            bind,
            max_body_bytes: config.server.max_body_bytes,
            reconcile_interval: Duration::from_millis(config.webhook.reconcile_interval_ms),
        })
    }

    /// Returns the configured bind address.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        self.bind
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookServerError::Transport`] when binding or serving fails.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), WebhookServerError> {
        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|err| WebhookServerError::Transport(format!("webhook bind failed: {err}")))?;
        self.serve_on(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookServerError::Transport`] when serving fails.
    pub async fn serve_on(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), WebhookServerError> {
        let reconciler = spawn_reconciler(Arc::clone(&self.ingestor), self.reconcile_interval);
        let app = router(self.ingestor, self.max_body_bytes);
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|err| WebhookServerError::Transport(format!("webhook server failed: {err}")));
        reconciler.abort();
        result
    }
}

/// Returns operator warnings for a weak deployment.
#[must_use]
pub fn startup_warnings(bind: SocketAddr, secret_len: usize) -> Vec<String> {
    let mut warnings = Vec::new();
    if !bind.ip().is_loopback() {
        warnings.push(format!(
            "listening on {bind} over plain http; terminate tls in front of this server"
        ));
    }
    if secret_len < RECOMMENDED_SECRET_BYTES {
        warnings.push(format!(
            "webhook secret is shorter than {RECOMMENDED_SECRET_BYTES} bytes; rotate to a longer \
             random secret"
        ));
    }
    warnings
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Shared state for request handlers.
struct ServerState {
    /// Shared ingestor.
    ingestor: Arc<WebhookIngestor>,
    /// Maximum allowed request body size.
    max_body_bytes: usize,
}

/// Builds the webhook router.
#[must_use]
pub fn router(ingestor: Arc<WebhookIngestor>, max_body_bytes: usize) -> Router {
    let state = Arc::new(ServerState {
        ingestor,
        max_body_bytes,
    });
    Router::new()
        .route(WEBHOOK_PATH, post(handle_delivery))
        .route(HEALTH_PATH, get(handle_health))
        .layer(DefaultBodyLimit::max(max_body_bytes.saturating_add(1)))
        .with_state(state)
}

/// Error body returned for refused deliveries.
#[derive(Debug, Serialize)]
struct ErrorBody {
    /// Stable error kind.
    error: &'static str,
    /// Human-readable detail.
    message: String,
}

/// Liveness body.
#[derive(Debug, Serialize)]
struct HealthBody {
    /// Always `ok`.
    status: &'static str,
}

/// Answers liveness probes.
async fn handle_health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
    })
}

/// Verifies and applies one delivery.
async fn handle_delivery(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.len() > state.max_body_bytes {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            "request body too large".to_string(),
        );
    }
    let timestamp = header_text(&headers, TIMESTAMP_HEADER);
    let signature = header_text(&headers, SIGNATURE_HEADER);
    let ingestor = Arc::clone(&state.ingestor);
    let result = tokio::task::spawn_blocking(move || {
        ingestor.ingest(&RawDelivery {
            timestamp: timestamp.as_deref(),
            signature: signature.as_deref(),
            body: &body,
        })
    })
    .await;
    match result {
        Ok(Ok(outcome)) => (StatusCode::ACCEPTED, Json(outcome)).into_response(),
        Ok(Err(err)) => webhook_error_response(&err),
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "ingest task failed".to_string(),
        ),
    }
}

/// Returns a header value as text, ignoring non-UTF-8 values.
fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_string)
}

/// Maps an ingest failure to an HTTP response.
fn webhook_error_response(err: &WebhookError) -> Response {
    match err {
        WebhookError::Unauthorized(_) | WebhookError::StaleTimestamp(_) => error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "delivery authentication failed".to_string(),
        ),
        WebhookError::Malformed(message) => {
            error_response(StatusCode::BAD_REQUEST, "malformed", message.clone())
        }
        WebhookError::UnknownDocument(document) => {
            error_response(StatusCode::NOT_FOUND, "unknown_document", document.clone())
        }
        WebhookError::Contention(document) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "contention", document.clone())
        }
        WebhookError::Store(_) | WebhookError::Document(_) | WebhookError::Transition(_) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
        }
    }
}

/// Builds a JSON error response.
fn error_response(status: StatusCode, error: &'static str, message: String) -> Response {
    (
        status,
        Json(ErrorBody {
            error,
            message,
        }),
    )
        .into_response()
}

// ============================================================================
// SECTION: Reconciler
// ============================================================================

/// Runs one reconciliation pass on the blocking pool.
///
/// # Errors
///
/// Returns [`WebhookServerError::Reconcile`] when the pass fails.
pub async fn reconcile_once(
    ingestor: Arc<WebhookIngestor>,
) -> Result<Vec<ReconcileReport>, WebhookServerError> {
    tokio::task::spawn_blocking(move || ingestor.reconcile_stale())
        .await
        .map_err(|err| WebhookServerError::Reconcile(err.to_string()))?
        .map_err(|err| WebhookServerError::Reconcile(err.to_string()))
}

/// Spawns the periodic gap reconciler.
#[must_use]
pub fn spawn_reconciler(ingestor: Arc<WebhookIngestor>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = reconcile_once(Arc::clone(&ingestor)).await {
                let _ = writeln!(std::io::stderr(), "epayroll-webhook: reconcile failed: {err}");
            }
        }
    })
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Webhook server errors.
#[derive(Debug, Error)]
pub enum WebhookServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
    /// Reconciliation pass failures.
    #[error("reconcile error: {0}")]
    Reconcile(String),
}
