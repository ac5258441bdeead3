// crates/epayroll-transport/src/http.rs
// ============================================================================
// Module: Authority HTTP Transport
// Description: Blocking HTTP implementation of the authority protocol.
// Purpose: Perform exactly one submit, query, or cancel call per invocation.
// Dependencies: epayroll-core, reqwest, serde_json, url
// ============================================================================

//! ## Overview
//! [`HttpAuthorityTransport`] speaks JSON over HTTP to the tax authority.
//! Every method performs a single request; retry and backoff belong to the
//! pipeline runtime. Failures are classified so callers can tell transient
//! outages from validation refusals.
//! Invariants:
//! - Redirects are never followed.
//! - Response bodies are capped at the configured byte limit.
//! - `408`, `429`, and `5xx` are transient; other `4xx` are validation
//!   failures whose code and message are copied verbatim.
//!
//! Security posture: authority responses are untrusted input and are parsed
//! with strict size limits.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;
use std::time::Duration;

use epayroll_core::AuthorityResponse;
use epayroll_core::AuthorityTransport;
use epayroll_core::CancelAck;
use epayroll_core::Environment;
use epayroll_core::IdempotencyKey;
use epayroll_core::QueryTarget;
use epayroll_core::SubmitReply;
use epayroll_core::SubmitRequest;
use epayroll_core::TrackId;
use epayroll_core::TransportError;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::blocking::RequestBuilder;
use reqwest::blocking::Response;
use reqwest::header::AUTHORIZATION;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use serde::Deserialize;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header carrying the per-document idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
/// Header carrying the document key.
pub const DOCUMENT_KEY_HEADER: &str = "X-Document-Key";
/// Header carrying the CUNE.
pub const CUNE_HEADER: &str = "X-Cune";
/// Default response body cap in bytes.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 256 * 1024;
/// Maximum characters of a raw body copied into an error message.
const MAX_EXCERPT_CHARS: usize = 512;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Base URLs per environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityEndpoints {
    /// Sandbox base URL.
    pub sandbox: Url,
    /// Production base URL.
    pub production: Url,
}

impl AuthorityEndpoints {
    /// Uses one base URL for both environments.
    #[must_use]
    pub fn single(base: Url) -> Self {
        Self {
            sandbox: base.clone(),
            production: base,
        }
    }

    /// Returns the base URL for an environment.
    #[must_use]
    pub const fn base(&self, environment: Environment) -> &Url {
        match environment {
            Environment::Sandbox => &self.sandbox,
            Environment::Production => &self.production,
        }
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Base URLs.
    pub endpoints: AuthorityEndpoints,
    /// Total per-request timeout.
    pub request_timeout: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Optional bearer token.
    pub bearer_token: Option<String>,
    /// Maximum response body size in bytes.
    pub max_response_bytes: usize,
}

impl HttpTransportConfig {
    /// Creates settings with default timeouts and limits.
    #[must_use]
    pub const fn new(endpoints: AuthorityEndpoints) -> Self {
        Self {
            endpoints,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            bearer_token: None,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Body of a `409` duplicate answer.
#[derive(Debug, Deserialize)]
struct DuplicateBody {
    /// Tracking id of the existing submission.
    #[serde(default)]
    track_id: Option<TrackId>,
}

/// Body of a validation refusal.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    /// Authority error code.
    #[serde(default)]
    code: Option<String>,
    /// Authority error message.
    #[serde(default)]
    message: Option<String>,
}

// ============================================================================
// SECTION: Transport
// ============================================================================

/// Blocking HTTP client for the authority.
///
/// # Invariants
/// - Each trait method sends at most one request.
#[derive(Debug, Clone)]
pub struct HttpAuthorityTransport {
    /// Underlying HTTP client.
    client: Client,
    /// Endpoints and limits.
    config: HttpTransportConfig,
}

impl HttpAuthorityTransport {
    /// Builds a transport with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Config`] when the client cannot be built or a
    /// base URL is not an `http`/`https` URL.
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        for base in [&config.endpoints.sandbox, &config.endpoints.production] {
            match base.scheme() {
                "http" | "https" => {}
                scheme => {
                    return Err(TransportError::Config(format!("unsupported scheme: {scheme}")));
                }
            }
            if base.cannot_be_a_base() {
                return Err(TransportError::Config(format!("base url cannot be a base: {base}")));
            }
        }
        if config.max_response_bytes == 0 {
            return Err(TransportError::Config("max_response_bytes must be positive".to_string()));
        }
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|err| TransportError::Config(err.to_string()))?;
        Ok(Self {
            client,
            config,
        })
    }

    /// Returns the transport settings.
    #[must_use]
    pub const fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    /// Builds a URL under the environment base.
    fn endpoint(&self, environment: Environment, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.config.endpoints.base(environment).clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::Config("base url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Adds the bearer token when configured.
    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    /// Sends a request and reads the capped body.
    fn send(&self, builder: RequestBuilder) -> Result<(StatusCode, Vec<u8>), TransportError> {
        let response = self.authorize(builder).send().map_err(classify_send_error)?;
        let status = response.status();
        if status.is_redirection() {
            return Err(TransportError::Protocol(format!("unexpected redirect (status {status})")));
        }
        let body = self.read_body(response)?;
        Ok((status, body))
    }

    /// Reads a response body, refusing anything over the cap.
    fn read_body(&self, response: Response) -> Result<Vec<u8>, TransportError> {
        let max_bytes = self.config.max_response_bytes;
        let max_u64 = u64::try_from(max_bytes).unwrap_or(u64::MAX);
        if response.content_length().is_some_and(|length| length > max_u64) {
            return Err(TransportError::Protocol(format!(
                "response body exceeds {max_bytes} bytes"
            )));
        }
        let limit = max_u64.saturating_add(1);
        let mut bytes = Vec::new();
        response.take(limit).read_to_end(&mut bytes).map_err(|err| {
            if err.kind() == std::io::ErrorKind::TimedOut {
                TransportError::Timeout(err.to_string())
            } else {
                TransportError::Connection(err.to_string())
            }
        })?;
        if bytes.len() > max_bytes {
            return Err(TransportError::Protocol(format!(
                "response body exceeds {max_bytes} bytes"
            )));
        }
        Ok(bytes)
    }
}

impl AuthorityTransport for HttpAuthorityTransport {
    fn submit(&self, request: &SubmitRequest<'_>) -> Result<SubmitReply, TransportError> {
        let url = self.endpoint(request.environment, &["documents"])?;
        let builder = self
            .client
            .post(url)
            .header(IDEMPOTENCY_KEY_HEADER, request.idempotency_key.as_str())
            .header(DOCUMENT_KEY_HEADER, request.document.to_string())
            .header(CUNE_HEADER, request.cune)
            .header(CONTENT_TYPE, "application/xml")
            .body(request.xml_signed.to_string());
        let (status, body) = self.send(builder)?;
        match status.as_u16() {
            200..=202 => Ok(SubmitReply::Received(parse_json(&body)?)),
            409 => {
                let duplicate = serde_json::from_slice::<DuplicateBody>(&body).ok();
                Ok(SubmitReply::Duplicate {
                    track_id: duplicate.and_then(|body| body.track_id),
                })
            }
            _ => Err(classify_status(status, &body)),
        }
    }

    fn query(
        &self,
        environment: Environment,
        target: QueryTarget<'_>,
    ) -> Result<AuthorityResponse, TransportError> {
        let url = match target {
            QueryTarget::Track(track_id) => {
                self.endpoint(environment, &["documents", track_id.as_str()])?
            }
            QueryTarget::Submission(key) => {
                self.endpoint(environment, &["submissions", key.as_str()])?
            }
        };
        let (status, body) = self.send(self.client.get(url))?;
        if status == StatusCode::OK {
            return parse_json(&body);
        }
        Err(classify_status(status, &body))
    }

    fn cancel(
        &self,
        environment: Environment,
        track_id: &TrackId,
        idempotency_key: &IdempotencyKey,
    ) -> Result<CancelAck, TransportError> {
        let url = self.endpoint(environment, &["documents", track_id.as_str(), "cancel"])?;
        let builder = self.client.post(url).header(IDEMPOTENCY_KEY_HEADER, idempotency_key.as_str());
        let (status, body) = self.send(builder)?;
        if status == StatusCode::OK {
            return parse_json(&body);
        }
        Err(classify_status(status, &body))
    }
}

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Maps a send failure onto the transport taxonomy.
fn classify_send_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_builder() {
        TransportError::Config(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}

/// Maps a non-success status onto the transport taxonomy.
fn classify_status(status: StatusCode, body: &[u8]) -> TransportError {
    let code = status.as_u16();
    if code == 408 || code == 429 || status.is_server_error() {
        return TransportError::Unavailable {
            status: code,
            message: excerpt(body),
        };
    }
    if status.is_client_error() {
        let parsed = serde_json::from_slice::<ErrorBody>(body).ok();
        let (error_code, message) = match parsed {
            Some(ErrorBody {
                code,
                message,
            }) => (code, message),
            None => (None, None),
        };
        return TransportError::Validation {
            status: code,
            code: error_code.unwrap_or_else(|| code.to_string()),
            message: message.unwrap_or_else(|| excerpt(body)),
        };
    }
    TransportError::Protocol(format!("unexpected status {code}"))
}

/// Parses a JSON success body.
fn parse_json<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(body)
        .map_err(|err| TransportError::Protocol(format!("invalid response body: {err}")))
}

/// Returns a bounded, lossy text excerpt of a body.
fn excerpt(body: &[u8]) -> String {
    String::from_utf8_lossy(body).chars().take(MAX_EXCERPT_CHARS).collect()
}
