// crates/epayroll-core/tests/common/mod.rs
// ============================================================================
// Module: Pipeline Test Fixtures
// Description: Shared payroll fixtures, fake signer, and scripted authority.
// ============================================================================
//! ## Overview
//! Fixtures wire a full in-memory pipeline around a manual clock so tests can
//! drive documents end to end without network or wall-clock dependencies.

#![allow(dead_code, reason = "Each test binary uses a subset of the fixtures.")]
#![allow(clippy::unwrap_used, reason = "Test fixtures use unwraps for clarity.")]

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use epayroll_core::Amount;
use epayroll_core::AuthorityResponse;
use epayroll_core::AuthorityTransport;
use epayroll_core::CancelAck;
use epayroll_core::ConfigurationProfile;
use epayroll_core::CredentialRef;
use epayroll_core::DeductionLine;
use epayroll_core::DocumentKey;
use epayroll_core::DocumentSigner;
use epayroll_core::DocumentStore;
use epayroll_core::EarningLine;
use epayroll_core::EmployeeInfo;
use epayroll_core::EmployeeRef;
use epayroll_core::Environment;
use epayroll_core::IdempotencyKey;
use epayroll_core::LegalIdentity;
use epayroll_core::NumberingRange;
use epayroll_core::NumberingStore;
use epayroll_core::PayrollPeriod;
use epayroll_core::PayrollPipeline;
use epayroll_core::PayrollPipelineParams;
use epayroll_core::PayrollRecord;
use epayroll_core::PayrollTotals;
use epayroll_core::QueryTarget;
use epayroll_core::RemoteStatus;
use epayroll_core::RetryPolicy;
use epayroll_core::SignError;
use epayroll_core::SignRequest;
use epayroll_core::SignatureBlock;
use epayroll_core::SubmitReply;
use epayroll_core::SubmitRequest;
use epayroll_core::Timestamp;
use epayroll_core::TrackId;
use epayroll_core::TransportError;
use epayroll_core::hash_bytes;
use epayroll_core::runtime::InMemoryDocumentStore;
use epayroll_core::runtime::InMemoryNumberingStore;
use epayroll_core::runtime::InMemoryWebhookEventStore;
use epayroll_core::runtime::ManualClock;
use epayroll_core::runtime::ManualSleeper;
use epayroll_core::runtime::MemoryAuditSink;
use epayroll_core::runtime::SharedDocumentStore;
use epayroll_core::runtime::SharedNumberingStore;
use epayroll_core::runtime::SharedWebhookEventStore;

/// 2024-01-31T03:30:00Z.
pub const START_MS: i64 = 1_706_671_800_000;

pub fn profile() -> ConfigurationProfile {
    ConfigurationProfile {
        organization_id: "acme".into(),
        prefix: "NE".into(),
        legal: LegalIdentity {
            employer_tax_id: "900123456".to_string(),
            employer_name: "Acme Payroll S.A.S.".to_string(),
            software_id: "sw-001".to_string(),
            software_pin: "75315".to_string(),
        },
        credential: CredentialRef::new("acme-signing"),
        environment: Environment::Sandbox,
        utc_offset_minutes: -300,
        schema_version: "1.0".to_string(),
    }
}

pub fn amount(text: &str) -> Amount {
    Amount::parse(text).unwrap()
}

/// Payroll with gross 2,140,606 and deductions 160,000.
pub fn payroll() -> PayrollRecord {
    PayrollRecord {
        organization_id: "acme".into(),
        payroll_id: "run-2024-01".to_string(),
        employee: EmployeeInfo {
            reference: EmployeeRef::new("emp-7"),
            document_type: "CC".to_string(),
            document_number: "1020304050".to_string(),
            full_name: "Ana María Gómez & Hijos <Ltda>".to_string(),
        },
        period: PayrollPeriod {
            reference: "2024-01".to_string(),
            start_date: "2024-01-01".to_string(),
            end_date: "2024-01-31".to_string(),
        },
        earnings: vec![
            EarningLine {
                kind: "basic".to_string(),
                concept: "Salary".to_string(),
                amount: amount("2000000"),
                salarial: true,
            },
            EarningLine {
                kind: "transport".to_string(),
                concept: "Transport aid".to_string(),
                amount: amount("140606"),
                salarial: false,
            },
        ],
        deductions: vec![
            DeductionLine {
                kind: "health".to_string(),
                concept: "Health".to_string(),
                percentage: Some(amount("4")),
                amount: amount("80000"),
            },
            DeductionLine {
                kind: "pension".to_string(),
                concept: "Pension".to_string(),
                percentage: Some(amount("4")),
                amount: amount("80000"),
            },
        ],
        totals: PayrollTotals {
            gross: amount("2140606"),
            deductions: amount("160000"),
            net: amount("1980606"),
        },
    }
}

// ============================================================================
// SECTION: Fake Signer
// ============================================================================

/// Deterministic signer that can be told to reject its credential.
#[derive(Default)]
pub struct FakeSigner {
    pub invalid: AtomicBool,
}

impl DocumentSigner for FakeSigner {
    fn sign(&self, request: &SignRequest<'_>) -> Result<SignatureBlock, SignError> {
        if self.invalid.load(Ordering::SeqCst) {
            return Err(SignError::InvalidCredential("wrong password".to_string()));
        }
        let digest = hash_bytes(epayroll_core::HashAlgorithm::Sha256, request.canonical_bytes);
        Ok(SignatureBlock {
            algorithm: "ed25519".to_string(),
            digest_algorithm: "sha256".to_string(),
            digest_value: digest.value.clone(),
            signed_info: format!("{{\"digest\":\"{}\"}}", digest.value),
            signature_value: format!("sig-{}", request.credential),
            certificate_serial: "01".to_string(),
            certificate_fingerprint: "ff".to_string(),
            signing_time: request.signing_time,
        })
    }
}

// ============================================================================
// SECTION: Scripted Authority
// ============================================================================

/// Authority double that de-duplicates by idempotency key.
#[derive(Default)]
pub struct ScriptedAuthority {
    /// Failures or answers returned by upcoming submissions, in order.
    pub submit_script: Mutex<VecDeque<Result<RemoteStatus, TransportError>>>,
    /// Answers returned by upcoming queries, in order.
    pub query_script: Mutex<VecDeque<Result<AuthorityResponse, TransportError>>>,
    /// Cancel answers, in order.
    pub cancel_script: Mutex<VecDeque<Result<CancelAck, TransportError>>>,
    /// Remote records keyed by idempotency key.
    pub records: Mutex<HashMap<String, AuthorityResponse>>,
    /// Submissions received, including rejected attempts.
    pub submissions: Mutex<Vec<String>>,
    /// Queries received.
    pub queries: Mutex<u32>,
    /// Records the next submission but reports a timeout to the caller.
    pub lose_next_response: AtomicBool,
    /// Runs once while the next submission is in flight.
    pub during_next_submit: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ScriptedAuthority {
    pub fn push_submit(&self, outcome: Result<RemoteStatus, TransportError>) {
        self.submit_script.lock().unwrap().push_back(outcome);
    }

    pub fn push_query(&self, outcome: Result<AuthorityResponse, TransportError>) {
        self.query_script.lock().unwrap().push_back(outcome);
    }

    pub fn while_submitting(&self, action: impl FnOnce() + Send + 'static) {
        *self.during_next_submit.lock().unwrap() = Some(Box::new(action));
    }

    pub fn push_cancel(&self, outcome: Result<CancelAck, TransportError>) {
        self.cancel_script.lock().unwrap().push_back(outcome);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn query_count(&self) -> u32 {
        *self.queries.lock().unwrap()
    }
}

impl AuthorityTransport for ScriptedAuthority {
    fn submit(&self, request: &SubmitRequest<'_>) -> Result<SubmitReply, TransportError> {
        self.submissions.lock().unwrap().push(request.idempotency_key.to_string());
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records.get(request.idempotency_key.as_str()) {
            return Ok(SubmitReply::Duplicate {
                track_id: existing.track_id.clone(),
            });
        }
        let status =
            self.submit_script.lock().unwrap().pop_front().unwrap_or(Ok(RemoteStatus::Accepted))?;
        let response = AuthorityResponse {
            track_id: Some(TrackId::new(format!("T{}", records.len() + 1))),
            status,
            code: Some("00".to_string()),
            message: Some("processed".to_string()),
        };
        records.insert(request.idempotency_key.to_string(), response.clone());
        drop(records);
        if let Some(action) = self.during_next_submit.lock().unwrap().take() {
            action();
        }
        if self.lose_next_response.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Timeout("response lost".to_string()));
        }
        Ok(SubmitReply::Received(response))
    }

    fn query(
        &self,
        _environment: Environment,
        target: QueryTarget<'_>,
    ) -> Result<AuthorityResponse, TransportError> {
        *self.queries.lock().unwrap() += 1;
        if let Some(scripted) = self.query_script.lock().unwrap().pop_front() {
            return scripted;
        }
        let records = self.records.lock().unwrap();
        let found = match target {
            QueryTarget::Submission(key) => records.get(key.as_str()).cloned(),
            QueryTarget::Track(track) => {
                records.values().find(|record| record.track_id.as_ref() == Some(track)).cloned()
            }
        };
        found.ok_or_else(|| TransportError::Validation {
            status: 404,
            code: "404".to_string(),
            message: "unknown submission".to_string(),
        })
    }

    fn cancel(
        &self,
        _environment: Environment,
        track_id: &TrackId,
        _idempotency_key: &IdempotencyKey,
    ) -> Result<CancelAck, TransportError> {
        self.cancel_script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(CancelAck {
                cancellation_id: format!("C-{track_id}"),
                code: Some("00".to_string()),
                message: Some("cancelled".to_string()),
            })
        })
    }
}

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Fully wired in-memory pipeline.
pub struct Harness {
    pub pipeline: PayrollPipeline,
    pub clock: ManualClock,
    pub sleeper: ManualSleeper,
    pub audit: Arc<MemoryAuditSink>,
    pub documents: SharedDocumentStore,
    pub numbering: SharedNumberingStore,
    pub events: SharedWebhookEventStore,
    pub authority: Arc<ScriptedAuthority>,
    pub signer: Arc<FakeSigner>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        let clock = ManualClock::new(Timestamp::from_unix_millis(START_MS));
        let sleeper = ManualSleeper::new(clock.clone());
        let audit = Arc::new(MemoryAuditSink::new());
        let documents = SharedDocumentStore::from_store(InMemoryDocumentStore::new());
        let numbering = SharedNumberingStore::from_store(InMemoryNumberingStore::new());
        let events = SharedWebhookEventStore::from_store(InMemoryWebhookEventStore::new());
        let authority = Arc::new(ScriptedAuthority::default());
        let signer = Arc::new(FakeSigner::default());
        let profile = profile();
        numbering
            .register_range(
                &profile.organization_id,
                &profile.prefix,
                NumberingRange {
                    start: 1,
                    end: 1000,
                },
            )
            .unwrap();
        let pipeline = PayrollPipeline::new(PayrollPipelineParams {
            documents: documents.clone(),
            numbering: numbering.clone(),
            signer: signer.clone(),
            transport: authority.clone(),
            clock: Arc::new(clock.clone()),
            sleeper: Arc::new(sleeper.clone()),
            audit: audit.clone(),
            retry: policy,
        });
        Self {
            pipeline,
            clock,
            sleeper,
            audit,
            documents,
            numbering,
            events,
            authority,
            signer,
        }
    }

    /// Builds, serializes, and signs a document.
    pub fn signed_document(&self) -> DocumentKey {
        let profile = profile();
        let key = self.pipeline.build(&payroll(), &profile).unwrap();
        self.pipeline.serialize(&key).unwrap();
        self.pipeline.sign(&key, &profile).unwrap();
        key
    }

    pub fn load(&self, key: &DocumentKey) -> epayroll_core::ElectronicPayrollDocument {
        self.documents.load(key).unwrap().unwrap()
    }
}
