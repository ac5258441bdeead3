// crates/epayroll-cli/src/main.rs
// ============================================================================
// Module: Electronic Payroll CLI Entry Point
// Description: Command dispatcher for the payroll document pipeline.
// Purpose: Issue, sweep, inspect, and cancel documents and serve webhooks.
// Dependencies: clap, epayroll-cli, epayroll-config, epayroll-core,
//               epayroll-signer, epayroll-webhook, serde, tokio
// ============================================================================

//! ## Overview
//! The `epayroll` binary drives the pipeline from the command line. Commands
//! that reach the authority build the full service graph; read-only commands
//! (`status`, `cune`) open only the stores so they work without credentials.
//!
//! Security posture: payroll files are untrusted input and are size-capped
//! before parsing. Passwords are only read from environment variables.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use epayroll_cli::PayrollServices;
use epayroll_cli::PayrollStores;
use epayroll_cli::certificate_for;
use epayroll_cli::profile_for;
use epayroll_cli::read_bytes_with_limit;
use epayroll_config::ConfigService;
use epayroll_config::EpayrollConfig;
use epayroll_core::Clock;
use epayroll_core::DocumentKey;
use epayroll_core::DocumentStatus;
use epayroll_core::DocumentStatusView;
use epayroll_core::DocumentStore;
use epayroll_core::OrganizationId;
use epayroll_core::PayrollRecord;
use epayroll_core::RetrySweepOptions;
use epayroll_core::SubmitOptions;
use epayroll_core::runtime::SweepEntry;
use epayroll_core::runtime::SystemClock;
use epayroll_core::runtime::compute_cune;
use epayroll_signer::CertificateRecord;
use epayroll_signer::CredentialBundle;
use epayroll_signer::CredentialParams;
use epayroll_signer::DEFAULT_KDF_ITERATIONS;
use epayroll_signer::verify_signed_document;
use epayroll_webhook::WebhookServer;
use epayroll_webhook::WebhookServerDeps;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a payroll JSON input.
const MAX_PAYROLL_BYTES: usize = 1024 * 1024;
/// Milliseconds per day, for certificate validity windows.
const MILLIS_PER_DAY: u64 = 86_400_000;
/// Exit code when a document ends rejected, failed, or in error.
const EXIT_NOT_ACCEPTED: u8 = 2;
/// Exit code when a CUNE or signature check fails.
const EXIT_VERIFICATION_FAILED: u8 = 3;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "epayroll", version, disable_help_subcommand = true)]
struct Cli {
    /// Config file path (overrides `EPAYROLL_CONFIG`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the authority webhook and reconcile stale gaps.
    Serve,
    /// Build, sign, and submit a document from a payroll JSON file.
    Issue(IssueCommand),
    /// Show the stored status of a document.
    Status(DocumentArgs),
    /// Re-submit documents left in error.
    Retry(RetryCommand),
    /// Query the authority for pending documents.
    Refresh(RefreshCommand),
    /// Cancel an accepted document.
    Cancel(DocumentArgs),
    /// Recompute a document's CUNE and verify its signature.
    Cune(DocumentArgs),
    /// Credential bundle utilities.
    Credential {
        /// Selected credential subcommand.
        #[command(subcommand)]
        command: CredentialCommand,
    },
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Output rendering.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// Canonical JSON.
    Json,
}

/// Arguments naming one document.
#[derive(Args, Debug)]
struct DocumentArgs {
    /// Document key as `organization/prefix/number`.
    #[arg(value_name = "KEY")]
    key: String,
}

/// Arguments for `issue`.
#[derive(Args, Debug)]
struct IssueCommand {
    /// Payroll record JSON file.
    #[arg(value_name = "PAYROLL")]
    payroll: PathBuf,
    /// Stop after signing; do not contact the authority.
    #[arg(long)]
    no_submit: bool,
    /// Overall deadline for submission retries, in milliseconds.
    #[arg(long, value_name = "MS")]
    deadline_ms: Option<u64>,
}

/// Arguments for `retry`.
#[derive(Args, Debug)]
struct RetryCommand {
    /// Organization whose documents are swept.
    #[arg(long, value_name = "ID")]
    organization: String,
    /// Also re-submit documents that exhausted their retries.
    #[arg(long)]
    include_failed: bool,
    /// Also re-submit documents stuck in submitting for this long.
    #[arg(long, value_name = "MS")]
    stale_submitting_ms: Option<u64>,
    /// Per-document deadline for submission retries, in milliseconds.
    #[arg(long, value_name = "MS")]
    deadline_ms: Option<u64>,
}

/// Arguments for `refresh`.
#[derive(Args, Debug)]
struct RefreshCommand {
    /// Refresh every pending document of this organization.
    #[arg(long, value_name = "ID", required_unless_present = "document")]
    organization: Option<String>,
    /// Refresh a single document.
    #[arg(long, value_name = "KEY", conflicts_with = "organization")]
    document: Option<String>,
}

/// Credential subcommands.
#[derive(Subcommand, Debug)]
enum CredentialCommand {
    /// Generate a new password-sealed credential bundle.
    Generate(CredentialGenerateCommand),
    /// Show the certificate inside a bundle.
    Inspect(CredentialInspectCommand),
}

/// Arguments for `credential generate`.
#[derive(Args, Debug)]
struct CredentialGenerateCommand {
    /// Output bundle path.
    #[arg(long, value_name = "PATH")]
    out: PathBuf,
    /// Certificate subject.
    #[arg(long)]
    subject: String,
    /// Certificate issuer.
    #[arg(long, default_value = "epayroll-local")]
    issuer: String,
    /// Certificate serial number.
    #[arg(long)]
    serial: String,
    /// Validity window length in days.
    #[arg(long, default_value_t = 365)]
    valid_days: u64,
    /// Environment variable holding the bundle password.
    #[arg(long, value_name = "VAR")]
    password_env: String,
    /// PBKDF2 iteration count.
    #[arg(long, default_value_t = DEFAULT_KDF_ITERATIONS)]
    iterations: u32,
    /// Overwrite an existing bundle.
    #[arg(long)]
    force: bool,
}

/// Arguments for `credential inspect`.
#[derive(Args, Debug)]
struct CredentialInspectCommand {
    /// Bundle path.
    #[arg(value_name = "PATH")]
    path: PathBuf,
    /// Environment variable holding the password to check.
    #[arg(long, value_name = "VAR")]
    password_env: Option<String>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate the config file.
    Validate,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }

    /// Wraps an error with the action that failed.
    fn context(action: &str, error: impl std::fmt::Display) -> Self {
        Self::new(format!("{action}: {error}"))
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run(cli: Cli) -> CliResult<ExitCode> {
    let config_path = cli.config.as_deref();
    let format = cli.format;
    match cli.command {
        Commands::Serve => command_serve(config_path),
        Commands::Issue(command) => command_issue(config_path, format, &command),
        Commands::Status(args) => command_status(config_path, format, &args),
        Commands::Retry(command) => command_retry(config_path, format, &command),
        Commands::Refresh(command) => command_refresh(config_path, format, &command),
        Commands::Cancel(args) => command_cancel(config_path, format, &args),
        Commands::Cune(args) => command_cune(config_path, format, &args),
        Commands::Credential {
            command,
        } => match command {
            CredentialCommand::Generate(command) => command_credential_generate(format, &command),
            CredentialCommand::Inspect(command) => command_credential_inspect(format, &command),
        },
        Commands::Config {
            command: ConfigCommand::Validate,
        } => command_config_validate(config_path),
    }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command.
fn command_serve(config_path: Option<&Path>) -> CliResult<ExitCode> {
    let service =
        ConfigService::load(config_path).map_err(|err| CliError::context("config load failed", err))?;
    let config = service.current();
    let services = PayrollServices::from_config(&config)
        .map_err(|err| CliError::context("service init failed", err))?;
    let server = WebhookServer::from_config(
        &config,
        WebhookServerDeps {
            documents: services.stores.documents.clone(),
            events: services.stores.events.clone(),
            reconciler: services.pipeline.transmission(),
            clock: services.clock.clone(),
            audit: services.audit.clone(),
        },
    )
    .map_err(|err| CliError::context("webhook init failed", err))?;
    write_stderr_line(&format!("epayroll: webhook listening on {}", server.bind_addr()))
        .map_err(|err| CliError::context("stderr write failed", err))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::context("runtime init failed", err))?;
    let result = runtime.block_on(server.serve(async {
        let _ = tokio::signal::ctrl_c().await;
    }));
    // The blocking HTTP client must be released outside the async runtime.
    drop(runtime);
    drop(services);
    result.map_err(|err| CliError::context("webhook server failed", err))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Document Commands
// ============================================================================

/// Result of `issue`.
#[derive(Debug, Serialize)]
struct IssueOutput {
    /// Document status after the command.
    document: DocumentStatusView,
    /// True when the authority reported an earlier identical submission.
    replayed: bool,
}

/// Executes the `issue` command.
fn command_issue(
    config_path: Option<&Path>,
    format: OutputFormat,
    command: &IssueCommand,
) -> CliResult<ExitCode> {
    let bytes = read_bytes_with_limit(&command.payroll, MAX_PAYROLL_BYTES)
        .map_err(|err| CliError::context(&command.payroll.display().to_string(), err))?;
    let payroll: PayrollRecord = serde_json::from_slice(&bytes)
        .map_err(|err| CliError::context("payroll parse failed", err))?;
    let config = load_config(config_path)?;
    let profile = profile_for(&config, &payroll.organization_id)
        .map_err(|err| CliError::context("profile lookup failed", err))?;
    let services = init_services(&config)?;
    let pipeline = &services.pipeline;

    let output = if command.no_submit {
        let key = pipeline.build(&payroll, &profile).map_err(pipeline_error)?;
        pipeline.serialize(&key).map_err(pipeline_error)?;
        IssueOutput {
            document: pipeline.sign(&key, &profile).map_err(pipeline_error)?,
            replayed: false,
        }
    } else {
        let options = SubmitOptions {
            deadline_ms: command.deadline_ms,
            manual_resubmit: false,
        };
        let outcome = pipeline.process(&payroll, &profile, &options).map_err(pipeline_error)?;
        IssueOutput {
            document: outcome.view,
            replayed: outcome.replayed,
        }
    };
    let code = status_exit_code(output.document.status);
    emit(format, &output, &render_issue(&output))?;
    Ok(code)
}

/// Executes the `status` command.
fn command_status(
    config_path: Option<&Path>,
    format: OutputFormat,
    args: &DocumentArgs,
) -> CliResult<ExitCode> {
    let key = parse_key(&args.key)?;
    let config = load_config(config_path)?;
    let stores = PayrollStores::open(&config).map_err(|err| CliError::context("store open failed", err))?;
    let document = stores
        .documents
        .load(&key)
        .map_err(|err| CliError::context("document load failed", err))?
        .ok_or_else(|| CliError::new(format!("document not found: {key}")))?;
    let view = document.status_view();
    emit(format, &view, &render_view(&view))?;
    Ok(ExitCode::SUCCESS)
}

/// Per-document result of a sweep.
#[derive(Debug, Serialize)]
struct SweepOutput {
    /// Document key.
    document: String,
    /// Status after the sweep, when it succeeded.
    status: Option<DocumentStatusView>,
    /// Failure description.
    error: Option<String>,
}

impl From<SweepEntry> for SweepOutput {
    fn from(entry: SweepEntry) -> Self {
        let (status, error) = match entry.result {
            Ok(view) => (Some(view), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Self {
            document: entry.document.to_string(),
            status,
            error,
        }
    }
}

/// Executes the `retry` command.
fn command_retry(
    config_path: Option<&Path>,
    format: OutputFormat,
    command: &RetryCommand,
) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    let services = init_services(&config)?;
    let options = RetrySweepOptions {
        include_failed: command.include_failed,
        stale_submitting_after_ms: command.stale_submitting_ms,
        deadline_ms: command.deadline_ms,
    };
    let entries = services
        .pipeline
        .retry_pending(&OrganizationId::new(command.organization.as_str()), &options)
        .map_err(pipeline_error)?;
    emit_sweep(format, entries)
}

/// Executes the `refresh` command.
fn command_refresh(
    config_path: Option<&Path>,
    format: OutputFormat,
    command: &RefreshCommand,
) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    let services = init_services(&config)?;
    if let Some(document) = &command.document {
        let key = parse_key(document)?;
        let view = services.pipeline.refresh(&key).map_err(pipeline_error)?;
        emit(format, &view, &render_view(&view))?;
        return Ok(ExitCode::SUCCESS);
    }
    let organization = command
        .organization
        .as_deref()
        .ok_or_else(|| CliError::new("refresh requires --organization or --document".to_string()))?;
    let entries = services
        .pipeline
        .refresh_pending(&OrganizationId::new(organization))
        .map_err(pipeline_error)?;
    emit_sweep(format, entries)
}

/// Renders sweep results.
fn emit_sweep(format: OutputFormat, entries: Vec<SweepEntry>) -> CliResult<ExitCode> {
    let outputs: Vec<SweepOutput> = entries.into_iter().map(SweepOutput::from).collect();
    let failed = outputs.iter().any(|output| output.error.is_some());
    emit(format, &outputs, &render_sweep(&outputs))?;
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// Executes the `cancel` command.
fn command_cancel(
    config_path: Option<&Path>,
    format: OutputFormat,
    args: &DocumentArgs,
) -> CliResult<ExitCode> {
    let key = parse_key(&args.key)?;
    let config = load_config(config_path)?;
    let services = init_services(&config)?;
    let view = services.pipeline.cancel(&key).map_err(pipeline_error)?;
    emit(format, &view, &render_view(&view))?;
    Ok(ExitCode::SUCCESS)
}

/// Result of `cune`.
#[derive(Debug, Serialize)]
struct CuneReport {
    /// Document key.
    document: String,
    /// CUNE stored on the document.
    stored: Option<String>,
    /// CUNE recomputed from the document fields.
    computed: String,
    /// True when both values agree.
    matches: bool,
    /// Signature check result, when the document is signed.
    signature: Option<String>,
}

/// Executes the `cune` command.
fn command_cune(
    config_path: Option<&Path>,
    format: OutputFormat,
    args: &DocumentArgs,
) -> CliResult<ExitCode> {
    let key = parse_key(&args.key)?;
    let config = load_config(config_path)?;
    let profile = profile_for(&config, &key.organization_id)
        .map_err(|err| CliError::context("profile lookup failed", err))?;
    let stores = PayrollStores::open(&config).map_err(|err| CliError::context("store open failed", err))?;
    let document = stores
        .documents
        .load(&key)
        .map_err(|err| CliError::context("document load failed", err))?
        .ok_or_else(|| CliError::new(format!("document not found: {key}")))?;
    if document.canonical_bytes().is_none() {
        return Err(CliError::new(format!("document {key} has not been serialized")));
    }
    let computed = compute_cune(&document, &profile.legal.software_pin)
        .map_err(|err| CliError::context("cune computation failed", err))?;
    let signature = if document.signature().is_some() {
        let certificate = certificate_for(&config, &key.organization_id)
            .map_err(|err| CliError::context("certificate read failed", err))?;
        Some(match verify_signed_document(&document, &certificate) {
            Ok(()) => "valid".to_string(),
            Err(err) => format!("invalid: {err}"),
        })
    } else {
        None
    };
    let stored = document.cune().map(str::to_string);
    let report = CuneReport {
        document: key.to_string(),
        matches: stored.as_deref().is_none_or(|stored| stored == computed),
        stored,
        computed,
        signature,
    };
    let verified = report.matches && report.signature.as_deref().is_none_or(|value| value == "valid");
    emit(format, &report, &render_cune(&report))?;
    Ok(if verified { ExitCode::SUCCESS } else { ExitCode::from(EXIT_VERIFICATION_FAILED) })
}

// ============================================================================
// SECTION: Credential Commands
// ============================================================================

/// Public view of a credential bundle.
#[derive(Debug, Serialize)]
struct CertificateOutput {
    /// Bundle path.
    path: String,
    /// Certificate record.
    certificate: CertificateRecord,
    /// SHA-256 fingerprint of the public key.
    fingerprint: String,
    /// True when the certificate is valid now.
    valid_now: bool,
    /// True when a password was supplied and opened the bundle.
    password_verified: Option<bool>,
}

/// Executes the `credential generate` command.
fn command_credential_generate(
    format: OutputFormat,
    command: &CredentialGenerateCommand,
) -> CliResult<ExitCode> {
    if command.out.exists() && !command.force {
        return Err(CliError::new(format!(
            "{} already exists; pass --force to overwrite",
            command.out.display()
        )));
    }
    let password = read_password(&command.password_env)?;
    let now = SystemClock.now();
    let params = CredentialParams {
        subject: command.subject.clone(),
        issuer: command.issuer.clone(),
        serial: command.serial.clone(),
        not_before: now,
        not_after: now.saturating_add_millis(command.valid_days.saturating_mul(MILLIS_PER_DAY)),
        iterations: command.iterations,
    };
    let bundle = CredentialBundle::generate(params, &password)
        .map_err(|err| CliError::context("credential generation failed", err))?;
    bundle
        .write_to(&command.out)
        .map_err(|err| CliError::context("credential write failed", err))?;
    let output = certificate_output(&command.out, &bundle, Some(true))?;
    emit(format, &output, &render_certificate(&output))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `credential inspect` command.
fn command_credential_inspect(
    format: OutputFormat,
    command: &CredentialInspectCommand,
) -> CliResult<ExitCode> {
    let bundle = CredentialBundle::read_from(&command.path)
        .map_err(|err| CliError::context("credential read failed", err))?;
    let password_verified = match &command.password_env {
        Some(name) => {
            let password = read_password(name)?;
            Some(bundle.open(&password).is_ok())
        }
        None => None,
    };
    let output = certificate_output(&command.path, &bundle, password_verified)?;
    let code = if output.password_verified == Some(false) {
        ExitCode::from(EXIT_VERIFICATION_FAILED)
    } else {
        ExitCode::SUCCESS
    };
    emit(format, &output, &render_certificate(&output))?;
    Ok(code)
}

/// Builds the public view of a bundle.
fn certificate_output(
    path: &Path,
    bundle: &CredentialBundle,
    password_verified: Option<bool>,
) -> CliResult<CertificateOutput> {
    let fingerprint = bundle
        .certificate
        .fingerprint()
        .map_err(|err| CliError::context("fingerprint failed", err))?;
    Ok(CertificateOutput {
        path: path.display().to_string(),
        certificate: bundle.certificate.clone(),
        fingerprint,
        valid_now: bundle.certificate.is_valid_at(SystemClock.now()),
        password_verified,
    })
}

/// Reads a password from the named environment variable.
fn read_password(name: &str) -> CliResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(CliError::new(format!("environment variable {name} is not set"))),
    }
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Executes the `config validate` command.
fn command_config_validate(config_path: Option<&Path>) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    write_stdout_line(&format!(
        "config valid: {} organization(s), store {}",
        config.organizations.len(),
        match config.store {
            epayroll_config::StoreConfig::Memory => "memory",
            epayroll_config::StoreConfig::Sqlite(_) => "sqlite",
        }
    ))
    .map_err(|err| CliError::context("stdout write failed", err))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads and validates configuration.
fn load_config(config_path: Option<&Path>) -> CliResult<EpayrollConfig> {
    EpayrollConfig::load(config_path).map_err(|err| CliError::context("config load failed", err))
}

/// Builds the full service graph.
fn init_services(config: &EpayrollConfig) -> CliResult<PayrollServices> {
    PayrollServices::from_config(config).map_err(|err| CliError::context("service init failed", err))
}

/// Parses a document key argument.
fn parse_key(text: &str) -> CliResult<DocumentKey> {
    text.parse().map_err(|err| CliError::context("invalid document key", err))
}

/// Maps a pipeline failure to a CLI error.
fn pipeline_error(error: epayroll_core::PipelineError) -> CliError {
    CliError::context("pipeline error", error)
}

/// Maps a final document status to an exit code.
fn status_exit_code(status: DocumentStatus) -> ExitCode {
    match status {
        DocumentStatus::Rejected | DocumentStatus::Failed | DocumentStatus::Error => {
            ExitCode::from(EXIT_NOT_ACCEPTED)
        }
        _ => ExitCode::SUCCESS,
    }
}

// ============================================================================
// SECTION: Rendering
// ============================================================================

/// Renders a status view as text lines.
fn render_view(view: &DocumentStatusView) -> String {
    let mut lines = vec![
        format!("document: {}", view.key),
        format!("type: {}", view.document_type.as_str()),
        format!("status: {}", view.status),
        format!("attempts: {}", view.attempt_count),
        format!("revision: {}", view.revision),
    ];
    if let Some(cune) = &view.cune {
        lines.push(format!("cune: {cune}"));
    }
    if let Some(track_id) = &view.track_id {
        lines.push(format!("track_id: {}", track_id.as_str()));
    }
    if let Some(code) = &view.response_code {
        lines.push(format!("response_code: {code}"));
    }
    if let Some(message) = &view.response_message {
        lines.push(format!("response_message: {message}"));
    }
    if let Some(cancellation) = &view.cancellation {
        lines.push(format!("cancellation: {}", cancellation.cancellation_id));
    }
    lines.join("\n")
}

/// Renders `issue` output.
fn render_issue(output: &IssueOutput) -> String {
    let mut text = render_view(&output.document);
    if output.replayed {
        text.push_str("\nreplayed: true");
    }
    text
}

/// Renders sweep results one line per document.
fn render_sweep(outputs: &[SweepOutput]) -> String {
    if outputs.is_empty() {
        return "no documents".to_string();
    }
    outputs
        .iter()
        .map(|output| match (&output.status, &output.error) {
            (Some(view), _) => format!("{} {}", output.document, view.status),
            (None, Some(error)) => format!("{} error: {error}", output.document),
            (None, None) => output.document.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders a CUNE report.
fn render_cune(report: &CuneReport) -> String {
    let mut lines = vec![
        format!("document: {}", report.document),
        format!("computed: {}", report.computed),
        format!("stored: {}", report.stored.as_deref().unwrap_or("-")),
        format!("matches: {}", report.matches),
    ];
    if let Some(signature) = &report.signature {
        lines.push(format!("signature: {signature}"));
    }
    lines.join("\n")
}

/// Renders a certificate view.
fn render_certificate(output: &CertificateOutput) -> String {
    let certificate = &output.certificate;
    let mut lines = vec![
        format!("bundle: {}", output.path),
        format!("subject: {}", certificate.subject),
        format!("issuer: {}", certificate.issuer),
        format!("serial: {}", certificate.serial),
        format!(
            "validity: {} .. {}",
            certificate.not_before.as_unix_millis(),
            certificate.not_after.as_unix_millis()
        ),
        format!("valid_now: {}", output.valid_now),
        format!("fingerprint: {}", output.fingerprint),
    ];
    if let Some(verified) = output.password_verified {
        lines.push(format!("password_verified: {verified}"));
    }
    lines.join("\n")
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Writes a value as canonical JSON or as the supplied text.
fn emit<T: Serialize>(format: OutputFormat, value: &T, text: &str) -> CliResult<()> {
    let result = match format {
        OutputFormat::Json => {
            let bytes = serde_jcs::to_vec(value)
                .map_err(|err| CliError::context("json rendering failed", err))?;
            let text = String::from_utf8(bytes)
                .map_err(|err| CliError::context("json rendering failed", err))?;
            write_stdout_line(&text)
        }
        OutputFormat::Text => write_stdout_line(text),
    };
    result.map_err(|err| CliError::context("stdout write failed", err))
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(&format!("epayroll: {message}"));
    ExitCode::FAILURE
}
