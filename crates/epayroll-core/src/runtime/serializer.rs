// crates/epayroll-core/src/runtime/serializer.rs
// ============================================================================
// Module: Canonical XML Serializer
// Description: Deterministic XML rendering of payroll documents.
// Purpose: Produce the exact bytes that are hashed, signed, and transmitted.
// Dependencies: quick-xml, crate::core
// ============================================================================

//! ## Overview
//! The serializer walks the document in a fixed element order and writes
//! compact UTF-8 XML with escaped text and attributes. Rendering is a pure
//! function of document content, so re-rendering a stored document yields the
//! same bytes. The signed rendering adds an `Authentication` block as the last
//! child of the root and is otherwise identical.

// ============================================================================
// SECTION: Imports
// ============================================================================

use quick_xml::Writer;
use quick_xml::events::BytesDecl;
use quick_xml::events::BytesEnd;
use quick_xml::events::BytesStart;
use quick_xml::events::BytesText;
use quick_xml::events::Event;
use thiserror::Error;

use crate::core::DocumentError;
use crate::core::DocumentStatus;
use crate::core::ElectronicPayrollDocument;
use crate::core::InvalidTransition;
use crate::core::SignatureBlock;
use crate::core::TimeError;
use crate::core::Timestamp;
use crate::core::time::issue_moment;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Serialization errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializeError {
    /// XML writer failed.
    #[error("xml rendering failed: {0}")]
    Xml(String),
    /// Issue date or time could not be rendered.
    #[error(transparent)]
    Time(#[from] TimeError),
    /// Stored canonical bytes differ from a fresh rendering.
    #[error("canonical rendering drifted for {0}")]
    CanonicalDrift(String),
    /// Document has not been serialized yet.
    #[error("document {0} has no canonical bytes")]
    MissingCanonical(String),
    /// Document mutation was rejected.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// Lifecycle transition was rejected.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

// ============================================================================
// SECTION: Public API
// ============================================================================

/// Renders the canonical (unsigned) XML of a document.
///
/// # Errors
///
/// Returns [`SerializeError`] when rendering fails.
pub fn render_canonical(document: &ElectronicPayrollDocument) -> Result<String, SerializeError> {
    render(document, None)
}

/// Renders the signed XML of a document.
///
/// # Errors
///
/// Returns [`SerializeError`] when rendering fails.
pub fn render_signed(
    document: &ElectronicPayrollDocument,
    cune: &str,
    signature: &SignatureBlock,
) -> Result<String, SerializeError> {
    render(document, Some((cune, signature)))
}

/// Serializes a document and records its canonical bytes.
///
/// A `Draft` document is rendered, its canonical bytes are recorded, and it
/// moves to `Generated`. A document that already has canonical bytes is
/// re-rendered and compared; the stored bytes are returned unchanged.
///
/// # Errors
///
/// Returns [`SerializeError`] when rendering fails or the stored bytes drifted.
pub fn serialize_document(
    document: &mut ElectronicPayrollDocument,
    at: Timestamp,
) -> Result<Vec<u8>, SerializeError> {
    let rendered = render_canonical(document)?;
    if document.status() == DocumentStatus::Draft {
        document.record_canonical(rendered.clone())?;
        document.transition(DocumentStatus::Generated, at, "serialized")?;
        return Ok(rendered.into_bytes());
    }
    let Some(stored) = document.xml_unsigned() else {
        return Err(SerializeError::MissingCanonical(document.key.to_string()));
    };
    if stored != rendered {
        return Err(SerializeError::CanonicalDrift(document.key.to_string()));
    }
    Ok(rendered.into_bytes())
}

// ============================================================================
// SECTION: Rendering
// ============================================================================

/// XML writer over an in-memory buffer.
type XmlWriter = Writer<Vec<u8>>;

/// Renders the document with an optional authentication block.
fn render(
    document: &ElectronicPayrollDocument,
    seal: Option<(&str, &SignatureBlock)>,
) -> Result<String, SerializeError> {
    let moment = issue_moment(document.issued_at, document.utc_offset_minutes)?;
    let mut writer = Writer::new(Vec::new());
    write(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("PayrollDocument");
    root.push_attribute(("schemaVersion", document.schema_version.as_str()));
    root.push_attribute(("documentType", document.document_type.as_str()));
    write(&mut writer, Event::Start(root))?;

    open(&mut writer, "Header")?;
    text(&mut writer, "Organization", document.key.organization_id.as_str())?;
    text(&mut writer, "Prefix", document.key.prefix.as_str())?;
    text(&mut writer, "Number", &document.key.sequence_number.to_string())?;
    text(&mut writer, "Consecutive", &document.key.consecutive())?;
    text(&mut writer, "IssueDate", &moment.date)?;
    text(&mut writer, "IssueTime", &moment.time)?;
    text(&mut writer, "Environment", document.environment.code())?;
    text(&mut writer, "SoftwareId", &document.employer.software_id)?;
    close(&mut writer, "Header")?;

    open(&mut writer, "Employer")?;
    text(&mut writer, "TaxId", &document.employer.tax_id)?;
    text(&mut writer, "LegalName", &document.employer.legal_name)?;
    close(&mut writer, "Employer")?;

    open(&mut writer, "Employee")?;
    text(&mut writer, "Reference", document.employee.reference.as_str())?;
    text(&mut writer, "DocumentType", &document.employee.document_type)?;
    text(&mut writer, "DocumentNumber", &document.employee.document_number)?;
    text(&mut writer, "FullName", &document.employee.full_name)?;
    close(&mut writer, "Employee")?;

    open(&mut writer, "Period")?;
    text(&mut writer, "Reference", &document.period.reference)?;
    text(&mut writer, "StartDate", &document.period.start_date)?;
    text(&mut writer, "EndDate", &document.period.end_date)?;
    close(&mut writer, "Period")?;

    if let Some(adjustment) = &document.adjustment {
        open(&mut writer, "AdjustmentReference")?;
        text(&mut writer, "OriginalConsecutive", &adjustment.original_consecutive)?;
        text(&mut writer, "OriginalCune", &adjustment.original_cune)?;
        text(&mut writer, "OriginalIssueDate", &adjustment.original_issue_date)?;
        close(&mut writer, "AdjustmentReference")?;
    }

    open(&mut writer, "Earnings")?;
    for earning in &document.earnings {
        let mut element = BytesStart::new("Earning");
        element.push_attribute(("type", earning.kind.as_str()));
        element.push_attribute(("concept", earning.concept.as_str()));
        element.push_attribute(("salarial", if earning.salarial { "true" } else { "false" }));
        write(&mut writer, Event::Start(element))?;
        text(&mut writer, "Amount", &earning.amount.canonical())?;
        close(&mut writer, "Earning")?;
    }
    close(&mut writer, "Earnings")?;

    open(&mut writer, "Deductions")?;
    for deduction in &document.deductions {
        let mut element = BytesStart::new("Deduction");
        element.push_attribute(("type", deduction.kind.as_str()));
        element.push_attribute(("concept", deduction.concept.as_str()));
        write(&mut writer, Event::Start(element))?;
        if let Some(percentage) = &deduction.percentage {
            text(&mut writer, "Percentage", &percentage.canonical())?;
        }
        text(&mut writer, "Amount", &deduction.amount.canonical())?;
        close(&mut writer, "Deduction")?;
    }
    close(&mut writer, "Deductions")?;

    if let Some(adjustment) = &document.adjustment {
        open(&mut writer, "AdjustmentLines")?;
        for line in &adjustment.lines {
            let index = line.index.to_string();
            let mut element = BytesStart::new("AdjustmentLine");
            element.push_attribute(("section", line.section.as_str()));
            element.push_attribute(("index", index.as_str()));
            write(&mut writer, Event::Start(element))?;
            text(&mut writer, "CorrectedAmount", &line.corrected_amount.canonical())?;
            if let Some(percentage) = &line.corrected_percentage {
                text(&mut writer, "CorrectedPercentage", &percentage.canonical())?;
            }
            close(&mut writer, "AdjustmentLine")?;
        }
        close(&mut writer, "AdjustmentLines")?;
    }

    open(&mut writer, "Totals")?;
    text(&mut writer, "Gross", &document.totals.gross.canonical())?;
    text(&mut writer, "Deductions", &document.totals.deductions.canonical())?;
    text(&mut writer, "Net", &document.totals.net.canonical())?;
    close(&mut writer, "Totals")?;

    if let Some((cune, signature)) = seal {
        write_authentication(&mut writer, cune, signature)?;
    }

    close(&mut writer, "PayrollDocument")?;
    String::from_utf8(writer.into_inner()).map_err(|err| SerializeError::Xml(err.to_string()))
}

/// Writes the authentication block carrying the CUNE and signature.
fn write_authentication(
    writer: &mut XmlWriter,
    cune: &str,
    signature: &SignatureBlock,
) -> Result<(), SerializeError> {
    open(writer, "Authentication")?;
    text(writer, "Cune", cune)?;
    let mut element = BytesStart::new("Signature");
    element.push_attribute(("algorithm", signature.algorithm.as_str()));
    write(writer, Event::Start(element))?;
    text(writer, "DigestAlgorithm", &signature.digest_algorithm)?;
    text(writer, "DigestValue", &signature.digest_value)?;
    text(writer, "SignedInfo", &signature.signed_info)?;
    text(writer, "SignatureValue", &signature.signature_value)?;
    text(writer, "CertificateSerial", &signature.certificate_serial)?;
    text(writer, "CertificateFingerprint", &signature.certificate_fingerprint)?;
    text(writer, "SigningTime", &signature.signing_time.as_unix_millis().to_string())?;
    close(writer, "Signature")?;
    close(writer, "Authentication")
}

/// Writes one event.
fn write(writer: &mut XmlWriter, event: Event<'_>) -> Result<(), SerializeError> {
    writer.write_event(event).map_err(|err| SerializeError::Xml(err.to_string()))
}

/// Opens an element without attributes.
fn open(writer: &mut XmlWriter, name: &str) -> Result<(), SerializeError> {
    write(writer, Event::Start(BytesStart::new(name)))
}

/// Closes an element.
fn close(writer: &mut XmlWriter, name: &str) -> Result<(), SerializeError> {
    write(writer, Event::End(BytesEnd::new(name)))
}

/// Writes `<name>value</name>` with escaped text.
fn text(writer: &mut XmlWriter, name: &str, value: &str) -> Result<(), SerializeError> {
    open(writer, name)?;
    write(writer, Event::Text(BytesText::new(value)))?;
    close(writer, name)
}
