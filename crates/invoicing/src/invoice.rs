//! Invoice, line item and electronic-document shapes.
//!
//! These are plain data carriers: the state machine lives in [`crate::status`],
//! the merge discipline in the store. Monetary amounts use `BigDecimal` end to
//! end; totals arrive as decimal strings from OCR and retrieved documents and
//! must survive round-tripping without float drift.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use facturo_core::InvoiceId;

use crate::key::InvoiceKey;
use crate::status::InvoiceStatus;

/// Which entry path produced a submission.
///
/// Bulk submission and acquisition share registration semantics: re-submitting
/// an existing invoice through either confirms registration intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOrigin {
    Ocr,
    Bulk,
    Acquisition,
}

impl SubmissionOrigin {
    pub fn confirms_registration(self) -> bool {
        matches!(self, SubmissionOrigin::Bulk | SubmissionOrigin::Acquisition)
    }
}

/// One invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: BigDecimal,
    pub unit_cost: BigDecimal,
    /// Human-readable unit of measure (already mapped from the wire code).
    pub unit: String,
}

/// Header fields shared by every entry path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceHeader {
    pub currency: String,
    pub subtotal: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
    pub issued_on: Option<NaiveDate>,
    /// Tax ID of the issuing supplier.
    pub supplier_tax_id: String,
}

/// The official electronic document retrieved from the tax portal.
///
/// The primary (XML) file is always present once a document is attached; the
/// rendered PDF and the authority acknowledgment are whatever the portal
/// exposed for that document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectronicDocument {
    pub xml_bytes: Vec<u8>,
    pub pdf_bytes: Option<Vec<u8>>,
    pub acknowledgment_bytes: Option<Vec<u8>>,
    pub received_at: DateTime<Utc>,
    /// Authority-side status string, verbatim.
    pub authority_status: Option<String>,
}

/// A stored invoice: at most one per normalized [`InvoiceKey`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub key: InvoiceKey,
    pub status: InvoiceStatus,
    pub header: InvoiceHeader,
    pub line_items: Vec<LineItem>,
    pub document: Option<ElectronicDocument>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to the store's upsert: raw identity plus everything the producer had.
///
/// `series`/`number` are carried raw; the store validates them and derives the
/// normalized key itself, so no producer can skip normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSubmission {
    pub series: String,
    pub number: String,
    pub supplier_display_name: Option<String>,
    pub header: InvoiceHeader,
    /// `None` = leave existing line items untouched; `Some` = wholesale replace.
    pub line_items: Option<Vec<LineItem>>,
    pub document: Option<ElectronicDocument>,
}
