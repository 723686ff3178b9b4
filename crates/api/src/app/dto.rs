//! Request/response DTOs and JSON mapping helpers.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;

use facturo_core::DomainError;
use facturo_invoicing::{Invoice, InvoiceHeader, InvoiceSubmission, LineItem};

/// Monetary amount that external submitters may send as a number or a string
/// (`118.00` or `"118.00"`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Amount(pub BigDecimal);

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AmountVisitor;

        impl serde::de::Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a decimal number or a decimal string")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Amount, E> {
                v.trim()
                    .parse()
                    .map(Amount)
                    .map_err(|_| E::custom(format!("invalid decimal `{v}`")))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Amount, E> {
                BigDecimal::try_from(v)
                    .map(Amount)
                    .map_err(|_| E::custom(format!("invalid decimal {v}")))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Amount, E> {
                Ok(Amount(BigDecimal::from(v)))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Amount, E> {
                Ok(Amount(BigDecimal::from(v)))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// One line in a bulk submission.
#[derive(Debug, Clone, Deserialize)]
pub struct LineItemRequest {
    pub description: String,
    pub quantity: Amount,
    pub unit_cost: Amount,
    #[serde(default)]
    pub unit: Option<String>,
}

/// One invoice in a bulk submission.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceRequest {
    pub supplier_tax_id: String,
    #[serde(default)]
    pub supplier_name: Option<String>,
    pub series: String,
    pub number: String,
    #[serde(default)]
    pub issued_on: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub subtotal: Amount,
    pub tax_amount: Amount,
    pub total: Amount,
    #[serde(default)]
    pub line_items: Option<Vec<LineItemRequest>>,
}

fn default_currency() -> String {
    "PEN".to_string()
}

/// A bulk batch.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub invoices: Vec<InvoiceRequest>,
}

impl InvoiceRequest {
    pub fn into_submission(self) -> Result<InvoiceSubmission, DomainError> {
        let issued_on = match self.issued_on {
            Some(raw) => Some(parse_date(&raw)?),
            None => None,
        };

        Ok(InvoiceSubmission {
            series: self.series,
            number: self.number,
            supplier_display_name: self.supplier_name,
            header: InvoiceHeader {
                currency: self.currency,
                subtotal: self.subtotal.0,
                tax_amount: self.tax_amount.0,
                total: self.total.0,
                issued_on,
                supplier_tax_id: self.supplier_tax_id,
            },
            line_items: self.line_items.map(|items| {
                items
                    .into_iter()
                    .map(|item| LineItem {
                        description: item.description,
                        quantity: item.quantity.0,
                        unit_cost: item.unit_cost.0,
                        unit: item.unit.unwrap_or_else(|| "UNIDAD".to_string()),
                    })
                    .collect()
            }),
            document: None,
        })
    }
}

/// Accept ISO (`2024-03-15`) or day-first (`15/03/2024`) dates.
pub fn parse_date(raw: &str) -> Result<NaiveDate, DomainError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .map_err(|_| DomainError::validation(format!("invalid date `{raw}`")))
}

/// Invoice view for the HTTP boundary. Status formatting is applied here and
/// only here; blobs are summarized, never inlined.
pub fn invoice_to_json(invoice: &Invoice) -> serde_json::Value {
    json!({
        "id": invoice.id.to_string(),
        "reference": invoice.key.reference(),
        "series": invoice.key.series(),
        "number": invoice.key.number(),
        "status": invoice.status.storage_label(),
        "display_status": invoice.status.display_label(),
        "currency": invoice.header.currency,
        "subtotal": invoice.header.subtotal.to_string(),
        "tax_amount": invoice.header.tax_amount.to_string(),
        "total": invoice.header.total.to_string(),
        "issued_on": invoice.header.issued_on,
        "supplier_tax_id": invoice.header.supplier_tax_id,
        "line_items": invoice
            .line_items
            .iter()
            .map(|line| json!({
                "description": line.description,
                "quantity": line.quantity.to_string(),
                "unit_cost": line.unit_cost.to_string(),
                "unit": line.unit,
            }))
            .collect::<Vec<_>>(),
        "document": invoice.document.as_ref().map(|doc| json!({
            "received_at": doc.received_at,
            "authority_status": doc.authority_status,
            "xml_bytes": doc.xml_bytes.len(),
            "has_pdf": doc.pdf_bytes.is_some(),
            "has_acknowledgment": doc.acknowledgment_bytes.is_some(),
        })),
        "created_at": invoice.created_at,
        "updated_at": invoice.updated_at,
    })
}
