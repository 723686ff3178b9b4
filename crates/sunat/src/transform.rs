//! Tolerant transformation of a retrieved document into the domain invoice
//! shape.
//!
//! The structured tree comes out of an XML-to-JSON pass over a UBL document,
//! so a field may appear as a scalar, as a one-element list, or as a wrapped
//! `{"_": value, attr: ...}` object. Lookup tries an ordered list of paths and
//! unwraps whatever shape it finds; any missing required field makes the whole
//! transformation yield `None`; the worker treats that as a parse failure,
//! equivalent to a retrieval failure.

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use facturo_invoicing::{ElectronicDocument, InvoiceHeader, InvoiceSubmission, LineItem};

use crate::retriever::RetrievedDocument;

/// One extracted invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquiredItem {
    pub description: String,
    pub quantity: BigDecimal,
    pub unit_cost: BigDecimal,
    /// Human-readable unit, already mapped from the wire code.
    pub unit: String,
}

/// Invoice data extracted from a retrieved document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquiredInvoice {
    /// Composite `SERIES-NUMBER` as printed on the document.
    pub reference: String,
    pub series: String,
    pub number: String,
    pub issuer_tax_id: String,
    pub issuer_name: Option<String>,
    pub currency: String,
    pub subtotal: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
    pub issued_on: Option<NaiveDate>,
    pub items: Vec<AcquiredItem>,
}

impl AcquiredInvoice {
    /// Package this extraction (plus the retrieved files) as a store
    /// submission.
    pub fn into_submission(self, retrieved: &RetrievedDocument) -> InvoiceSubmission {
        InvoiceSubmission {
            series: self.series,
            number: self.number,
            supplier_display_name: self.issuer_name,
            header: InvoiceHeader {
                currency: self.currency,
                subtotal: self.subtotal,
                tax_amount: self.tax_amount,
                total: self.total,
                issued_on: self.issued_on,
                supplier_tax_id: self.issuer_tax_id,
            },
            line_items: Some(
                self.items
                    .into_iter()
                    .map(|item| LineItem {
                        description: item.description,
                        quantity: item.quantity,
                        unit_cost: item.unit_cost,
                        unit: item.unit,
                    })
                    .collect(),
            ),
            document: Some(ElectronicDocument {
                xml_bytes: retrieved.files.primary.clone(),
                pdf_bytes: retrieved.files.rendered.clone(),
                acknowledgment_bytes: retrieved.files.acknowledgment.clone(),
                received_at: Utc::now(),
                authority_status: retrieved.authority_status.clone(),
            }),
        }
    }
}

/// Map a unit-of-measure wire code to its human-readable unit; unmapped codes
/// pass through verbatim.
pub fn map_unit(code: &str) -> String {
    match code {
        "NIU" => "UNIDAD",
        "GLL" => "US GALON",
        "KGM" => "KILOGRAMO",
        "LTR" => "LITRO",
        "MTR" => "METRO",
        "ZZ" => "SERVICIO",
        other => other,
    }
    .to_string()
}

/// Extract a domain invoice from the structured document tree.
///
/// Required: the composite id (with a dash), the issuer tax ID, the payable
/// total, and a well-formed line list. Anything else is optional.
pub fn transform(document: &Value) -> Option<AcquiredInvoice> {
    let invoice = document.get("Invoice").unwrap_or(document);

    let reference = get_str(invoice, &["cbc:ID"])?;
    let (series, number) = reference.split_once('-')?;

    let issuer_tax_id = get_str(
        invoice,
        &[
            "cac:AccountingSupplierParty.cac:Party.cac:PartyIdentification.cbc:ID",
            "cac:AccountingSupplierParty.cbc:CustomerAssignedAccountID",
        ],
    )?;

    let issuer_name = get_str(
        invoice,
        &[
            "cac:AccountingSupplierParty.cac:Party.cac:PartyLegalEntity.cbc:RegistrationName",
            "cac:AccountingSupplierParty.cac:Party.cac:PartyName.cbc:Name",
        ],
    );

    let currency =
        get_str(invoice, &["cbc:DocumentCurrencyCode"]).unwrap_or_else(|| "PEN".to_string());

    let total = get_decimal(
        invoice,
        &[
            "cac:LegalMonetaryTotal.cbc:PayableAmount",
            "cac:LegalMonetaryTotal.cbc:TaxInclusiveAmount",
        ],
    )?;
    let subtotal = get_decimal(invoice, &["cac:LegalMonetaryTotal.cbc:LineExtensionAmount"])
        .unwrap_or_else(|| total.clone());
    let tax_amount =
        get_decimal(invoice, &["cac:TaxTotal.cbc:TaxAmount"]).unwrap_or_else(|| BigDecimal::from(0));

    let issued_on = get_str(invoice, &["cbc:IssueDate"])
        .and_then(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok());

    let items = extract_items(invoice)?;

    Some(AcquiredInvoice {
        reference: reference.clone(),
        series: series.to_string(),
        number: number.to_string(),
        issuer_tax_id,
        issuer_name,
        currency,
        subtotal,
        tax_amount,
        total,
        issued_on,
        items,
    })
}

fn extract_items(invoice: &Value) -> Option<Vec<AcquiredItem>> {
    let lines = match invoice.get("cac:InvoiceLine") {
        None | Some(Value::Null) => return Some(Vec::new()),
        Some(Value::Array(lines)) => lines.iter().collect::<Vec<_>>(),
        Some(single) => vec![single],
    };

    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let description = get_str(line, &["cac:Item.cbc:Description"])?;
        let quantity = get_decimal(line, &["cbc:InvoicedQuantity"])?;
        let unit_cost = get_decimal(
            line,
            &["cac:Price.cbc:PriceAmount", "cbc:LineExtensionAmount"],
        )?;
        let unit_code =
            get_str(line, &["cbc:InvoicedQuantity.unitCode"]).unwrap_or_else(|| "NIU".to_string());

        items.push(AcquiredItem {
            description,
            quantity,
            unit_cost,
            unit: map_unit(&unit_code),
        });
    }
    Some(items)
}

/// Unwrap the equivalent scalar shapes: a bare value, the first element of a
/// list, or the `_`/`#text` member of a wrapped value-with-attributes object.
fn unwrap_value(value: &Value) -> &Value {
    match value {
        Value::Array(items) => items.first().map(unwrap_value).unwrap_or(&Value::Null),
        Value::Object(map) => map
            .get("_")
            .or_else(|| map.get("#text"))
            .map(unwrap_value)
            .unwrap_or(value),
        other => other,
    }
}

/// Walk a dotted path, stepping into one-element lists along the way.
fn walk<'a>(mut current: &'a Value, path: &str) -> Option<&'a Value> {
    for part in path.split('.') {
        if let Value::Array(items) = current {
            current = items.first()?;
        }
        current = current.get(part)?;
    }
    Some(current)
}

/// Try each path in priority order; return the first that resolves.
fn get<'a>(root: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths.iter().find_map(|&path| {
        let found = walk(root, path)?;
        let unwrapped = unwrap_value(found);
        if unwrapped.is_null() { None } else { Some(unwrapped) }
    })
}

fn get_str(root: &Value, paths: &[&str]) -> Option<String> {
    match get(root, paths)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn get_decimal(root: &Value, paths: &[&str]) -> Option<BigDecimal> {
    match get(root, paths)? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ubl_document() -> Value {
        json!({
            "Invoice": {
                "cbc:ID": "E001-206",
                "cbc:IssueDate": "2024-03-15",
                "cbc:DocumentCurrencyCode": {"_": "PEN", "listID": "ISO 4217 Alpha"},
                "cac:AccountingSupplierParty": {
                    "cac:Party": {
                        "cac:PartyIdentification": {"cbc:ID": {"_": "10416491033", "schemeID": "6"}},
                        "cac:PartyLegalEntity": {"cbc:RegistrationName": "COMBUSTIBLES DEL SUR EIRL"}
                    }
                },
                "cac:TaxTotal": {"cbc:TaxAmount": {"_": "27.00", "currencyID": "PEN"}},
                "cac:LegalMonetaryTotal": {
                    "cbc:LineExtensionAmount": "150.00",
                    "cbc:PayableAmount": "177.00"
                },
                "cac:InvoiceLine": [
                    {
                        "cbc:InvoicedQuantity": {"_": "2.5", "unitCode": "GLL"},
                        "cac:Item": {"cbc:Description": "GASOHOL 90"},
                        "cac:Price": {"cbc:PriceAmount": "60.00"}
                    },
                    {
                        "cbc:InvoicedQuantity": {"_": "1", "unitCode": "XYZ"},
                        "cac:Item": {"cbc:Description": ["FILTRO DE AIRE"]},
                        "cac:Price": {"cbc:PriceAmount": "27.00"}
                    }
                ]
            }
        })
    }

    #[test]
    fn extracts_a_full_document() {
        let invoice = transform(&ubl_document()).unwrap();

        assert_eq!(invoice.reference, "E001-206");
        assert_eq!(invoice.series, "E001");
        assert_eq!(invoice.number, "206");
        assert_eq!(invoice.issuer_tax_id, "10416491033");
        assert_eq!(invoice.issuer_name.as_deref(), Some("COMBUSTIBLES DEL SUR EIRL"));
        assert_eq!(invoice.currency, "PEN");
        assert_eq!(invoice.subtotal, "150.00".parse::<BigDecimal>().unwrap());
        assert_eq!(invoice.tax_amount, "27.00".parse::<BigDecimal>().unwrap());
        assert_eq!(invoice.total, "177.00".parse::<BigDecimal>().unwrap());
        assert_eq!(invoice.issued_on, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(invoice.items.len(), 2);
    }

    #[test]
    fn maps_known_unit_codes_and_passes_unknown_through() {
        let invoice = transform(&ubl_document()).unwrap();
        assert_eq!(invoice.items[0].unit, "US GALON");
        assert_eq!(invoice.items[1].unit, "XYZ");
    }

    #[test]
    fn single_line_object_is_treated_as_one_element_list() {
        let mut doc = ubl_document();
        doc["Invoice"]["cac:InvoiceLine"] = json!({
            "cbc:InvoicedQuantity": {"_": "1", "unitCode": "NIU"},
            "cac:Item": {"cbc:Description": "UNICO"},
            "cac:Price": {"cbc:PriceAmount": "10.00"}
        });

        let invoice = transform(&doc).unwrap();
        assert_eq!(invoice.items.len(), 1);
        assert_eq!(invoice.items[0].description, "UNICO");
        assert_eq!(invoice.items[0].unit, "UNIDAD");
    }

    #[test]
    fn missing_lines_yield_an_empty_item_list() {
        let mut doc = ubl_document();
        doc["Invoice"]
            .as_object_mut()
            .unwrap()
            .remove("cac:InvoiceLine");

        let invoice = transform(&doc).unwrap();
        assert!(invoice.items.is_empty());
    }

    #[test]
    fn missing_required_fields_fail_the_whole_transformation() {
        let mut no_id = ubl_document();
        no_id["Invoice"].as_object_mut().unwrap().remove("cbc:ID");
        assert!(transform(&no_id).is_none());

        let mut no_supplier = ubl_document();
        no_supplier["Invoice"]
            .as_object_mut()
            .unwrap()
            .remove("cac:AccountingSupplierParty");
        assert!(transform(&no_supplier).is_none());

        let mut no_total = ubl_document();
        no_total["Invoice"]
            .as_object_mut()
            .unwrap()
            .remove("cac:LegalMonetaryTotal");
        assert!(transform(&no_total).is_none());
    }

    #[test]
    fn malformed_line_fails_the_whole_transformation() {
        let mut doc = ubl_document();
        doc["Invoice"]["cac:InvoiceLine"][0]["cbc:InvoicedQuantity"] = json!({"_": "not-a-number"});
        assert!(transform(&doc).is_none());
    }

    #[test]
    fn id_without_dash_is_a_parse_failure() {
        let mut doc = ubl_document();
        doc["Invoice"]["cbc:ID"] = json!("E001206");
        assert!(transform(&doc).is_none());
    }

    #[test]
    fn wrapped_and_listed_scalars_unwrap_identically() {
        let wrapped = json!({"x": {"_": "7"}});
        let listed = json!({"x": ["7"]});
        let bare = json!({"x": "7"});

        for doc in [wrapped, listed, bare] {
            assert_eq!(get_str(&doc, &["x"]).as_deref(), Some("7"));
        }
    }

    #[test]
    fn root_without_invoice_wrapper_is_accepted() {
        let doc = ubl_document();
        let inner = doc["Invoice"].clone();
        assert_eq!(transform(&inner), transform(&doc));
    }
}
