//! Best-effort invoice field extraction from recognized text.
//!
//! Receipts photographed at an angle produce messy text; these patterns are
//! deliberately loose and the result carries no structural guarantee; every
//! field is optional.

use std::sync::OnceLock;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Fields recognized on a receipt, all best-effort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrFields {
    /// 11-digit supplier tax ID.
    pub tax_id: Option<String>,
    /// Series-correlative document number, whitespace squeezed out.
    pub number: Option<String>,
    pub issued_on: Option<NaiveDate>,
    /// The last money-looking amount on the page; receipts print the grand
    /// total at the bottom.
    pub amount: Option<BigDecimal>,
}

fn tax_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{11}").unwrap())
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Prefix must start with a letter or the pattern eats into the tax ID.
    RE.get_or_init(|| Regex::new(r"(?i)[A-Z][A-Z0-9]{0,3}[-\s]?\d{1,6}").unwrap())
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4}-\d{2}-\d{2})|(\d{2}[/\-]\d{2}[/\-]\d{4})").unwrap())
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{1,3}(?:[.,]\d{3})*[.,]\d{2}").unwrap())
}

/// Extract invoice fields from recognized text. Pure.
pub fn extract_fields(text: &str) -> OcrFields {
    let tax_id = tax_id_re().find(text).map(|m| m.as_str().to_string());

    let number = number_re().find(text).map(|m| {
        m.as_str()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
    });

    let issued_on = date_re().find(text).and_then(|m| parse_date(m.as_str()));

    let amount = amount_re()
        .find_iter(text)
        .last()
        .and_then(|m| parse_amount(m.as_str()));

    OcrFields {
        tax_id,
        number,
        issued_on,
        amount,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    // Day-first with either separator.
    NaiveDate::parse_from_str(raw, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d-%m-%Y"))
        .ok()
}

/// Normalize a grouped amount (`1.234,56` style): grouping dots dropped,
/// decimal comma becomes a point.
fn parse_amount(raw: &str) -> Option<BigDecimal> {
    let normalized = raw.replace('.', "").replace(',', ".");
    normalized.parse().ok()
}
