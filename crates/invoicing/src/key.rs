//! Canonical invoice identity.
//!
//! Every producer (OCR, bulk submission, acquisition worker) must go through
//! [`InvoiceKey::normalize`] before touching the store. The key is the sole
//! uniqueness constraint for invoices, so any divergence in normalization shows
//! up as duplicate rows; there is deliberately no other way to construct one.

use core::fmt;

use serde::{Deserialize, Serialize};

use facturo_core::{DomainError, DomainResult};

/// Minimum width of the correlative part. Shorter numbers are zero-padded up to
/// this; longer numbers keep all their significant digits.
const NUMBER_PAD_WIDTH: usize = 8;

/// Minimum width of the numeric tail of a series (`F001`, `E001`, ...).
const SERIES_PAD_WIDTH: usize = 3;

/// Normalized `(series, number)` identity of an invoice.
///
/// Construction is restricted to [`InvoiceKey::normalize`] and
/// [`InvoiceKey::from_reference`] so a raw, un-normalized pair can never be
/// used for a store lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvoiceKey {
    series: String,
    number: String,
}

impl InvoiceKey {
    /// Canonicalize a raw `(series, number)` pair.
    ///
    /// Series: trimmed, uppercased, and its trailing digit run re-padded so
    /// `f1` and `F001` agree. Number: every non-digit dropped, leading zeros
    /// dropped, then left-padded to [`NUMBER_PAD_WIDTH`]; padding is a floor,
    /// not a fixed width, so numbers with more significant digits survive
    /// untruncated.
    pub fn normalize(raw_series: &str, raw_number: &str) -> Self {
        Self {
            series: normalize_series(raw_series),
            number: normalize_number(raw_number),
        }
    }

    /// Parse a composite `SERIES-NUMBER` reference (as found in URLs and in
    /// retrieved documents) and normalize it.
    pub fn from_reference(reference: &str) -> DomainResult<Self> {
        let (series, number) = reference
            .split_once('-')
            .ok_or_else(|| DomainError::invalid_id(format!("invoice reference `{reference}`")))?;
        Ok(Self::normalize(series, number))
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    /// Composite identity string, `series + "-" + number`.
    pub fn reference(&self) -> String {
        format!("{}-{}", self.series, self.number)
    }
}

impl fmt::Display for InvoiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.series, self.number)
    }
}

fn normalize_series(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();

    // Split off the trailing digit run, if any, and re-pad it so that series
    // spellings differing only in leading zeros collapse (`F1` == `F001`).
    let tail_start = upper
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + upper[i..].chars().next().map_or(1, char::len_utf8))
        .unwrap_or(0);

    let (head, tail) = upper.split_at(tail_start);
    if tail.is_empty() {
        return upper;
    }

    let significant = tail.trim_start_matches('0');
    let digits = if significant.is_empty() { "0" } else { significant };
    let width = SERIES_PAD_WIDTH;
    format!("{head}{digits:0>width$}")
}

fn normalize_number(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let significant = digits.trim_start_matches('0');
    let cleaned = if significant.is_empty() { "0" } else { significant };
    let width = NUMBER_PAD_WIDTH;
    format!("{cleaned:0>width$}")
}
