//! Suppliers, keyed by tax ID.
//!
//! Suppliers are created or refreshed whenever an invoice references them and
//! are never deleted by the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use facturo_core::{DomainError, DomainResult};

/// Display name used when a supplier is first seen through a path that cannot
/// produce one (a photographed receipt rarely carries a clean legal name).
pub const FALLBACK_DISPLAY_NAME: &str = "Unidentified supplier";

/// Tax ID of a supplier; the directory key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierTaxId(String);

impl SupplierTaxId {
    /// Accepts any non-empty, trimmed identifier. Shape checks beyond that are
    /// left to the entry paths (OCR already requires an 11-digit match).
    pub fn new(raw: impl Into<String>) -> DomainResult<Self> {
        let value = raw.into().trim().to_string();
        if value.is_empty() {
            return Err(DomainError::validation("supplier tax ID must not be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for SupplierTaxId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A supplier directory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    pub tax_id: SupplierTaxId,
    pub display_name: String,
    pub updated_at: DateTime<Utc>,
}

impl Supplier {
    pub fn new(tax_id: SupplierTaxId, display_name: Option<String>) -> Self {
        Self {
            tax_id,
            display_name: display_name.unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string()),
            updated_at: Utc::now(),
        }
    }

    /// Refresh on conflict: a richer display name replaces the placeholder or
    /// a stale one; `None` leaves the stored name alone.
    pub fn refresh(&mut self, display_name: Option<String>) {
        if let Some(name) = display_name {
            if !name.trim().is_empty() {
                self.display_name = name;
            }
        }
        self.updated_at = Utc::now();
    }
}
