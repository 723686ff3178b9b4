//! The upsert/merge discipline every entry path goes through.
//!
//! One logical transaction per invoice key: a per-key lock serializes writers
//! so a concurrent second upsert observes either the old or the new complete
//! state, never header fields from one call with line items from another.
//! Upserts on different keys run fully concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::info;

use facturo_core::{DomainError, InvoiceId};
use facturo_invoicing::{
    Invoice, InvoiceKey, InvoiceStatus, InvoiceSubmission, SubmissionOrigin,
};
use facturo_parties::{Supplier, SupplierTaxId};

use super::{InvoiceRepository, RepositoryError};

/// Store error: a validation failure (rejected before any write) or a
/// repository failure (surfaced, never swallowed; a half-applied merge would
/// desynchronize lines and status).
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What an upsert did, so callers can report "created" vs "already existed"
/// without a second read.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UpsertOutcome {
    pub invoice_id: InvoiceId,
    pub reference: String,
    pub status: InvoiceStatus,
    pub created: bool,
}

/// Canonical invoice store shared by the OCR, bulk and acquisition paths.
pub struct InvoiceStore<R: InvoiceRepository> {
    repo: R,
    key_locks: Mutex<HashMap<InvoiceKey, Arc<Mutex<()>>>>,
}

impl<R: InvoiceRepository> InvoiceStore<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create or merge an invoice.
    ///
    /// Semantics per entry path:
    /// - every path: supplier upsert first, then invoice; fresh invoices start
    ///   at `CONSULTED` whatever else the submission carries;
    /// - existing invoices: header replaced, line items replaced wholesale when
    ///   provided (promoting `CONSULTED → WITH_DETAIL`), document upserted
    ///   independently of status;
    /// - bulk and acquisition re-submissions additionally confirm registration.
    pub fn upsert_invoice(
        &self,
        origin: SubmissionOrigin,
        submission: InvoiceSubmission,
    ) -> Result<UpsertOutcome, StoreError> {
        // Fail fast, before any write.
        let tax_id = SupplierTaxId::new(submission.header.supplier_tax_id.clone())?;
        if !submission.number.chars().any(|c| c.is_ascii_digit()) {
            return Err(DomainError::validation("invoice number must contain at least one digit").into());
        }
        if submission.series.trim().is_empty() {
            return Err(DomainError::validation("invoice series must not be empty").into());
        }

        let key = InvoiceKey::normalize(&submission.series, &submission.number);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().unwrap();

        self.upsert_supplier(&tax_id, submission.supplier_display_name.clone())?;

        match self.repo.find_by_key(&key)? {
            None => self.create(key, submission),
            Some(existing) => self.merge(origin, existing, submission),
        }
    }

    /// Explicit accounting action: set `POSTED`, terminally, bypassing the
    /// ordering checks. The one escape hatch in the lattice.
    pub fn mark_posted(&self, key: &InvoiceKey) -> Result<Invoice, StoreError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap();

        let mut invoice = self
            .repo
            .find_by_key(key)?
            .ok_or(DomainError::NotFound)?;

        invoice.status = InvoiceStatus::Posted;
        invoice.updated_at = Utc::now();
        self.repo.update(&invoice)?;

        info!(reference = %invoice.key, "invoice posted");
        Ok(invoice)
    }

    /// Point-in-time read, for the HTTP boundary.
    pub fn fetch(&self, key: &InvoiceKey) -> Result<Option<Invoice>, StoreError> {
        Ok(self.repo.find_by_key(key)?)
    }

    fn create(
        &self,
        key: InvoiceKey,
        submission: InvoiceSubmission,
    ) -> Result<UpsertOutcome, StoreError> {
        let now = Utc::now();
        let invoice = Invoice {
            id: InvoiceId::new(),
            key: key.clone(),
            // A fresh invoice always enters the workflow at the bottom; line
            // items carried by the very first submission do not promote it.
            status: InvoiceStatus::Consulted,
            header: submission.header,
            line_items: submission.line_items.unwrap_or_default(),
            document: submission.document,
            created_at: now,
            updated_at: now,
        };

        self.repo.insert(&invoice)?;
        info!(reference = %key, "invoice created");

        Ok(UpsertOutcome {
            invoice_id: invoice.id,
            reference: key.reference(),
            status: invoice.status,
            created: true,
        })
    }

    fn merge(
        &self,
        origin: SubmissionOrigin,
        mut existing: Invoice,
        submission: InvoiceSubmission,
    ) -> Result<UpsertOutcome, StoreError> {
        existing.header = submission.header;

        if let Some(items) = submission.line_items {
            // Wholesale replace, never a partial merge; promotes only a bare
            // CONSULTED invoice.
            existing.status = existing.status.after_line_items_attached();
            existing.line_items = items;
        }

        if origin.confirms_registration() {
            existing.status = existing.status.after_registration_confirmed();
        }

        if let Some(document) = submission.document {
            existing.document = Some(document);
        }

        existing.updated_at = Utc::now();
        self.repo.update(&existing)?;
        info!(reference = %existing.key, status = existing.status.storage_label(), "invoice merged");

        Ok(UpsertOutcome {
            invoice_id: existing.id,
            reference: existing.key.reference(),
            status: existing.status,
            created: false,
        })
    }

    fn upsert_supplier(
        &self,
        tax_id: &SupplierTaxId,
        display_name: Option<String>,
    ) -> Result<(), StoreError> {
        match self.repo.find_supplier(tax_id)? {
            Some(mut supplier) => {
                supplier.refresh(display_name);
                self.repo.save_supplier(&supplier)?;
            }
            None => {
                self.repo
                    .save_supplier(&Supplier::new(tax_id.clone(), display_name))?;
            }
        }
        Ok(())
    }

    fn key_lock(&self, key: &InvoiceKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap();
        locks.entry(key.clone()).or_default().clone()
    }
}

impl<R: InvoiceRepository> std::fmt::Debug for InvoiceStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvoiceStore").finish_non_exhaustive()
    }
}
