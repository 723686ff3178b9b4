//! Invoice store: idempotent upsert/merge of header, line items and document
//! blobs under the workflow state machine, serialized per invoice key.

pub mod invoice_store;
pub mod memory;
pub mod postgres;

pub use invoice_store::{InvoiceStore, StoreError, UpsertOutcome};
pub use memory::InMemoryInvoiceRepository;
pub use postgres::PostgresInvoiceRepository;

use facturo_invoicing::{Invoice, InvoiceKey};
use facturo_parties::{Supplier, SupplierTaxId};

/// Relational-store boundary: transactional primitives keyed by invoice key
/// and supplier tax ID, with a uniqueness constraint on the invoice key.
pub trait InvoiceRepository: Send + Sync {
    fn find_supplier(&self, tax_id: &SupplierTaxId) -> Result<Option<Supplier>, RepositoryError>;

    fn save_supplier(&self, supplier: &Supplier) -> Result<(), RepositoryError>;

    fn find_by_key(&self, key: &InvoiceKey) -> Result<Option<Invoice>, RepositoryError>;

    /// Insert a new invoice with its lines and document, atomically.
    fn insert(&self, invoice: &Invoice) -> Result<(), RepositoryError>;

    /// Persist an updated invoice wholesale (header, status, lines, document),
    /// atomically: a concurrent reader sees the old row or the new one, never
    /// a mix.
    fn update(&self, invoice: &Invoice) -> Result<(), RepositoryError>;
}

/// Repository error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("invoice not found: {0}")]
    NotFound(String),
    #[error("duplicate invoice key: {0}")]
    DuplicateKey(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl<R: InvoiceRepository + ?Sized> InvoiceRepository for std::sync::Arc<R> {
    fn find_supplier(&self, tax_id: &SupplierTaxId) -> Result<Option<Supplier>, RepositoryError> {
        (**self).find_supplier(tax_id)
    }

    fn save_supplier(&self, supplier: &Supplier) -> Result<(), RepositoryError> {
        (**self).save_supplier(supplier)
    }

    fn find_by_key(&self, key: &InvoiceKey) -> Result<Option<Invoice>, RepositoryError> {
        (**self).find_by_key(key)
    }

    fn insert(&self, invoice: &Invoice) -> Result<(), RepositoryError> {
        (**self).insert(invoice)
    }

    fn update(&self, invoice: &Invoice) -> Result<(), RepositoryError> {
        (**self).update(invoice)
    }
}
