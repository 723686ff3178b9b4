//! In-memory repository for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use facturo_invoicing::{Invoice, InvoiceKey};
use facturo_parties::{Supplier, SupplierTaxId};

use super::{InvoiceRepository, RepositoryError};

/// In-memory invoice/supplier storage. Each call is atomic under the row
/// lock, mirroring what the relational backend provides per transaction.
#[derive(Debug, Default)]
pub struct InMemoryInvoiceRepository {
    invoices: RwLock<HashMap<InvoiceKey, Invoice>>,
    suppliers: RwLock<HashMap<String, Supplier>>,
}

impl InMemoryInvoiceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn supplier_count(&self) -> usize {
        self.suppliers.read().unwrap().len()
    }

    pub fn invoice_count(&self) -> usize {
        self.invoices.read().unwrap().len()
    }
}

impl InvoiceRepository for InMemoryInvoiceRepository {
    fn find_supplier(&self, tax_id: &SupplierTaxId) -> Result<Option<Supplier>, RepositoryError> {
        let suppliers = self.suppliers.read().unwrap();
        Ok(suppliers.get(tax_id.as_str()).cloned())
    }

    fn save_supplier(&self, supplier: &Supplier) -> Result<(), RepositoryError> {
        let mut suppliers = self.suppliers.write().unwrap();
        suppliers.insert(supplier.tax_id.as_str().to_string(), supplier.clone());
        Ok(())
    }

    fn find_by_key(&self, key: &InvoiceKey) -> Result<Option<Invoice>, RepositoryError> {
        let invoices = self.invoices.read().unwrap();
        Ok(invoices.get(key).cloned())
    }

    fn insert(&self, invoice: &Invoice) -> Result<(), RepositoryError> {
        let mut invoices = self.invoices.write().unwrap();
        if invoices.contains_key(&invoice.key) {
            return Err(RepositoryError::DuplicateKey(invoice.key.reference()));
        }
        invoices.insert(invoice.key.clone(), invoice.clone());
        Ok(())
    }

    fn update(&self, invoice: &Invoice) -> Result<(), RepositoryError> {
        let mut invoices = self.invoices.write().unwrap();
        if !invoices.contains_key(&invoice.key) {
            return Err(RepositoryError::NotFound(invoice.key.reference()));
        }
        invoices.insert(invoice.key.clone(), invoice.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use facturo_core::InvoiceId;
    use facturo_invoicing::{InvoiceHeader, InvoiceStatus};

    use super::*;

    fn sample(key: InvoiceKey) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: InvoiceId::new(),
            key,
            status: InvoiceStatus::Consulted,
            header: InvoiceHeader {
                currency: "PEN".to_string(),
                subtotal: BigDecimal::from(100),
                tax_amount: BigDecimal::from(18),
                total: BigDecimal::from(118),
                issued_on: None,
                supplier_tax_id: "20100113610".to_string(),
            },
            line_items: Vec::new(),
            document: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_enforces_key_uniqueness() {
        let repo = InMemoryInvoiceRepository::new();
        let key = InvoiceKey::normalize("F001", "1");

        repo.insert(&sample(key.clone())).unwrap();
        assert!(matches!(
            repo.insert(&sample(key)),
            Err(RepositoryError::DuplicateKey(_))
        ));
    }

    #[test]
    fn update_requires_existing_row() {
        let repo = InMemoryInvoiceRepository::new();
        let key = InvoiceKey::normalize("F001", "2");
        assert!(matches!(
            repo.update(&sample(key)),
            Err(RepositoryError::NotFound(_))
        ));
    }
}
