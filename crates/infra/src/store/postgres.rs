//! Postgres-backed invoice repository.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE suppliers (
//!     tax_id        text PRIMARY KEY,
//!     display_name  text NOT NULL,
//!     updated_at    timestamptz NOT NULL
//! );
//!
//! CREATE TABLE invoices (
//!     id              uuid PRIMARY KEY,
//!     series          text NOT NULL,
//!     number          text NOT NULL,
//!     status          text NOT NULL,
//!     currency        text NOT NULL,
//!     subtotal        numeric NOT NULL,
//!     tax_amount      numeric NOT NULL,
//!     total           numeric NOT NULL,
//!     issued_on       date,
//!     supplier_tax_id text NOT NULL REFERENCES suppliers (tax_id),
//!     document_xml    bytea,
//!     document_pdf    bytea,
//!     document_ack    bytea,
//!     document_received_at timestamptz,
//!     document_authority_status text,
//!     created_at      timestamptz NOT NULL,
//!     updated_at      timestamptz NOT NULL,
//!     UNIQUE (series, number)
//! );
//!
//! CREATE TABLE invoice_lines (
//!     invoice_id  uuid NOT NULL REFERENCES invoices (id) ON DELETE CASCADE,
//!     line_no     integer NOT NULL,
//!     description text NOT NULL,
//!     quantity    numeric NOT NULL,
//!     unit_cost   numeric NOT NULL,
//!     unit        text NOT NULL,
//!     PRIMARY KEY (invoice_id, line_no)
//! );
//! ```
//!
//! The `(series, number)` uniqueness constraint is the database-side guarantee
//! behind the one-invoice-per-key invariant; `insert`/`update` write the full
//! row set inside one SQL transaction so concurrent readers never observe a
//! header/lines mix.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use facturo_core::InvoiceId;
use facturo_invoicing::{
    ElectronicDocument, Invoice, InvoiceHeader, InvoiceKey, InvoiceStatus, LineItem,
};
use facturo_parties::{Supplier, SupplierTaxId};

use super::{InvoiceRepository, RepositoryError};

/// Postgres repository.
///
/// The repository trait is synchronous (callers are worker threads and
/// `spawn_blocking` closures); queries run on the captured runtime handle.
/// Construct this from within the runtime, at startup.
pub struct PostgresInvoiceRepository {
    pool: Arc<PgPool>,
    handle: tokio::runtime::Handle,
}

impl PostgresInvoiceRepository {
    pub fn new(pool: PgPool, handle: tokio::runtime::Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            handle,
        }
    }
}

fn storage_error(e: sqlx::Error) -> RepositoryError {
    if let Some(db) = e.as_database_error() {
        // 23505 = unique_violation
        if db.code().as_deref() == Some("23505") {
            return RepositoryError::DuplicateKey(db.message().to_string());
        }
    }
    RepositoryError::Storage(e.to_string())
}

fn parse_status(label: &str) -> Result<InvoiceStatus, RepositoryError> {
    match label {
        "CONSULTED" => Ok(InvoiceStatus::Consulted),
        "WITH_DETAIL" => Ok(InvoiceStatus::WithDetail),
        "REGISTERED" => Ok(InvoiceStatus::Registered),
        "POSTED" => Ok(InvoiceStatus::Posted),
        other => Err(RepositoryError::Storage(format!(
            "unknown invoice status `{other}`"
        ))),
    }
}

impl InvoiceRepository for PostgresInvoiceRepository {
    fn find_supplier(&self, tax_id: &SupplierTaxId) -> Result<Option<Supplier>, RepositoryError> {
        let pool = self.pool.clone();
        let tax_id_str = tax_id.as_str().to_string();

        self.handle.block_on(async move {
            let row = sqlx::query(
                "SELECT tax_id, display_name, updated_at FROM suppliers WHERE tax_id = $1",
            )
            .bind(&tax_id_str)
            .fetch_optional(&*pool)
            .await
            .map_err(storage_error)?;

            row.map(|row| {
                let tax_id = SupplierTaxId::new(row.try_get::<String, _>("tax_id").map_err(storage_error)?)
                    .map_err(|e| RepositoryError::Storage(e.to_string()))?;
                Ok(Supplier {
                    tax_id,
                    display_name: row.try_get("display_name").map_err(storage_error)?,
                    updated_at: row.try_get("updated_at").map_err(storage_error)?,
                })
            })
            .transpose()
        })
    }

    fn save_supplier(&self, supplier: &Supplier) -> Result<(), RepositoryError> {
        let pool = self.pool.clone();
        let supplier = supplier.clone();

        self.handle.block_on(async move {
            sqlx::query(
                "INSERT INTO suppliers (tax_id, display_name, updated_at) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (tax_id) DO UPDATE \
                 SET display_name = EXCLUDED.display_name, updated_at = EXCLUDED.updated_at",
            )
            .bind(supplier.tax_id.as_str())
            .bind(&supplier.display_name)
            .bind(supplier.updated_at)
            .execute(&*pool)
            .await
            .map_err(storage_error)?;
            Ok(())
        })
    }

    fn find_by_key(&self, key: &InvoiceKey) -> Result<Option<Invoice>, RepositoryError> {
        let pool = self.pool.clone();
        let series = key.series().to_string();
        let number = key.number().to_string();

        self.handle.block_on(async move {
            let row = sqlx::query(
                "SELECT id, series, number, status, currency, subtotal, tax_amount, total, \
                        issued_on, supplier_tax_id, document_xml, document_pdf, document_ack, \
                        document_received_at, document_authority_status, created_at, updated_at \
                 FROM invoices WHERE series = $1 AND number = $2",
            )
            .bind(&series)
            .bind(&number)
            .fetch_optional(&*pool)
            .await
            .map_err(storage_error)?;

            let Some(row) = row else {
                return Ok(None);
            };

            let id: Uuid = row.try_get("id").map_err(storage_error)?;
            let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(storage_error)?;
            let status = parse_status(&row.try_get::<String, _>("status").map_err(storage_error)?)?;

            let document = match row
                .try_get::<Option<Vec<u8>>, _>("document_xml")
                .map_err(storage_error)?
            {
                Some(xml_bytes) => Some(ElectronicDocument {
                    xml_bytes,
                    pdf_bytes: row.try_get("document_pdf").map_err(storage_error)?,
                    acknowledgment_bytes: row.try_get("document_ack").map_err(storage_error)?,
                    received_at: row
                        .try_get::<Option<DateTime<Utc>>, _>("document_received_at")
                        .map_err(storage_error)?
                        .unwrap_or(updated_at),
                    authority_status: row
                        .try_get("document_authority_status")
                        .map_err(storage_error)?,
                }),
                None => None,
            };

            let lines = sqlx::query(
                "SELECT description, quantity, unit_cost, unit \
                 FROM invoice_lines WHERE invoice_id = $1 ORDER BY line_no",
            )
            .bind(id)
            .fetch_all(&*pool)
            .await
            .map_err(storage_error)?;

            let line_items = lines
                .into_iter()
                .map(|row| {
                    Ok(LineItem {
                        description: row.try_get("description").map_err(storage_error)?,
                        quantity: row.try_get::<BigDecimal, _>("quantity").map_err(storage_error)?,
                        unit_cost: row.try_get::<BigDecimal, _>("unit_cost").map_err(storage_error)?,
                        unit: row.try_get("unit").map_err(storage_error)?,
                    })
                })
                .collect::<Result<Vec<_>, RepositoryError>>()?;

            Ok(Some(Invoice {
                id: InvoiceId::from_uuid(id),
                key: InvoiceKey::normalize(&series, &number),
                status,
                header: InvoiceHeader {
                    currency: row.try_get("currency").map_err(storage_error)?,
                    subtotal: row.try_get::<BigDecimal, _>("subtotal").map_err(storage_error)?,
                    tax_amount: row.try_get::<BigDecimal, _>("tax_amount").map_err(storage_error)?,
                    total: row.try_get::<BigDecimal, _>("total").map_err(storage_error)?,
                    issued_on: row.try_get::<Option<NaiveDate>, _>("issued_on").map_err(storage_error)?,
                    supplier_tax_id: row.try_get("supplier_tax_id").map_err(storage_error)?,
                },
                line_items,
                document,
                created_at: row.try_get("created_at").map_err(storage_error)?,
                updated_at,
            }))
        })
    }

    fn insert(&self, invoice: &Invoice) -> Result<(), RepositoryError> {
        let pool = self.pool.clone();
        let invoice = invoice.clone();

        self.handle.block_on(async move {
            let mut tx = pool.begin().await.map_err(storage_error)?;

            sqlx::query(
                "INSERT INTO invoices \
                 (id, series, number, status, currency, subtotal, tax_amount, total, issued_on, \
                  supplier_tax_id, document_xml, document_pdf, document_ack, document_received_at, \
                  document_authority_status, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            )
            .bind(*invoice.id.as_uuid())
            .bind(invoice.key.series())
            .bind(invoice.key.number())
            .bind(invoice.status.storage_label())
            .bind(&invoice.header.currency)
            .bind(&invoice.header.subtotal)
            .bind(&invoice.header.tax_amount)
            .bind(&invoice.header.total)
            .bind(invoice.header.issued_on)
            .bind(&invoice.header.supplier_tax_id)
            .bind(invoice.document.as_ref().map(|d| d.xml_bytes.clone()))
            .bind(invoice.document.as_ref().and_then(|d| d.pdf_bytes.clone()))
            .bind(invoice.document.as_ref().and_then(|d| d.acknowledgment_bytes.clone()))
            .bind(invoice.document.as_ref().map(|d| d.received_at))
            .bind(invoice.document.as_ref().and_then(|d| d.authority_status.clone()))
            .bind(invoice.created_at)
            .bind(invoice.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

            insert_lines(&mut tx, &invoice).await?;

            tx.commit().await.map_err(storage_error)?;
            Ok(())
        })
    }

    fn update(&self, invoice: &Invoice) -> Result<(), RepositoryError> {
        let pool = self.pool.clone();
        let invoice = invoice.clone();

        self.handle.block_on(async move {
            let mut tx = pool.begin().await.map_err(storage_error)?;

            let updated = sqlx::query(
                "UPDATE invoices SET \
                 status = $2, currency = $3, subtotal = $4, tax_amount = $5, total = $6, \
                 issued_on = $7, supplier_tax_id = $8, document_xml = $9, document_pdf = $10, \
                 document_ack = $11, document_received_at = $12, document_authority_status = $13, \
                 updated_at = $14 \
                 WHERE id = $1",
            )
            .bind(*invoice.id.as_uuid())
            .bind(invoice.status.storage_label())
            .bind(&invoice.header.currency)
            .bind(&invoice.header.subtotal)
            .bind(&invoice.header.tax_amount)
            .bind(&invoice.header.total)
            .bind(invoice.header.issued_on)
            .bind(&invoice.header.supplier_tax_id)
            .bind(invoice.document.as_ref().map(|d| d.xml_bytes.clone()))
            .bind(invoice.document.as_ref().and_then(|d| d.pdf_bytes.clone()))
            .bind(invoice.document.as_ref().and_then(|d| d.acknowledgment_bytes.clone()))
            .bind(invoice.document.as_ref().map(|d| d.received_at))
            .bind(invoice.document.as_ref().and_then(|d| d.authority_status.clone()))
            .bind(invoice.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

            if updated.rows_affected() == 0 {
                return Err(RepositoryError::NotFound(invoice.key.reference()));
            }

            sqlx::query("DELETE FROM invoice_lines WHERE invoice_id = $1")
                .bind(*invoice.id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;

            insert_lines(&mut tx, &invoice).await?;

            tx.commit().await.map_err(storage_error)?;
            Ok(())
        })
    }
}

async fn insert_lines(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    invoice: &Invoice,
) -> Result<(), RepositoryError> {
    for (index, line) in invoice.line_items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO invoice_lines (invoice_id, line_no, description, quantity, unit_cost, unit) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(*invoice.id.as_uuid())
        .bind(index as i32 + 1)
        .bind(&line.description)
        .bind(&line.quantity)
        .bind(&line.unit_cost)
        .bind(&line.unit)
        .execute(&mut **tx)
        .await
        .map_err(storage_error)?;
    }
    Ok(())
}
