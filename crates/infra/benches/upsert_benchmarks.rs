//! Upsert-path benchmarks: create vs merge against the in-memory repository.

use bigdecimal::BigDecimal;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use facturo_infra::store::{InMemoryInvoiceRepository, InvoiceStore};
use facturo_invoicing::{InvoiceHeader, InvoiceSubmission, LineItem, SubmissionOrigin};

fn submission(number: u32) -> InvoiceSubmission {
    InvoiceSubmission {
        series: "F001".to_string(),
        number: number.to_string(),
        supplier_display_name: Some("ACME SAC".to_string()),
        header: InvoiceHeader {
            currency: "PEN".to_string(),
            subtotal: BigDecimal::from(100),
            tax_amount: BigDecimal::from(18),
            total: BigDecimal::from(118),
            issued_on: None,
            supplier_tax_id: "20100113610".to_string(),
        },
        line_items: Some(vec![LineItem {
            description: "widget".to_string(),
            quantity: BigDecimal::from(2),
            unit_cost: BigDecimal::from(50),
            unit: "UNIDAD".to_string(),
        }]),
        document: None,
    }
}

fn bench_create(c: &mut Criterion) {
    c.bench_function("upsert_create", |b| {
        let store = InvoiceStore::new(InMemoryInvoiceRepository::arc());
        let mut n = 0u32;
        b.iter(|| {
            n += 1;
            let outcome = store
                .upsert_invoice(SubmissionOrigin::Bulk, submission(n))
                .unwrap();
            black_box(outcome)
        });
    });
}

fn bench_merge(c: &mut Criterion) {
    c.bench_function("upsert_merge", |b| {
        let store = InvoiceStore::new(InMemoryInvoiceRepository::arc());
        store
            .upsert_invoice(SubmissionOrigin::Bulk, submission(1))
            .unwrap();
        b.iter(|| {
            let outcome = store
                .upsert_invoice(SubmissionOrigin::Bulk, submission(1))
                .unwrap();
            black_box(outcome)
        });
    });
}

criterion_group!(benches, bench_create, bench_merge);
criterion_main!(benches);
