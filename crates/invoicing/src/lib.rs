//! `facturo-invoicing` — invoice domain: key normalization, workflow status
//! lattice, and the invoice/line-item/document shapes shared by every entry path.

pub mod invoice;
pub mod key;
pub mod status;

pub use invoice::{
    ElectronicDocument, Invoice, InvoiceHeader, InvoiceSubmission, LineItem, SubmissionOrigin,
};
pub use key::InvoiceKey;
pub use status::InvoiceStatus;
