//! `facturo-parties` — supplier directory domain.

pub mod supplier;

pub use supplier::{Supplier, SupplierTaxId};
