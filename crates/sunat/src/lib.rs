//! `facturo-sunat` — tax-portal collaborators and the acquisition worker.
//!
//! The portal is reached two ways: a browser-automation script behind the
//! [`retriever::DocumentRetriever`] boundary (per-document download), and the
//! SIRE reporting API in [`sire`] (per-period report export). The worker in
//! [`worker`] glues retrieval, transformation and the invoice store together
//! under the queue's retry discipline.

pub mod retriever;
pub mod sire;
pub mod transform;
pub mod worker;

pub use retriever::{
    AcquisitionRequest, DocumentRetriever, PortalCredentials, RetrievalFailure, RetrievedDocument,
    RetrievedFiles, ScriptRetriever, ScriptRetrieverConfig,
};
pub use sire::{ReportArchive, SireClient, SireConfig, SireError};
pub use transform::{AcquiredInvoice, AcquiredItem, transform};
pub use worker::AcquisitionWorker;
