//! The acquisition worker: one job attempt end to end.
//!
//! Per attempt: broadcast `active`, invoke the retriever, transform, persist
//! through the invoice store under bulk-submission semantics, settle. Two
//! rules shape the error handling:
//!
//! - retrieval and transformation failures are reported to the queue so its
//!   backoff/retry policy applies; the worker never retries internally;
//! - a persistence failure after a successful retrieval does NOT fail the job.
//!   Re-running minutes of browser automation to retry a database write is
//!   wasteful, and the retrieved result is already in hand; the job completes
//!   with the result, the save failure is logged and flagged in the payload.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use facturo_events::{EventBus, StatusEvent, StatusNotifier};
use facturo_infra::jobs::{Job, JobOutcome};
use facturo_infra::store::{InvoiceRepository, InvoiceStore};
use facturo_invoicing::SubmissionOrigin;

use crate::retriever::{AcquisitionRequest, DocumentRetriever};
use crate::transform::transform;

/// Handles `acquisition.document` jobs.
pub struct AcquisitionWorker<R, B>
where
    R: InvoiceRepository,
    B: EventBus<StatusEvent>,
{
    store: Arc<InvoiceStore<R>>,
    retriever: Arc<dyn DocumentRetriever>,
    notifier: Arc<StatusNotifier<B>>,
}

impl<R, B> AcquisitionWorker<R, B>
where
    R: InvoiceRepository,
    B: EventBus<StatusEvent>,
{
    pub fn new(
        store: Arc<InvoiceStore<R>>,
        retriever: Arc<dyn DocumentRetriever>,
        notifier: Arc<StatusNotifier<B>>,
    ) -> Self {
        Self {
            store,
            retriever,
            notifier,
        }
    }

    /// Run one attempt of a claimed job.
    pub fn handle(&self, job: &Job) -> JobOutcome {
        let job_uuid = job.id.as_uuid();
        self.notifier.broadcast(StatusEvent::active(job_uuid));

        let request: AcquisitionRequest = match serde_json::from_value(job.payload.clone()) {
            Ok(request) => request,
            Err(e) => {
                let reason = format!("invalid acquisition payload: {e}");
                self.notifier.broadcast(StatusEvent::failed(job_uuid, reason.clone()));
                return JobOutcome::Failed(reason);
            }
        };

        info!(
            job_id = %job.id,
            issuer = %request.issuer_tax_id,
            reference = format!("{}-{}", request.series, request.number),
            attempt = job.attempts_made,
            "acquiring document"
        );

        let retrieved = match self.retriever.retrieve(&request) {
            Ok(retrieved) => retrieved,
            Err(failure) => {
                let reason = failure.to_string();
                warn!(job_id = %job.id, %reason, "retrieval failed");
                self.notifier.broadcast(StatusEvent::failed(job_uuid, reason.clone()));
                return JobOutcome::Failed(reason);
            }
        };

        let Some(invoice) = transform(&retrieved.structured) else {
            let reason = "retrieved document failed transformation".to_string();
            warn!(job_id = %job.id, "transform returned nothing; treating as parse failure");
            self.notifier.broadcast(StatusEvent::failed(job_uuid, reason.clone()));
            return JobOutcome::Failed(reason);
        };

        let reference = invoice.reference.clone();
        let result_invoice =
            serde_json::to_value(&invoice).unwrap_or_else(|_| json!({"reference": reference}));

        let submission = invoice.into_submission(&retrieved);
        let persisted = match self
            .store
            .upsert_invoice(SubmissionOrigin::Acquisition, submission)
        {
            Ok(outcome) => {
                info!(
                    job_id = %job.id,
                    reference = %outcome.reference,
                    created = outcome.created,
                    "retrieved invoice persisted"
                );
                true
            }
            Err(e) => {
                // The retrieval itself succeeded; losing the write must not
                // burn another automation run.
                warn!(job_id = %job.id, error = %e, "failed to persist retrieved invoice");
                false
            }
        };

        let result = json!({
            "invoice": result_invoice,
            "persisted": persisted,
        });

        self.notifier
            .broadcast(StatusEvent::completed(job_uuid, result.clone()));
        JobOutcome::Completed(result)
    }
}
