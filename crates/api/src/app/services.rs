//! Service wiring: one place that assembles the store, the queue, the status
//! notifier and the background executor, with the external collaborators
//! injected so tests can swap in fakes.

use std::sync::{Arc, Mutex};

use facturo_events::InProcessNotifier;
use facturo_infra::jobs::{
    JobExecutor, JobExecutorConfig, JobExecutorHandle, JobKind,
    queue::{InMemoryJobQueue, QueueConfig},
};
use facturo_infra::store::{InMemoryInvoiceRepository, InvoiceRepository, InvoiceStore};
use facturo_ocr::TextRecognizer;
use facturo_sunat::{AcquisitionWorker, DocumentRetriever, SireClient};

/// Repository handle shared by the HTTP layer and the worker threads.
pub type SharedRepository = Arc<dyn InvoiceRepository>;

/// Everything the handlers need.
pub struct AppServices {
    pub store: Arc<InvoiceStore<SharedRepository>>,
    pub queue: Arc<InMemoryJobQueue>,
    pub notifier: Arc<InProcessNotifier>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub sire: Option<SireClient>,
    executor: Mutex<Option<JobExecutorHandle>>,
}

impl AppServices {
    /// Assemble services over the in-memory repository.
    pub fn build(
        retriever: Arc<dyn DocumentRetriever>,
        recognizer: Arc<dyn TextRecognizer>,
        sire: Option<SireClient>,
        queue_config: QueueConfig,
        workers: usize,
    ) -> Arc<Self> {
        let repository: SharedRepository = Arc::new(InMemoryInvoiceRepository::new());
        Self::with_repository(repository, retriever, recognizer, sire, queue_config, workers)
    }

    /// Assemble services over an explicit repository (e.g. Postgres).
    pub fn with_repository(
        repository: SharedRepository,
        retriever: Arc<dyn DocumentRetriever>,
        recognizer: Arc<dyn TextRecognizer>,
        sire: Option<SireClient>,
        queue_config: QueueConfig,
        workers: usize,
    ) -> Arc<Self> {
        let store = Arc::new(InvoiceStore::new(repository));
        let queue = InMemoryJobQueue::arc(queue_config);
        let notifier = Arc::new(InProcessNotifier::in_memory());

        let worker = Arc::new(AcquisitionWorker::new(
            store.clone(),
            retriever,
            notifier.clone(),
        ));

        let mut executor = JobExecutor::new(queue.clone());
        executor.register_handler(JobKind::DocumentAcquisition.type_name(), move |job| {
            worker.handle(job)
        });
        let handle = executor.spawn(
            JobExecutorConfig::default()
                .with_name("acquisition")
                .with_workers(workers),
        );

        Arc::new(Self {
            store,
            queue,
            notifier,
            recognizer,
            sire,
            executor: Mutex::new(Some(handle)),
        })
    }

    /// Stop the background executor, letting in-flight attempts finish.
    pub fn shutdown(&self) {
        if let Some(handle) = self.executor.lock().unwrap().take() {
            handle.shutdown();
        }
    }
}
