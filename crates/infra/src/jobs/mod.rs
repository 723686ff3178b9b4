//! Acquisition job queue: durable bookkeeping, lease-based delivery, bounded
//! retries with exponential backoff, and the polling executor that drives
//! registered handlers.

pub mod executor;
pub mod queue;
pub mod types;

pub use executor::{JobExecutor, JobExecutorConfig, JobExecutorHandle, JobOutcome};
pub use queue::{
    InMemoryJobQueue, JobProgress, JobQueue, JobStatusView, QueueConfig, QueueError, QueueStats,
};
pub use types::{Backoff, BackoffKind, Job, JobId, JobKind, JobState, RetryPolicy};
