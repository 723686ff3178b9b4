//! Queue bookkeeping: enqueue, lease-based claim, settlement, retention.
//!
//! Delivery is at-least-once: a claimed job carries a lease, and a worker that
//! dies mid-attempt simply lets the lease run out, after which `claim_next`
//! hands the job to someone else. The lease must therefore outlive the
//! worst-case single attempt of the slowest collaborator (browser automation:
//! tens of seconds to low minutes).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use super::types::{Job, JobId, JobState};

/// Queue abstraction.
pub trait JobQueue: Send + Sync {
    /// Durably record a job; returns its id synchronously. The outcome is only
    /// ever available via [`JobQueue::status`] or the status broadcast.
    fn enqueue(&self, job: Job) -> Result<JobId, QueueError>;

    /// Claim the next deliverable job under a fresh lease. Deliverable means
    /// waiting-and-past-backoff, or active with an expired lease (redelivery).
    fn claim_next(&self) -> Result<Option<Job>, QueueError>;

    /// Settle a claimed job as completed with its result.
    fn complete(&self, job_id: JobId, result: serde_json::Value) -> Result<(), QueueError>;

    /// Record a failed attempt. Returns the resulting state: `Waiting` when a
    /// retry was scheduled under backoff, `Failed` when attempts are exhausted.
    fn fail(&self, job_id: JobId, reason: String) -> Result<JobState, QueueError>;

    /// Point-in-time status lookup. `NotFound` for ids that were never seen or
    /// whose terminal record has been reaped past its retention window.
    fn status(&self, job_id: JobId) -> Result<JobStatusView, QueueError>;

    /// Administrative drain-and-wipe: every job is removed immediately,
    /// whatever its state. This is not graceful cancellation; an in-flight
    /// worker may well finish its current attempt and find the job gone.
    fn purge(&self) -> Result<usize, QueueError>;

    /// Remove terminal jobs past their retention window.
    fn reap(&self) -> Result<usize, QueueError>;

    fn stats(&self) -> Result<QueueStats, QueueError>;
}

/// Queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Attempt progress, exposed by the status registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct JobProgress {
    pub attempts_made: u32,
    pub max_attempts: u32,
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub state: JobState,
    pub progress: JobProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl JobStatusView {
    fn of(job: &Job) -> Self {
        Self {
            job_id: job.id,
            state: job.state,
            progress: JobProgress {
                attempts_made: job.attempts_made,
                max_attempts: job.retry_policy.max_attempts,
            },
            result: job.result.clone(),
            failure_reason: job.last_failure_reason.clone(),
        }
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Queue tuning.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Exclusive claim duration per attempt.
    pub lease_duration: Duration,
    /// How long completed jobs stay inspectable.
    pub completed_retention: Duration,
    /// How long terminally failed jobs stay inspectable. Longer than
    /// `completed_retention`; failures are what people come back to look at.
    pub failed_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(120),
            completed_retention: Duration::from_secs(15 * 60),
            failed_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// In-memory queue. The single write lock is the serialization point for job
/// delivery: each job is leased to exactly one claimant at a time.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    config: QueueConfig,
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc(config: QueueConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let id = job.id;
        jobs.insert(id, job);
        info!(job_id = %id, "job enqueued");
        Ok(id)
    }

    fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let now = Utc::now();

        let mut candidates: Vec<_> = jobs
            .values()
            .filter(|j| j.is_ready(now) || j.lease_expired(now))
            .collect();

        // FIFO by creation time.
        candidates.sort_by_key(|j| j.created_at);

        if let Some(job) = candidates.first() {
            let job_id = job.id;
            if job.lease_expired(now) {
                warn!(job_id = %job_id, "lease expired; redelivering job");
            }
            if let Some(job) = jobs.get_mut(&job_id) {
                job.mark_active(self.config.lease_duration);
                return Ok(Some(job.clone()));
            }
        }

        Ok(None)
    }

    fn complete(&self, job_id: JobId, result: serde_json::Value) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;

        // A redelivered twin may have settled this job already; at-least-once
        // delivery makes late settlement a no-op, not an error.
        if job.state.is_terminal() {
            return Ok(());
        }

        job.mark_completed(result);
        Ok(())
    }

    fn fail(&self, job_id: JobId, reason: String) -> Result<JobState, QueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;

        if job.state.is_terminal() {
            return Ok(job.state);
        }

        job.mark_failed(reason);
        Ok(job.state)
    }

    fn status(&self, job_id: JobId) -> Result<JobStatusView, QueueError> {
        let jobs = self.jobs.read().unwrap();
        jobs.get(&job_id)
            .map(JobStatusView::of)
            .ok_or(QueueError::NotFound(job_id))
    }

    fn purge(&self) -> Result<usize, QueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let removed = jobs.len();
        jobs.clear();
        warn!(removed, "queue purged");
        Ok(removed)
    }

    fn reap(&self) -> Result<usize, QueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let now = Utc::now();
        let completed_cutoff =
            chrono::Duration::from_std(self.config.completed_retention).unwrap_or_default();
        let failed_cutoff =
            chrono::Duration::from_std(self.config.failed_retention).unwrap_or_default();

        let before = jobs.len();
        jobs.retain(|_, job| match (job.state, job.finished_at) {
            (JobState::Completed, Some(at)) => now - at < completed_cutoff,
            (JobState::Failed, Some(at)) => now - at < failed_cutoff,
            _ => true,
        });

        Ok(before - jobs.len())
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        let jobs = self.jobs.read().unwrap();
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            match job.state {
                JobState::Waiting => stats.waiting += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

impl JobQueue for Arc<InMemoryJobQueue> {
    fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        (**self).enqueue(job)
    }

    fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        (**self).claim_next()
    }

    fn complete(&self, job_id: JobId, result: serde_json::Value) -> Result<(), QueueError> {
        (**self).complete(job_id, result)
    }

    fn fail(&self, job_id: JobId, reason: String) -> Result<JobState, QueueError> {
        (**self).fail(job_id, reason)
    }

    fn status(&self, job_id: JobId) -> Result<JobStatusView, QueueError> {
        (**self).status(job_id)
    }

    fn purge(&self) -> Result<usize, QueueError> {
        (**self).purge()
    }

    fn reap(&self) -> Result<usize, QueueError> {
        (**self).reap()
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        (**self).stats()
    }
}
