//! Polling job executor.
//!
//! Worker threads claim jobs from the queue, run the registered handler, and
//! settle the outcome back into the queue. Retry policy belongs to the queue:
//! a handler reports one pass/fail outcome per attempt and never loops
//! internally. Handlers block (external collaborators run for minutes), which
//! is why this runs on plain threads and not on the async runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::queue::{JobQueue, QueueError};
use super::types::{Job, JobState};

/// Outcome of one handler attempt.
#[derive(Debug)]
pub enum JobOutcome {
    /// Attempt succeeded; the value becomes the job's result.
    Completed(serde_json::Value),
    /// Attempt failed; the queue decides between backoff retry and terminal
    /// failure.
    Failed(String),
}

/// Job handler function type.
pub type JobHandler = Box<dyn Fn(&Job) -> JobOutcome + Send + Sync>;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often an idle worker polls for new jobs.
    pub poll_interval: Duration,
    /// Number of worker threads. The queue's lease is the serialization point,
    /// so workers never share a job.
    pub workers: usize,
    /// Name for logging.
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            workers: 1,
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: Arc<AtomicBool>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Request shutdown and wait for every worker to finish its current job.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for join in self.joins.drain(..) {
            let _ = join.join();
        }
    }

    /// Current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub uptime_secs: u64,
}

/// Background job executor.
pub struct JobExecutor<Q: JobQueue> {
    queue: Q,
    handlers: HashMap<String, JobHandler>,
}

impl<Q: JobQueue + 'static> JobExecutor<Q> {
    pub fn new(queue: Q) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job kind (`"*"` matches anything).
    pub fn register_handler<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> JobOutcome + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Box::new(handler));
    }

    fn get_handler(&self, type_name: &str) -> Option<&JobHandler> {
        self.handlers
            .get(type_name)
            .or_else(|| self.handlers.get("*"))
    }

    /// Spawn the configured number of worker threads.
    pub fn spawn(self, config: JobExecutorConfig) -> JobExecutorHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let executor = Arc::new(self);

        let mut joins = Vec::with_capacity(config.workers);
        for worker in 0..config.workers {
            let executor = executor.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();
            let stats = stats.clone();

            let join = thread::Builder::new()
                .name(format!("{}-{}", config.name, worker))
                .spawn(move || {
                    worker_loop(&executor, &config, &shutdown, &stats);
                })
                .expect("failed to spawn job executor thread");
            joins.push(join);
        }

        JobExecutorHandle {
            shutdown,
            joins,
            stats,
        }
    }

    /// Execute a single already-claimed job (used by tests and the worker
    /// loop).
    pub fn execute_one(&self, job: &Job) -> Result<(), String> {
        let handler = match self.get_handler(job.kind.type_name()) {
            Some(h) => h,
            None => {
                let reason = format!("no handler for job kind `{}`", job.kind.type_name());
                warn!(job_id = %job.id, %reason, "dropping attempt");
                self.settle_failure(job, reason.clone());
                return Err(reason);
            }
        };

        match handler(job) {
            JobOutcome::Completed(result) => {
                if let Err(e) = self.queue.complete(job.id, result) {
                    // The job may have been purged mid-flight; that is allowed.
                    debug!(job_id = %job.id, error = %e, "completion not recorded");
                }
                debug!(job_id = %job.id, "job completed");
                Ok(())
            }
            JobOutcome::Failed(reason) => {
                self.settle_failure(job, reason.clone());
                Err(reason)
            }
        }
    }

    fn settle_failure(&self, job: &Job, reason: String) {
        match self.queue.fail(job.id, reason.clone()) {
            Ok(JobState::Failed) => {
                warn!(job_id = %job.id, %reason, "job failed terminally");
            }
            Ok(_) => {
                debug!(job_id = %job.id, %reason, "attempt failed; retry scheduled");
            }
            Err(QueueError::NotFound(_)) => {
                debug!(job_id = %job.id, "failure not recorded; job purged");
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to settle job");
            }
        }
    }
}

fn worker_loop<Q: JobQueue + 'static>(
    executor: &JobExecutor<Q>,
    config: &JobExecutorConfig,
    shutdown: &AtomicBool,
    stats: &Mutex<ExecutorStats>,
) {
    info!(executor = %config.name, "job executor worker started");
    let start_time = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        {
            let mut s = stats.lock().unwrap();
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        // Retention housekeeping is cheap and safe to run on every pass.
        if let Err(e) = executor.queue.reap() {
            error!(executor = %config.name, error = %e, "failed to reap jobs");
        }

        match executor.queue.claim_next() {
            Ok(Some(job)) => {
                debug!(
                    executor = %config.name,
                    job_id = %job.id,
                    kind = job.kind.type_name(),
                    attempt = job.attempts_made,
                    "claimed job"
                );

                let result = executor.execute_one(&job);

                let mut s = stats.lock().unwrap();
                s.jobs_processed += 1;
                match result {
                    Ok(()) => s.jobs_succeeded += 1,
                    Err(_) => s.jobs_failed += 1,
                }
            }
            Ok(None) => {
                thread::sleep(config.poll_interval);
            }
            Err(e) => {
                error!(executor = %config.name, error = %e, "failed to claim job");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(executor = %config.name, "job executor worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::super::queue::{InMemoryJobQueue, QueueConfig};
    use super::super::types::{JobKind, RetryPolicy};
    use super::*;

    fn immediate_retries(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::ZERO)
    }

    #[test]
    fn successful_handler_completes_the_job() {
        let queue = InMemoryJobQueue::arc(QueueConfig::default());
        let mut executor = JobExecutor::new(queue.clone());
        executor.register_handler("acquisition.document", |_job| {
            JobOutcome::Completed(serde_json::json!({"ok": true}))
        });

        let id = queue
            .enqueue(Job::new(JobKind::DocumentAcquisition, serde_json::json!({})))
            .unwrap();
        let claimed = queue.claim_next().unwrap().unwrap();
        executor.execute_one(&claimed).unwrap();

        assert_eq!(queue.status(id).unwrap().state, JobState::Completed);
    }

    #[test]
    fn failing_handler_retries_then_settles_failed() {
        let queue = InMemoryJobQueue::arc(QueueConfig::default());
        let mut executor = JobExecutor::new(queue.clone());
        executor.register_handler("*", |_job| JobOutcome::Failed("no luck".to_string()));

        let id = queue
            .enqueue(
                Job::new(JobKind::DocumentAcquisition, serde_json::json!({}))
                    .with_retry_policy(immediate_retries(2)),
            )
            .unwrap();

        let claimed = queue.claim_next().unwrap().unwrap();
        assert!(executor.execute_one(&claimed).is_err());
        assert_eq!(queue.status(id).unwrap().state, JobState::Waiting);

        let claimed = queue.claim_next().unwrap().unwrap();
        assert!(executor.execute_one(&claimed).is_err());
        assert_eq!(queue.status(id).unwrap().state, JobState::Failed);
    }

    #[test]
    fn missing_handler_counts_as_a_failed_attempt() {
        let queue = InMemoryJobQueue::arc(QueueConfig::default());
        let executor: JobExecutor<_> = JobExecutor::new(queue.clone());

        let id = queue
            .enqueue(
                Job::new(JobKind::custom("unknown"), serde_json::json!({}))
                    .with_retry_policy(immediate_retries(1)),
            )
            .unwrap();
        let claimed = queue.claim_next().unwrap().unwrap();
        assert!(executor.execute_one(&claimed).is_err());
        assert_eq!(queue.status(id).unwrap().state, JobState::Failed);
    }

    #[test]
    fn spawned_workers_drain_the_queue() {
        let queue = InMemoryJobQueue::arc(QueueConfig::default());
        let mut executor = JobExecutor::new(queue.clone());

        let processed = Arc::new(AtomicU32::new(0));
        let seen = processed.clone();
        executor.register_handler("acquisition.document", move |_job| {
            seen.fetch_add(1, Ordering::SeqCst);
            JobOutcome::Completed(serde_json::json!({}))
        });

        for _ in 0..5 {
            queue
                .enqueue(Job::new(JobKind::DocumentAcquisition, serde_json::json!({})))
                .unwrap();
        }

        let handle = executor.spawn(
            JobExecutorConfig::default()
                .with_name("test-exec")
                .with_workers(2),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while processed.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        handle.shutdown();

        assert_eq!(processed.load(Ordering::SeqCst), 5);
        assert_eq!(queue.stats().unwrap().completed, 5);
    }
}
