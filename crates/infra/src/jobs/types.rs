//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job kind for routing to the appropriate handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Retrieve an invoice's official document from the tax portal.
    DocumentAcquisition,
    /// Generic/custom job.
    Custom { kind: String },
}

impl JobKind {
    pub fn custom(kind: impl Into<String>) -> Self {
        Self::Custom { kind: kind.into() }
    }

    pub fn type_name(&self) -> &str {
        match self {
            JobKind::DocumentAcquisition => "acquisition.document",
            JobKind::Custom { kind } => kind,
        }
    }
}

/// Job lifecycle state.
///
/// `Waiting → Active → {Completed | Failed}`; a failed attempt with retries
/// left goes back to `Waiting` with a backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Backoff kind for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackoffKind {
    /// Fixed delay between retries.
    Fixed,
    /// Exponential backoff: `base * 2^(n-1)` for attempt `n`.
    Exponential,
}

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub kind: BackoffKind,
    pub base_delay: Duration,
    /// Cap; backoff never schedules further out than this.
    pub max_delay: Duration,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed (first execution included).
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff {
                kind: BackoffKind::Exponential,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(300),
            },
        }
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff {
                kind: BackoffKind::Exponential,
                base_delay,
                max_delay: Duration::from_secs(300),
            },
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff {
                kind: BackoffKind::Fixed,
                base_delay: delay,
                max_delay: delay,
            },
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` attempts made
    /// (1-indexed: after the first failed attempt this is the base delay).
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.backoff.base_delay.as_millis() as u64;
        let max_ms = self.backoff.max_delay.as_millis() as u64;

        let delay_ms = match self.backoff.kind {
            BackoffKind::Fixed => base_ms,
            BackoffKind::Exponential => {
                let exp = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                base_ms.saturating_mul(exp)
            }
        };

        Duration::from_millis(delay_ms.min(max_ms))
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// An acquisition job as tracked by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// JSON payload; the handler owns its shape.
    pub payload: serde_json::Value,
    pub state: JobState,
    pub retry_policy: RetryPolicy,
    /// Number of attempts started so far.
    pub attempts_made: u32,
    pub last_failure_reason: Option<String>,
    /// Result reported by the handler on completion.
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time the next attempt may start (backoff schedule).
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Lease expiry while `Active`; an expired lease makes the job visible for
    /// redelivery (at-least-once).
    pub leased_until: Option<DateTime<Utc>>,
    /// Set when the job reaches a terminal state; drives retention reaping.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind,
            payload,
            state: JobState::Waiting,
            retry_policy: RetryPolicy::default(),
            attempts_made: 0,
            last_failure_reason: None,
            result: None,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            leased_until: None,
            finished_at: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Ready to execute: waiting and past any backoff schedule.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Waiting && self.scheduled_at.map_or(true, |at| now >= at)
    }

    /// An active job whose lease ran out; the worker is presumed dead and the
    /// job must become visible again.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active && self.leased_until.map_or(false, |until| now >= until)
    }

    /// Claim the job for one attempt under a lease.
    pub fn mark_active(&mut self, lease: Duration) {
        let now = Utc::now();
        self.state = JobState::Active;
        self.attempts_made += 1;
        self.leased_until = Some(now + chrono::Duration::from_std(lease).unwrap_or_default());
        self.scheduled_at = None;
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, result: serde_json::Value) {
        let now = Utc::now();
        self.state = JobState::Completed;
        self.result = Some(result);
        self.leased_until = None;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Record a failed attempt: schedule the next one under backoff, or settle
    /// terminally once attempts are exhausted.
    pub fn mark_failed(&mut self, reason: String) {
        let now = Utc::now();
        self.last_failure_reason = Some(reason);
        self.leased_until = None;
        self.updated_at = now;

        if self.retry_policy.allows_retry(self.attempts_made) {
            let delay = self.retry_policy.delay_after_attempt(self.attempts_made);
            self.scheduled_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            self.state = JobState::Waiting;
        } else {
            self.state = JobState::Failed;
            self.finished_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100));

        assert_eq!(policy.delay_after_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_backoff_respects_cap() {
        let policy = RetryPolicy {
            max_attempts: 20,
            backoff: Backoff {
                kind: BackoffKind::Exponential,
                base_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(60),
            },
        };

        assert_eq!(policy.delay_after_attempt(3), Duration::from_secs(40));
        assert_eq!(policy.delay_after_attempt(4), Duration::from_secs(60));
        assert_eq!(policy.delay_after_attempt(15), Duration::from_secs(60));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_after_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after_attempt(2), Duration::from_millis(500));
    }

    #[test]
    fn allows_retry_respects_max_attempts() {
        let policy = RetryPolicy::exponential(3, Duration::from_secs(1));

        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(!policy.allows_retry(4));
    }

    #[test]
    fn job_lifecycle_waiting_active_completed() {
        let mut job = Job::new(JobKind::DocumentAcquisition, serde_json::json!({}));
        assert_eq!(job.state, JobState::Waiting);
        assert!(job.is_ready(Utc::now()));

        job.mark_active(Duration::from_secs(120));
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.attempts_made, 1);
        assert!(job.leased_until.is_some());
        assert!(!job.lease_expired(Utc::now()));

        job.mark_completed(serde_json::json!({"ok": true}));
        assert_eq!(job.state, JobState::Completed);
        assert!(job.finished_at.is_some());
        assert!(job.leased_until.is_none());
    }

    #[test]
    fn failure_schedules_retry_then_settles_terminally() {
        let mut job = Job::new(JobKind::DocumentAcquisition, serde_json::json!({}))
            .with_retry_policy(RetryPolicy::exponential(2, Duration::from_secs(1)));

        job.mark_active(Duration::from_secs(120));
        job.mark_failed("portal down".to_string());
        assert_eq!(job.state, JobState::Waiting);
        assert!(job.scheduled_at.is_some());
        assert!(!job.is_ready(Utc::now()));

        job.mark_active(Duration::from_secs(120));
        job.mark_failed("portal still down".to_string());
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts_made, 2);
        assert_eq!(job.last_failure_reason.as_deref(), Some("portal still down"));
    }

    #[test]
    fn expired_lease_is_detected() {
        let mut job = Job::new(JobKind::DocumentAcquisition, serde_json::json!({}));
        job.mark_active(Duration::ZERO);
        assert!(job.lease_expired(Utc::now() + chrono::Duration::milliseconds(1)));
    }
}
