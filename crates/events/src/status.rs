//! Job status events and the notifier that fans them out.
//!
//! Events are ephemeral: they are pushed to whoever is connected at the moment
//! they fire and are never persisted. Connection and disconnection are logged,
//! nothing more; there is no per-observer history, replay or acknowledgment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::bus::{EventBus, Subscription};
use crate::in_memory_bus::InMemoryEventBus;

/// Lifecycle phase reported for an acquisition job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Active,
    Completed,
    Failed,
}

/// One broadcast status update for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub job_id: Uuid,
    pub state: JobPhase,
    /// Present on `completed` events: whatever the worker retrieved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Present on `failed` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn active(job_id: Uuid) -> Self {
        Self {
            job_id,
            state: JobPhase::Active,
            result: None,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    pub fn completed(job_id: Uuid, result: serde_json::Value) -> Self {
        Self {
            job_id,
            state: JobPhase::Completed,
            result: Some(result),
            reason: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(job_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            job_id,
            state: JobPhase::Failed,
            result: None,
            reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Fan-out notifier for job status events.
///
/// `broadcast` is fire-and-forget: a transport error means some observer went
/// away, which is exactly the situation the contract allows, so it is logged
/// at debug and swallowed.
pub struct StatusNotifier<B: EventBus<StatusEvent>> {
    bus: B,
}

/// The default in-process notifier.
pub type InProcessNotifier = StatusNotifier<InMemoryEventBus<StatusEvent>>;

impl InProcessNotifier {
    pub fn in_memory() -> Self {
        Self::new(InMemoryEventBus::new())
    }
}

impl<B: EventBus<StatusEvent>> StatusNotifier<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn broadcast(&self, event: StatusEvent) {
        info!(job_id = %event.job_id, state = ?event.state, "broadcasting job status");
        if let Err(e) = self.bus.publish(event) {
            debug!(error = ?e, "status broadcast dropped");
        }
    }

    /// Register an observer. Only the connection is logged; the observer gets
    /// no backlog and will miss anything broadcast before this call.
    pub fn subscribe(&self) -> Subscription<StatusEvent> {
        let observer = Uuid::now_v7();
        info!(%observer, "status observer connected");
        self.bus.subscribe()
    }
}
