//! `facturo-events` — best-effort status broadcasting.
//!
//! A small pub/sub layer: the generic bus mechanics in [`bus`], an in-memory
//! fan-out implementation in [`in_memory_bus`], and the job status event model
//! plus notifier in [`status`].

pub mod bus;
pub mod in_memory_bus;
pub mod status;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use status::{InProcessNotifier, JobPhase, StatusEvent, StatusNotifier};
