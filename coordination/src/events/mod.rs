//! Engine event stream
//!
//! Lifecycle notifications (agent membership, admission, phase movement,
//! validation failures, completion) published on a tokio broadcast bus.
//! Events are informational only: no engine decision depends on a
//! subscriber, and nothing is persisted.
//!
//! # Usage
//!
//! ```ignore
//! use swarm_coordinator::events::{EngineEvent, EventBus};
//!
//! let bus = EventBus::new().shared();
//! let mut receiver = bus.subscribe();
//! while let Ok(event) = receiver.recv().await {
//!     tracing::info!(event = event.event_type(), "engine event");
//! }
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, SharedEventBus, WorkItemReceiver};
pub use types::{EngineEvent, FailureCause};
