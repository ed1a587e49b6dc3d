//! Swarm Coordinator Library
//!
//! A hierarchical multi-agent coordination and consensus engine:
//! - Five-level agent hierarchy (L1 specialists up to the L5 orchestrator)
//! - Per-level routing of agent reports with assignment hints
//! - Quorum-style consensus gating phase advancement
//! - Strictly sequential work items with an append-only trace log
//!
//! # Components
//!
//! | Module        | Role                                                     |
//! |---------------|----------------------------------------------------------|
//! | `registry`    | Agents, levels, capabilities, last reports, staleness    |
//! | `traces`      | Durable append-only intelligence traces                  |
//! | `consensus`   | K/N quorum per level, mean over L1..L4                   |
//! | `router`      | Per-level state machine and idempotent replies           |
//! | `controller`  | Admission slot, phase cursor, deadlines, finalization    |
//! | `engine`      | Wires the above into one injectable context              |
//! | `api`         | HTTP/JSON binding (axum)                                 |
//!
//! # Usage
//!
//! ```bash
//! # Durable traces under ./.coordination-traces
//! swarm-coordinator --bind 127.0.0.1:8080
//!
//! # Volatile traces, custom config
//! swarm-coordinator --ephemeral --config coordination.toml
//!
//! # Environment overrides
//! COORDINATION_PHASE_TIMEOUT_SECS=60 RUST_LOG=swarm_coordinator=debug swarm-coordinator
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod config;
pub mod consensus;
pub mod controller;
pub mod engine;
pub mod events;
pub mod registry;
pub mod router;
pub mod state;
pub mod traces;

// Re-export key engine types
pub use config::{ConfigError, EngineConfig, DEFAULT_PHASES};
pub use engine::{Engine, EngineError, EngineResult, HealthReport, HealthStatus, SharedEngine};

// Re-export key component types
pub use consensus::ConsensusCalculator;
pub use controller::{ControllerError, ControllerResult, Progress, WorkController};
pub use registry::{AgentRegistry, AgentState, AgentStatus, RegistryError, RegistryResult};
pub use router::LevelRouter;
pub use traces::{MemoryTraceStore, RocksTraceStore, SharedTraceLog, TraceError, TraceLog};

// Re-export key state types
pub use state::{
    AgentLevel, ConsensusSnapshot, CoordinationRequest, CoordinationResponse, CoordinationStatus,
    IntelligenceTrace, PatternDescriptor, PhaseStamp, RejectReason, WorkItem, WorkItemState,
};

// Re-export key event types
pub use events::{EngineEvent, EventBus, FailureCause, SharedEventBus, WorkItemReceiver};
