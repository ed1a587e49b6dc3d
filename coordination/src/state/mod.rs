//! Shared domain types for hierarchical coordination
//!
//! Every component speaks in these types:
//!
//! - `AgentLevel`: the five hierarchy levels (L1 specialists through L5 orchestrator)
//! - `WorkItem` / `WorkItemState`: the strictly sequential unit of work
//! - `CoordinationRequest` / `CoordinationResponse`: the per-report protocol
//! - `ConsensusSnapshot`: a full recomputation of per-level quorum scores
//! - `IntelligenceTrace`: the write-once record of a finished work item

pub mod types;

// Re-export core types
pub use types::{
    AgentId, AgentLevel, ConsensusSnapshot, CoordinationRequest, CoordinationResponse,
    CoordinationStatus, IntelligenceTrace, PatternDescriptor, Payload, PhaseStamp, RejectReason,
    TraceOutcome, WorkItem, WorkItemId, WorkItemState,
};
