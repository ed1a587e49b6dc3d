//! Core types for hierarchical coordination
//!
//! These types cross every component boundary: the registry records them,
//! the router and controller exchange them, the trace store persists them
//! and the HTTP layer serializes them verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for agents
pub type AgentId = String;

/// Unique identifier for work items (one video in the reference deployment)
pub type WorkItemId = String;

/// Opaque key/value payload reported by agents
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Level of an agent in the five-level hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgentLevel {
    /// Leaf specialists (landmarks, action units, audio features)
    #[serde(rename = "L1", alias = "L1_MICRO_AGENTS")]
    L1,
    /// Department aggregators
    #[serde(rename = "L2", alias = "L2_DEPARTMENT_MGR")]
    L2,
    /// Cross-domain integrators
    #[serde(rename = "L3", alias = "L3_DIVISION_CHIEF")]
    L3,
    /// Validators
    #[serde(rename = "L4", alias = "L4_EXECUTIVE")]
    L4,
    /// Orchestrator; the only level allowed to move the work item forward
    #[serde(rename = "L5", alias = "L5_CEO")]
    L5,
}

impl AgentLevel {
    /// All levels, leaves first
    pub fn all() -> &'static [AgentLevel] {
        &[
            AgentLevel::L1,
            AgentLevel::L2,
            AgentLevel::L3,
            AgentLevel::L4,
            AgentLevel::L5,
        ]
    }

    /// Levels that contribute to the overall consensus score
    pub fn gating() -> &'static [AgentLevel] {
        &[AgentLevel::L1, AgentLevel::L2, AgentLevel::L3, AgentLevel::L4]
    }

    pub fn is_gating(&self) -> bool {
        !matches!(self, AgentLevel::L5)
    }
}

impl std::fmt::Display for AgentLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentLevel::L1 => write!(f, "L1"),
            AgentLevel::L2 => write!(f, "L2"),
            AgentLevel::L3 => write!(f, "L3"),
            AgentLevel::L4 => write!(f, "L4"),
            AgentLevel::L5 => write!(f, "L5"),
        }
    }
}

/// Identifies one phase of one work item.
///
/// Agent contributions are stamped with this so that consensus only counts
/// reports made against the phase currently being evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhaseStamp {
    pub work_item_id: WorkItemId,
    pub phase_index: usize,
}

impl PhaseStamp {
    pub fn new(work_item_id: impl Into<WorkItemId>, phase_index: usize) -> Self {
        Self {
            work_item_id: work_item_id.into(),
            phase_index,
        }
    }
}

/// Lifecycle state of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkItemState {
    /// Queued behind the active item
    Pending,
    /// Holding the admission slot
    Active,
    /// All phases passed and the trace is durable
    Complete,
    /// Timed out, exhausted its validation budget, or was canceled
    Failed,
}

impl WorkItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkItemState::Complete | WorkItemState::Failed)
    }
}

/// A unit of strictly sequential work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique work item identifier
    pub id: WorkItemId,

    /// Ordered phase names, fixed at enqueue time
    pub phases: Vec<String>,

    /// Index into `phases` of the phase being processed
    pub phase_index: usize,

    /// Current lifecycle state
    pub state: WorkItemState,

    /// Enqueue timestamp
    pub created_at: DateTime<Utc>,

    /// Last transition timestamp
    pub updated_at: DateTime<Utc>,

    /// Why the item failed (if it did)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl WorkItem {
    /// Create a new pending work item
    pub fn new(id: impl Into<WorkItemId>, phases: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            phases,
            phase_index: 0,
            state: WorkItemState::Pending,
            created_at: now,
            updated_at: now,
            failure_reason: None,
        }
    }

    /// Name of the current phase
    pub fn current_phase(&self) -> Option<&str> {
        self.phases.get(self.phase_index).map(String::as_str)
    }

    pub fn is_terminal_phase(&self) -> bool {
        self.phase_index + 1 >= self.phases.len()
    }

    pub fn stamp(&self) -> PhaseStamp {
        PhaseStamp::new(self.id.clone(), self.phase_index)
    }

    pub(crate) fn transition(&mut self, state: WorkItemState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

/// Inbound report from one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationRequest {
    /// Work item the report belongs to
    #[serde(alias = "video_id")]
    pub work_item_id: WorkItemId,

    /// Phase the agent believes is current
    pub phase: String,

    /// Level the agent claims to operate at
    pub agent_level: AgentLevel,

    /// Reporting agent
    pub agent_id: AgentId,

    /// Opaque report body
    #[serde(default, alias = "message")]
    pub payload: Payload,

    /// Caller-supplied ID for response matching and idempotency
    pub correlation_id: String,

    /// Submission timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl CoordinationRequest {
    pub fn new(
        work_item_id: impl Into<WorkItemId>,
        phase: impl Into<String>,
        agent_level: AgentLevel,
        agent_id: impl Into<AgentId>,
        payload: Payload,
    ) -> Self {
        Self {
            work_item_id: work_item_id.into(),
            phase: phase.into(),
            agent_level,
            agent_id: agent_id.into(),
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// Outcome class of a coordination call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinationStatus {
    Coordinated,
    Rejected,
    Deferred,
}

/// Domain rejection codes. Always retryable once the caller corrects its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    UnknownAgent,
    LevelMismatch,
    StalePhase,
    NoActiveItem,
    ItemCanceled,
    ItemFailed,
    AlreadyFinalized,
    ConsensusNotMet,
}

impl RejectReason {
    /// Wire code
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::UnknownAgent => "UNKNOWN_AGENT",
            RejectReason::LevelMismatch => "LEVEL_MISMATCH",
            RejectReason::StalePhase => "STALE_PHASE",
            RejectReason::NoActiveItem => "NO_ACTIVE_ITEM",
            RejectReason::ItemCanceled => "ITEM_CANCELED",
            RejectReason::ItemFailed => "ITEM_FAILED",
            RejectReason::AlreadyFinalized => "ALREADY_FINALIZED",
            RejectReason::ConsensusNotMet => "CONSENSUS_NOT_MET",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Reply to a coordination call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationResponse {
    /// COORDINATED, REJECTED or DEFERRED
    pub status: CoordinationStatus,

    /// Echo of the request's correlation ID
    pub correlation_id: String,

    /// Rejection code (REJECTED only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,

    /// Ordered action tags the caller should perform next
    pub next_actions: Vec<String>,

    /// Downstream-level identifier -> instruction tag
    pub assignments: BTreeMap<String, String>,

    /// Level-specific response data
    #[serde(default)]
    pub data: Payload,

    /// Response timestamp
    pub timestamp: DateTime<Utc>,
}

impl CoordinationResponse {
    fn with_status(status: CoordinationStatus, correlation_id: &str) -> Self {
        Self {
            status,
            correlation_id: correlation_id.to_string(),
            reason: None,
            next_actions: Vec::new(),
            assignments: BTreeMap::new(),
            data: Payload::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn coordinated(correlation_id: &str) -> Self {
        Self::with_status(CoordinationStatus::Coordinated, correlation_id)
    }

    pub fn deferred(correlation_id: &str) -> Self {
        Self::with_status(CoordinationStatus::Deferred, correlation_id)
    }

    pub fn rejected(correlation_id: &str, reason: RejectReason) -> Self {
        let mut response = Self::with_status(CoordinationStatus::Rejected, correlation_id);
        response.reason = Some(reason);
        response
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.next_actions.push(action.to_string());
        self
    }

    pub fn with_assignment(mut self, target: impl Into<String>, instruction: &str) -> Self {
        self.assignments.insert(target.into(), instruction.to_string());
        self
    }

    pub fn with_data(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// Full, consistent consensus computation over the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSnapshot {
    /// Work item the snapshot was computed for
    pub work_item_id: WorkItemId,

    /// Phase the reports were counted against
    pub phase: String,

    /// Score per gating level (L1..L4), each in [0.0, 1.0]
    pub level_scores: BTreeMap<AgentLevel, f64>,

    /// Arithmetic mean of the gating level scores
    pub overall: f64,

    /// Threshold the overall score was compared against
    pub threshold: f64,

    /// Whether `overall` strictly exceeds `threshold`
    pub threshold_met: bool,

    /// Computation timestamp
    pub computed_at: DateTime<Utc>,
}

impl ConsensusSnapshot {
    /// Gating levels whose own score falls below the threshold
    pub fn shortfall(&self) -> Vec<AgentLevel> {
        self.level_scores
            .iter()
            .filter(|(_, score)| **score < self.threshold)
            .map(|(level, _)| *level)
            .collect()
    }
}

/// A single discovered pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDescriptor {
    /// Pattern class (e.g. "cross_modal", "micro_temporal")
    pub kind: String,

    /// Free-form description
    pub description: String,

    /// Confidence in [0.0, 1.0]
    pub confidence: f64,
}

impl PatternDescriptor {
    pub fn new(kind: impl Into<String>, description: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// How the work item behind a trace ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TraceOutcome {
    Completed,
    Failed { reason: String },
}

/// Immutable record of what one work item discovered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceTrace {
    /// Work item this trace belongs to
    pub work_item_id: WorkItemId,

    /// Append position in the trace log (assigned by the store)
    #[serde(default)]
    pub sequence: u64,

    /// Discovered patterns, in report order
    pub patterns: Vec<PatternDescriptor>,

    /// Completion or failure
    pub outcome: TraceOutcome,

    /// Last consensus snapshot for the item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusSnapshot>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl IntelligenceTrace {
    /// Trace for an item that passed every phase
    pub fn completed(
        work_item_id: impl Into<WorkItemId>,
        patterns: Vec<PatternDescriptor>,
        consensus: Option<ConsensusSnapshot>,
    ) -> Self {
        Self {
            work_item_id: work_item_id.into(),
            sequence: 0,
            patterns,
            outcome: TraceOutcome::Completed,
            consensus,
            created_at: Utc::now(),
        }
    }

    /// Minimal trace for an item that was failed or canceled
    pub fn degenerate(
        work_item_id: impl Into<WorkItemId>,
        reason: impl Into<String>,
        consensus: Option<ConsensusSnapshot>,
    ) -> Self {
        Self {
            work_item_id: work_item_id.into(),
            sequence: 0,
            patterns: Vec::new(),
            outcome: TraceOutcome::Failed {
                reason: reason.into(),
            },
            consensus,
            created_at: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, TraceOutcome::Failed { .. })
    }
}
