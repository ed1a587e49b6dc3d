//! Request and query bodies for the HTTP API

use serde::{Deserialize, Serialize};

use crate::state::{AgentId, AgentLevel, WorkItemId};

/// Default number of traces returned by `GET /traces` without a range
pub const DEFAULT_TRACE_LIMIT: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgentRequest {
    pub agent_id: AgentId,
    pub level: AgentLevel,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeregisterAgentRequest {
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueWorkItemRequest {
    #[serde(alias = "video_id")]
    pub work_item_id: WorkItemId,
    /// Overrides the configured phase list for this item
    #[serde(default)]
    pub phases: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsensusQuery {
    #[serde(default, alias = "video_id")]
    pub work_item_id: Option<WorkItemId>,
}

/// `from` and `to` select an inclusive range; without them the most recent
/// `limit` traces are returned.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceQuery {
    pub from: Option<WorkItemId>,
    pub to: Option<WorkItemId>,
    pub limit: Option<usize>,
}
