//! Event types for engine lifecycle notifications

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{AgentId, AgentLevel, WorkItemId};

/// Everything the engine announces on its bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// An agent joined the registry
    AgentRegistered {
        agent_id: AgentId,
        level: AgentLevel,
        timestamp: DateTime<Utc>,
    },

    /// An agent left the registry
    AgentDeregistered {
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },

    /// A work item was accepted into the queue
    WorkItemEnqueued {
        work_item_id: WorkItemId,
        position: usize,
        timestamp: DateTime<Utc>,
    },

    /// A work item took the admission slot
    WorkItemAdmitted {
        work_item_id: WorkItemId,
        timestamp: DateTime<Utc>,
    },

    /// The active item moved to its next phase
    PhaseAdvanced {
        work_item_id: WorkItemId,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// Validators reported consensus below threshold
    ValidationFailed {
        work_item_id: WorkItemId,
        phase: String,
        overall: f64,
        failures: u32,
        timestamp: DateTime<Utc>,
    },

    /// All phases passed and the trace was recorded
    WorkItemCompleted {
        work_item_id: WorkItemId,
        sequence: u64,
        timestamp: DateTime<Utc>,
    },

    /// The item was failed or canceled
    WorkItemFailed {
        work_item_id: WorkItemId,
        cause: FailureCause,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EngineEvent::AgentRegistered { timestamp, .. } => *timestamp,
            EngineEvent::AgentDeregistered { timestamp, .. } => *timestamp,
            EngineEvent::WorkItemEnqueued { timestamp, .. } => *timestamp,
            EngineEvent::WorkItemAdmitted { timestamp, .. } => *timestamp,
            EngineEvent::PhaseAdvanced { timestamp, .. } => *timestamp,
            EngineEvent::ValidationFailed { timestamp, .. } => *timestamp,
            EngineEvent::WorkItemCompleted { timestamp, .. } => *timestamp,
            EngineEvent::WorkItemFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::AgentRegistered { .. } => "agent_registered",
            EngineEvent::AgentDeregistered { .. } => "agent_deregistered",
            EngineEvent::WorkItemEnqueued { .. } => "work_item_enqueued",
            EngineEvent::WorkItemAdmitted { .. } => "work_item_admitted",
            EngineEvent::PhaseAdvanced { .. } => "phase_advanced",
            EngineEvent::ValidationFailed { .. } => "validation_failed",
            EngineEvent::WorkItemCompleted { .. } => "work_item_completed",
            EngineEvent::WorkItemFailed { .. } => "work_item_failed",
        }
    }

    /// Get the work item ID if this event is item-scoped
    pub fn work_item_id(&self) -> Option<&str> {
        match self {
            EngineEvent::WorkItemEnqueued { work_item_id, .. } => Some(work_item_id.as_str()),
            EngineEvent::WorkItemAdmitted { work_item_id, .. } => Some(work_item_id.as_str()),
            EngineEvent::PhaseAdvanced { work_item_id, .. } => Some(work_item_id.as_str()),
            EngineEvent::ValidationFailed { work_item_id, .. } => Some(work_item_id.as_str()),
            EngineEvent::WorkItemCompleted { work_item_id, .. } => Some(work_item_id.as_str()),
            EngineEvent::WorkItemFailed { work_item_id, .. } => Some(work_item_id.as_str()),
            _ => None,
        }
    }
}

/// Why a work item left the admission slot without completing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// A phase outlived its deadline
    Timeout,
    /// Too many below-threshold validations
    ValidationBudget,
    /// Operator cancellation
    Canceled,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Timeout => write!(f, "timeout"),
            FailureCause::ValidationBudget => write!(f, "validation_budget_exhausted"),
            FailureCause::Canceled => write!(f, "canceled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::PhaseAdvanced {
            work_item_id: "V1".to_string(),
            from: "horizontal-analysis".to_string(),
            to: "department-synthesis".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "phase_advanced");

        let parsed: EngineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.event_type(), "phase_advanced");
        assert_eq!(parsed.work_item_id(), Some("V1"));
    }

    #[test]
    fn test_agent_events_are_not_item_scoped() {
        let event = EngineEvent::AgentDeregistered {
            agent_id: "au-12".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.work_item_id(), None);
    }

    #[test]
    fn test_failure_cause_display() {
        assert_eq!(FailureCause::Canceled.to_string(), "canceled");
        assert_eq!(
            FailureCause::ValidationBudget.to_string(),
            "validation_budget_exhausted"
        );
    }
}
