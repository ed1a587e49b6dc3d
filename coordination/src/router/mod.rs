//! Level Router: per-level handling of coordination reports
//!
//! Every inbound report passes the same gate (known agent, matching level,
//! active item, current phase), is recorded in the registry against the
//! active phase, and is then dispatched on the agent's level:
//!
//! ```text
//! Level | On report                              | Next action
//! ------|----------------------------------------|---------------------------
//! L1    | mark contribution                      | await-aggregation
//! L2    | bounded wait for feeding L1 agents     | escalate / awaiting-inputs
//! L3    | attach per-level consensus scores      | integrate
//! L4    | run consensus against the threshold    | finalize-signature / REJECTED
//! L5    | advance the phase or complete the item | advance-phase / update-traces
//! ```
//!
//! Domain failures come back as `REJECTED` responses. Only storage failures
//! while completing an item escape as errors.
//!
//! The router is the only component that mutates the agent registry.

pub mod actions;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::consensus::{is_satisfactory, ConsensusCalculator};
use crate::controller::{ControllerError, ControllerResult, Progress, Validation, WorkController};
use crate::events::{EngineEvent, SharedEventBus};
use crate::registry::{AgentRegistry, AgentState, RegistryError, RegistryResult};
use crate::state::{
    AgentId, AgentLevel, ConsensusSnapshot, CoordinationRequest, CoordinationResponse,
    CoordinationStatus, Payload, PatternDescriptor, PhaseStamp, RejectReason, WorkItem,
    WorkItemId,
};
use crate::traces::SharedTraceLog;

/// (work item, phase, agent, correlation ID)
type ReplyKey = (WorkItemId, String, AgentId, String);

/// Routes coordination reports through the per-level state machine
pub struct LevelRouter {
    registry: Arc<AgentRegistry>,
    consensus: ConsensusCalculator,
    controller: Arc<WorkController>,
    traces: SharedTraceLog,
    events: SharedEventBus,
    replies: DashMap<ReplyKey, CoordinationResponse>,
    aggregation_wait: Duration,
    aggregation_poll: Duration,
    trace_lookback: usize,
}

impl LevelRouter {
    pub fn new(
        config: &EngineConfig,
        registry: Arc<AgentRegistry>,
        consensus: ConsensusCalculator,
        controller: Arc<WorkController>,
        traces: SharedTraceLog,
        events: SharedEventBus,
    ) -> Self {
        Self {
            registry,
            consensus,
            controller,
            traces,
            events,
            replies: DashMap::new(),
            aggregation_wait: config.aggregation_wait(),
            aggregation_poll: config.aggregation_poll(),
            trace_lookback: config.trace_lookback,
        }
    }

    // =========================================================================
    // Registry mutations
    // =========================================================================

    pub fn register_agent(
        &self,
        agent_id: impl Into<AgentId>,
        level: AgentLevel,
        capabilities: impl IntoIterator<Item = String>,
    ) -> RegistryResult<AgentState> {
        let state = self.registry.register(agent_id, level, capabilities)?;
        info!(agent_id = %state.agent_id, level = %level, "Agent registered");
        self.events.publish(EngineEvent::AgentRegistered {
            agent_id: state.agent_id.clone(),
            level,
            timestamp: chrono::Utc::now(),
        });
        Ok(state)
    }

    pub fn deregister_agent(&self, agent_id: &str) -> RegistryResult<AgentState> {
        let state = self.registry.deregister(agent_id)?;
        info!(agent_id, level = %state.level, "Agent deregistered");
        self.events.publish(EngineEvent::AgentDeregistered {
            agent_id: agent_id.to_string(),
            timestamp: chrono::Utc::now(),
        });
        Ok(state)
    }

    /// Mark idle agents stale
    pub fn sweep_stale(&self) -> usize {
        self.registry.sweep_stale()
    }

    /// Drop cached replies; called whenever the active item or its phase changes
    pub fn forget_replies(&self) {
        self.replies.clear();
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Route one coordination report
    pub async fn route(&self, request: CoordinationRequest) -> ControllerResult<CoordinationResponse> {
        if let Some(failed) = self.controller.enforce_deadlines().await {
            warn!(work_item_id = %failed.id, "Phase deadline passed; item failed");
            self.forget_replies();
        }

        let Some(agent) = self.registry.get(&request.agent_id) else {
            return Ok(self.reject(&request, RejectReason::UnknownAgent));
        };
        if agent.level != request.agent_level {
            return Ok(self.reject(&request, RejectReason::LevelMismatch));
        }

        if let Some(cached) = self.cached_reply(&request).await {
            debug!(
                agent_id = %request.agent_id,
                correlation_id = %request.correlation_id,
                "Replaying cached reply"
            );
            return Ok(cached);
        }

        let item = match self
            .controller
            .validate(&request.work_item_id, &request.phase)
            .await
        {
            Ok(item) => item,
            Err(ControllerError::Rejected(reason)) => return Ok(self.reject(&request, reason)),
            Err(e) => return Err(e),
        };

        let stamp = item.stamp();
        let agent = match self.registry.report_for_phase(
            &request.agent_id,
            stamp.clone(),
            request.payload.clone(),
        ) {
            Ok(agent) => agent,
            Err(RegistryError::UnknownAgent(_)) | Err(RegistryError::DuplicateAgent(_)) => {
                return Ok(self.reject(&request, RejectReason::UnknownAgent));
            }
        };

        self.controller
            .record_patterns(&item.id, patterns_from_payload(&request.payload))
            .await;

        let response = match request.agent_level {
            AgentLevel::L1 => self.route_leaf(&request, &agent),
            AgentLevel::L2 => self.route_aggregator(&request, &agent, &stamp).await,
            AgentLevel::L3 => self.route_integrator(&request, &stamp),
            AgentLevel::L4 => self.route_validator(&request, &item, &stamp).await,
            AgentLevel::L5 => self.route_orchestrator(&request, &item).await?,
        };

        // Reports below L4 do not move the cursor; make sure it did not move under them
        if request.agent_level < AgentLevel::L4 && response.status != CoordinationStatus::Rejected
        {
            if let Err(ControllerError::Rejected(reason)) = self
                .controller
                .validate(&request.work_item_id, &request.phase)
                .await
            {
                return Ok(self.reject(&request, reason));
            }
        }

        if response.status == CoordinationStatus::Coordinated {
            self.replies.insert(reply_key(&request), response.clone());
        }

        debug!(
            work_item_id = %request.work_item_id,
            agent_id = %request.agent_id,
            level = %request.agent_level,
            status = ?response.status,
            actions = ?response.next_actions,
            "Report routed"
        );
        Ok(response)
    }

    async fn cached_reply(&self, request: &CoordinationRequest) -> Option<CoordinationResponse> {
        if self.replies.is_empty() {
            return None;
        }
        let active = self.controller.current().await?;
        // Replays only within the phase they were issued for; older phases are stale
        if active.id != request.work_item_id
            || active.current_phase() != Some(request.phase.as_str())
        {
            return None;
        }
        self.replies
            .get(&reply_key(request))
            .map(|entry| entry.value().clone())
    }

    fn reject(&self, request: &CoordinationRequest, reason: RejectReason) -> CoordinationResponse {
        match reason {
            RejectReason::ConsensusNotMet | RejectReason::ItemFailed => warn!(
                work_item_id = %request.work_item_id,
                agent_id = %request.agent_id,
                phase = %request.phase,
                reason = %reason,
                "Report rejected"
            ),
            _ => debug!(
                work_item_id = %request.work_item_id,
                agent_id = %request.agent_id,
                phase = %request.phase,
                reason = %reason,
                "Report rejected"
            ),
        }
        CoordinationResponse::rejected(&request.correlation_id, reason)
    }

    /// L1: record and point the agent at its aggregators
    fn route_leaf(&self, request: &CoordinationRequest, agent: &AgentState) -> CoordinationResponse {
        let hot = self.hot_pattern_kinds();
        let mut response = CoordinationResponse::coordinated(&request.correlation_id)
            .with_action(actions::AWAIT_AGGREGATION);

        for capability in &agent.capabilities {
            let instruction = if hot.contains(capability) {
                actions::AGGREGATE_PRIORITIZED
            } else {
                actions::AGGREGATE
            };
            response = response.with_assignment(actions::aggregator_tag(capability), instruction);
        }
        response
    }

    /// Pattern kinds recent traces recorded with high confidence
    fn hot_pattern_kinds(&self) -> HashSet<String> {
        if self.trace_lookback == 0 {
            return HashSet::new();
        }
        match self.traces.recent(self.trace_lookback) {
            Ok(traces) => traces
                .iter()
                .flat_map(|trace| trace.patterns.iter())
                .filter(|p| p.confidence >= actions::PRIORITY_CONFIDENCE)
                .map(|p| p.kind.clone())
                .collect(),
            Err(e) => {
                warn!(error = %e, "Could not read recent traces; hints unbiased");
                HashSet::new()
            }
        }
    }

    /// L2: wait (bounded) for every feeding L1 agent to report
    async fn route_aggregator(
        &self,
        request: &CoordinationRequest,
        agent: &AgentState,
        stamp: &PhaseStamp,
    ) -> CoordinationResponse {
        let domains: HashSet<&str> = agent
            .capabilities
            .iter()
            .map(|c| actions::aggregator_domain(c))
            .collect();
        let deadline = Instant::now() + self.aggregation_wait;

        loop {
            let (expected, missing) = self.feeder_progress(&domains, stamp);
            if missing.is_empty() {
                return CoordinationResponse::coordinated(&request.correlation_id)
                    .with_action(actions::ESCALATE)
                    .with_assignment(AgentLevel::L3.to_string(), actions::INTEGRATE)
                    .with_data("feeders", expected);
            }
            if Instant::now() >= deadline {
                return CoordinationResponse::deferred(&request.correlation_id)
                    .with_action(actions::AWAITING_INPUTS)
                    .with_data("feeders", expected)
                    .with_data("missing", missing);
            }
            tokio::time::sleep(self.aggregation_poll).await;
        }
    }

    /// Feeding L1 agents for a set of domains: (expected count, IDs still missing)
    fn feeder_progress(&self, domains: &HashSet<&str>, stamp: &PhaseStamp) -> (usize, Vec<String>) {
        let feeders: Vec<AgentState> = self
            .registry
            .snapshot(AgentLevel::L1)
            .into_iter()
            .filter(|a| !a.is_stale())
            .filter(|a| a.capabilities.iter().any(|c| domains.contains(c.as_str())))
            .collect();

        let missing = feeders
            .iter()
            .filter(|a| !(a.contributed_to(stamp) && is_satisfactory(AgentLevel::L1, &a.last_payload)))
            .map(|a| a.agent_id.clone())
            .collect();
        (feeders.len(), missing)
    }

    /// L3: hand back the current per-level scores
    fn route_integrator(&self, request: &CoordinationRequest, stamp: &PhaseStamp) -> CoordinationResponse {
        let snapshot = self.consensus.compute(stamp, &request.phase);
        CoordinationResponse::coordinated(&request.correlation_id)
            .with_action(actions::INTEGRATE)
            .with_assignment(AgentLevel::L4.to_string(), actions::VALIDATE)
            .with_data("level_scores", level_scores(&snapshot))
            .with_data("overall", snapshot.overall)
            .with_data("threshold_met", snapshot.threshold_met)
    }

    /// L4: gate on consensus and count failures against the budget
    async fn route_validator(
        &self,
        request: &CoordinationRequest,
        item: &WorkItem,
        stamp: &PhaseStamp,
    ) -> CoordinationResponse {
        let snapshot = self.consensus.compute(stamp, &request.phase);

        let validation = match self.controller.record_validation(&snapshot).await {
            Ok(validation) => validation,
            Err(ControllerError::Rejected(reason)) => return self.reject(request, reason),
            Err(e) => {
                warn!(error = %e, "Validation not recorded");
                return self.reject(request, RejectReason::StalePhase);
            }
        };

        match validation {
            Validation::Passed => {
                let instruction = if item.is_terminal_phase() {
                    actions::COMPLETE
                } else {
                    actions::ADVANCE
                };
                CoordinationResponse::coordinated(&request.correlation_id)
                    .with_action(actions::FINALIZE_SIGNATURE)
                    .with_assignment(AgentLevel::L5.to_string(), instruction)
                    .with_data("level_scores", level_scores(&snapshot))
                    .with_data("overall", snapshot.overall)
            }
            Validation::Failed { failures } => {
                shortfall_response(request, &snapshot).with_data("validation_failures", failures)
            }
            Validation::BudgetExhausted { failed } => {
                self.forget_replies();
                shortfall_response(request, &snapshot)
                    .with_data("work_item_failed", failed.id)
            }
        }
    }

    /// L5: the only path that moves the work item forward
    async fn route_orchestrator(
        &self,
        request: &CoordinationRequest,
        item: &WorkItem,
    ) -> ControllerResult<CoordinationResponse> {
        let progress = if item.is_terminal_phase() {
            self.controller
                .complete_work_item(&item.id, &request.phase)
                .await
        } else {
            self.controller.advance_phase(&item.id, &request.phase).await
        };

        let response = match progress {
            Ok(Progress::Advanced { from, to, .. }) => {
                self.forget_replies();
                CoordinationResponse::coordinated(&request.correlation_id)
                    .with_action(actions::ADVANCE_PHASE)
                    .with_data("from_phase", from)
                    .with_data("phase", to)
            }
            Ok(Progress::Completed { trace, next }) => {
                self.forget_replies();
                CoordinationResponse::coordinated(&request.correlation_id)
                    .with_action(actions::UPDATE_TRACES)
                    .with_action(actions::ADVANCE_TO_NEXT_ITEM)
                    .with_data("trace_sequence", trace.sequence)
                    .with_data("patterns", trace.patterns.len())
                    .with_data("next_work_item", next.map(|n| n.id))
            }
            Ok(Progress::AwaitingConsensus(snapshot)) => {
                CoordinationResponse::deferred(&request.correlation_id)
                    .with_action(actions::AWAITING_CONSENSUS)
                    .with_data("overall", snapshot.overall)
                    .with_data("shortfall", shortfall_levels(&snapshot))
            }
            Err(ControllerError::Rejected(reason)) => self.reject(request, reason),
            Err(e @ ControllerError::Trace(_)) => return Err(e),
            // Cursor moved between validation and this call
            Err(_) => self.reject(request, RejectReason::StalePhase),
        };
        Ok(response)
    }
}

fn reply_key(request: &CoordinationRequest) -> ReplyKey {
    (
        request.work_item_id.clone(),
        request.phase.clone(),
        request.agent_id.clone(),
        request.correlation_id.clone(),
    )
}

fn level_scores(snapshot: &ConsensusSnapshot) -> Value {
    Value::Object(
        snapshot
            .level_scores
            .iter()
            .map(|(level, score)| (level.to_string(), Value::from(*score)))
            .collect(),
    )
}

fn shortfall_levels(snapshot: &ConsensusSnapshot) -> Vec<String> {
    snapshot
        .shortfall()
        .into_iter()
        .map(|level| level.to_string())
        .collect()
}

fn shortfall_response(request: &CoordinationRequest, snapshot: &ConsensusSnapshot) -> CoordinationResponse {
    CoordinationResponse::rejected(&request.correlation_id, RejectReason::ConsensusNotMet)
        .with_data("shortfall", shortfall_levels(snapshot))
        .with_data("level_scores", level_scores(snapshot))
        .with_data("overall", snapshot.overall)
        .with_data("threshold", snapshot.threshold)
}

#[derive(Deserialize)]
struct PatternReport {
    kind: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    confidence: f64,
}

/// Patterns an agent attached to its report under `patterns`
pub fn patterns_from_payload(payload: &Payload) -> Vec<PatternDescriptor> {
    let Some(raw) = payload.get("patterns") else {
        return Vec::new();
    };
    match serde_json::from_value::<Vec<PatternReport>>(raw.clone()) {
        Ok(reports) => reports
            .into_iter()
            .map(|r| PatternDescriptor::new(r.kind, r.description, r.confidence))
            .collect(),
        Err(e) => {
            debug!(error = %e, "Ignoring malformed patterns");
            Vec::new()
        }
    }
}
