//! Sequential Work Controller: the admission slot and phase cursor
//!
//! Owns every work item's lifecycle: `PENDING -> ACTIVE -> {COMPLETE | FAILED}`.
//! A single `tokio::sync::Mutex` guards the active slot, the pending queue and
//! the finished ledger together. This is the only global serialization point
//! in the engine; registry and trace store operations never take it except
//! when finalizing an item.
//!
//! # Failure paths
//!
//! - **Deadline**: the current phase outlives `phase_timeout`.
//! - **Validation budget**: L4 reports below-threshold consensus too often in
//!   one phase.
//! - **Cancellation**: operator request.
//!
//! All three release the slot, record a degenerate trace carrying the last
//! consensus snapshot, and admit the next pending item. A storage failure
//! while completing an item is the opposite case: it propagates and the item
//! stays ACTIVE so the orchestrator can retry.
//!
//! Trace appends are synced writes and run on the blocking pool. Only the
//! newest `finished_retention` finished items stay in memory; older ones are
//! answered from the trace store.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::consensus::ConsensusCalculator;
use crate::events::{EngineEvent, FailureCause, SharedEventBus};
use crate::state::{
    ConsensusSnapshot, IntelligenceTrace, PatternDescriptor, RejectReason, TraceOutcome, WorkItem,
    WorkItemId, WorkItemState,
};
use crate::traces::{SharedTraceLog, TraceError, TraceResult};

/// Error type for controller operations
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Work item already known: {0}")]
    DuplicateWorkItem(WorkItemId),

    #[error("Work item not found: {0}")]
    WorkItemNotFound(WorkItemId),

    #[error("Invalid phase list: {0}")]
    InvalidPhases(String),

    #[error("Phase {0} is the terminal phase; complete the item instead")]
    TerminalPhase(String),

    #[error("Phase {0} is not the terminal phase; advance it instead")]
    NotTerminalPhase(String),

    #[error("Rejected: {0}")]
    Rejected(RejectReason),

    #[error("Trace store error: {0}")]
    Trace(#[from] TraceError),
}

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Outcome of an orchestrator-driven phase transition
#[derive(Debug, Clone)]
pub enum Progress {
    /// The cursor moved forward one phase
    Advanced {
        item: WorkItem,
        from: String,
        to: String,
    },
    /// Terminal phase passed; trace recorded and the slot handed on
    Completed {
        trace: IntelligenceTrace,
        next: Option<WorkItem>,
    },
    /// Threshold not met yet; nothing changed
    AwaitingConsensus(ConsensusSnapshot),
}

/// Outcome of recording a validator consensus check
#[derive(Debug, Clone)]
pub enum Validation {
    Passed,
    Failed { failures: u32 },
    /// The item was failed and the slot released
    BudgetExhausted { failed: WorkItem },
}

struct ActiveItem {
    item: WorkItem,
    phase_started: Instant,
    validation_failures: u32,
    patterns: Vec<PatternDescriptor>,
    last_snapshot: Option<ConsensusSnapshot>,
}

impl ActiveItem {
    fn admit(mut item: WorkItem) -> Self {
        item.transition(WorkItemState::Active);
        Self {
            item,
            phase_started: Instant::now(),
            validation_failures: 0,
            patterns: Vec::new(),
            last_snapshot: None,
        }
    }
}

struct Finished {
    item: WorkItem,
    cause: Option<FailureCause>,
    last_snapshot: Option<ConsensusSnapshot>,
}

#[derive(Default)]
struct ControllerState {
    active: Option<ActiveItem>,
    pending: VecDeque<WorkItem>,
    finished: HashMap<WorkItemId, Finished>,
    /// Finish order, oldest first
    finished_order: VecDeque<WorkItemId>,
    last_outcome: Option<WorkItemState>,
}

impl ControllerState {
    fn knows(&self, id: &str) -> bool {
        self.active.as_ref().is_some_and(|a| a.item.id == id)
            || self.pending.iter().any(|p| p.id == id)
            || self.finished.contains_key(id)
    }

    fn retire(&mut self, finished: Finished, retention: usize) {
        let id = finished.item.id.clone();
        if self.finished.insert(id.clone(), finished).is_none() {
            self.finished_order.push_back(id);
        }
        while self.finished_order.len() > retention {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
    }
}

/// Sequential work controller
pub struct WorkController {
    state: Mutex<ControllerState>,
    consensus: ConsensusCalculator,
    traces: SharedTraceLog,
    events: SharedEventBus,
    default_phases: Vec<String>,
    phase_timeout: Duration,
    max_validation_failures: u32,
    finished_retention: usize,
}

impl WorkController {
    pub fn new(
        config: &EngineConfig,
        consensus: ConsensusCalculator,
        traces: SharedTraceLog,
        events: SharedEventBus,
    ) -> Self {
        Self {
            state: Mutex::new(ControllerState::default()),
            consensus,
            traces,
            events,
            default_phases: config.phases.clone(),
            phase_timeout: config.phase_timeout(),
            max_validation_failures: config.max_validation_failures,
            finished_retention: config.finished_retention,
        }
    }

    /// Queue a work item; it is admitted at once if the slot is free.
    ///
    /// IDs already seen by this controller or present in the trace store are
    /// rejected.
    pub async fn enqueue(
        &self,
        work_item_id: impl Into<WorkItemId>,
        phases: Option<Vec<String>>,
    ) -> ControllerResult<WorkItem> {
        let work_item_id = work_item_id.into();
        let phases = phases.unwrap_or_else(|| self.default_phases.clone());
        validate_phases(&phases)?;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.knows(&work_item_id) || self.traces.contains(&work_item_id) {
            return Err(ControllerError::DuplicateWorkItem(work_item_id));
        }

        let item = WorkItem::new(work_item_id.clone(), phases);
        state.pending.push_back(item.clone());
        self.events.publish(EngineEvent::WorkItemEnqueued {
            work_item_id: work_item_id.clone(),
            position: state.pending.len(),
            timestamp: Utc::now(),
        });
        info!(work_item_id = %work_item_id, pending = state.pending.len(), "Work item enqueued");

        if state.active.is_none() {
            if let Some(admitted) = self.admit_next(state) {
                return Ok(admitted);
            }
        }
        Ok(item)
    }

    /// The ACTIVE item, if any
    pub async fn current(&self) -> Option<WorkItem> {
        self.state
            .lock()
            .await
            .active
            .as_ref()
            .map(|a| a.item.clone())
    }

    /// Any item this controller knows about, in its latest state
    pub async fn get(&self, work_item_id: &str) -> Option<WorkItem> {
        let state = self.state.lock().await;
        if let Some(active) = state.active.as_ref().filter(|a| a.item.id == work_item_id) {
            return Some(active.item.clone());
        }
        if let Some(pending) = state.pending.iter().find(|p| p.id == work_item_id) {
            return Some(pending.clone());
        }
        state.finished.get(work_item_id).map(|f| f.item.clone())
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Final state of the most recently finished item
    pub async fn last_outcome(&self) -> Option<WorkItemState> {
        self.state.lock().await.last_outcome
    }

    /// Check that a request targets the active item's current phase.
    ///
    /// Returns a copy of the active item on success.
    pub async fn validate(&self, work_item_id: &str, phase: &str) -> ControllerResult<WorkItem> {
        let state = self.state.lock().await;
        self.check(&state, work_item_id, phase)?;
        state
            .active
            .as_ref()
            .map(|a| a.item.clone())
            .ok_or(ControllerError::Rejected(RejectReason::NoActiveItem))
    }

    fn check(&self, state: &ControllerState, work_item_id: &str, phase: &str) -> ControllerResult<()> {
        match &state.active {
            // Unknown names and earlier or later phases are all stale
            Some(active) if active.item.id == work_item_id => {
                if active.item.current_phase() == Some(phase) {
                    Ok(())
                } else {
                    Err(ControllerError::Rejected(RejectReason::StalePhase))
                }
            }
            _ => Err(ControllerError::Rejected(
                self.inactive_reason(state, work_item_id),
            )),
        }
    }

    fn inactive_reason(&self, state: &ControllerState, work_item_id: &str) -> RejectReason {
        match state.finished.get(work_item_id) {
            Some(Finished {
                cause: Some(FailureCause::Canceled),
                ..
            }) => RejectReason::ItemCanceled,
            Some(Finished { cause: Some(_), .. }) => RejectReason::ItemFailed,
            Some(Finished { cause: None, .. }) => RejectReason::AlreadyFinalized,
            None => self.traced_reason(work_item_id),
        }
    }

    /// Reason for an item known only to the trace store
    fn traced_reason(&self, work_item_id: &str) -> RejectReason {
        match self.traces.query(work_item_id) {
            Ok(trace) => match trace.outcome {
                TraceOutcome::Completed => RejectReason::AlreadyFinalized,
                TraceOutcome::Failed { reason } if reason == FailureCause::Canceled.to_string() => {
                    RejectReason::ItemCanceled
                }
                TraceOutcome::Failed { .. } => RejectReason::ItemFailed,
            },
            Err(TraceError::NotFound(_)) => RejectReason::NoActiveItem,
            Err(e) => {
                warn!(work_item_id, error = %e, "Trace lookup failed");
                RejectReason::NoActiveItem
            }
        }
    }

    /// Synced append, run on the blocking pool
    async fn append_trace(&self, trace: IntelligenceTrace) -> TraceResult<IntelligenceTrace> {
        let traces = self.traces.clone();
        tokio::task::spawn_blocking(move || traces.append(trace))
            .await
            .map_err(|e| TraceError::Storage(format!("trace writer task failed: {e}")))?
    }

    /// Accumulate discovered patterns for the active item
    pub async fn record_patterns(&self, work_item_id: &str, patterns: Vec<PatternDescriptor>) {
        if patterns.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        if let Some(active) = state.active.as_mut().filter(|a| a.item.id == work_item_id) {
            active.patterns.extend(patterns);
        }
    }

    /// Record a validator's consensus check against the validation budget
    pub async fn record_validation(
        &self,
        snapshot: &ConsensusSnapshot,
    ) -> ControllerResult<Validation> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.check(state, &snapshot.work_item_id, &snapshot.phase)?;

        let Some(active) = state.active.as_mut() else {
            return Err(ControllerError::Rejected(RejectReason::NoActiveItem));
        };
        active.last_snapshot = Some(snapshot.clone());

        if snapshot.threshold_met {
            return Ok(Validation::Passed);
        }

        active.validation_failures += 1;
        let failures = active.validation_failures;
        warn!(
            work_item_id = %snapshot.work_item_id,
            phase = %snapshot.phase,
            overall = snapshot.overall,
            failures,
            "Consensus below threshold"
        );
        self.events.publish(EngineEvent::ValidationFailed {
            work_item_id: snapshot.work_item_id.clone(),
            phase: snapshot.phase.clone(),
            overall: snapshot.overall,
            failures,
            timestamp: Utc::now(),
        });

        if failures >= self.max_validation_failures {
            if let Some(failed) = self.fail_active(state, FailureCause::ValidationBudget).await {
                return Ok(Validation::BudgetExhausted { failed });
            }
        }
        Ok(Validation::Failed { failures })
    }

    /// Move the active item from `phase` to the next one if consensus holds
    pub async fn advance_phase(&self, work_item_id: &str, phase: &str) -> ControllerResult<Progress> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.check(state, work_item_id, phase)?;

        let Some(active) = state.active.as_mut() else {
            return Err(ControllerError::Rejected(RejectReason::NoActiveItem));
        };
        if active.item.is_terminal_phase() {
            return Err(ControllerError::TerminalPhase(phase.to_string()));
        }

        let snapshot = self.consensus.compute(&active.item.stamp(), phase);
        active.last_snapshot = Some(snapshot.clone());
        if !snapshot.threshold_met {
            return Ok(Progress::AwaitingConsensus(snapshot));
        }

        active.item.phase_index += 1;
        active.item.updated_at = Utc::now();
        active.phase_started = Instant::now();
        active.validation_failures = 0;

        let from = phase.to_string();
        let to = active.item.current_phase().unwrap_or_default().to_string();
        info!(work_item_id, from = %from, to = %to, "Phase advanced");
        self.events.publish(EngineEvent::PhaseAdvanced {
            work_item_id: work_item_id.to_string(),
            from: from.clone(),
            to: to.clone(),
            timestamp: Utc::now(),
        });

        Ok(Progress::Advanced {
            item: active.item.clone(),
            from,
            to,
        })
    }

    /// Finalize the active item at its terminal phase.
    ///
    /// The trace is appended before the item is marked COMPLETE. If the
    /// append fails the item stays ACTIVE and the error is returned.
    pub async fn complete_work_item(
        &self,
        work_item_id: &str,
        phase: &str,
    ) -> ControllerResult<Progress> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.check(state, work_item_id, phase)?;

        let Some(active) = state.active.as_mut() else {
            return Err(ControllerError::Rejected(RejectReason::NoActiveItem));
        };
        if !active.item.is_terminal_phase() {
            return Err(ControllerError::NotTerminalPhase(phase.to_string()));
        }

        let snapshot = self.consensus.compute(&active.item.stamp(), phase);
        active.last_snapshot = Some(snapshot.clone());
        if !snapshot.threshold_met {
            return Ok(Progress::AwaitingConsensus(snapshot));
        }

        let trace = IntelligenceTrace::completed(
            work_item_id,
            active.patterns.clone(),
            Some(snapshot),
        );
        let trace = match self.append_trace(trace).await {
            Ok(stored) => stored,
            Err(TraceError::AlreadyFinalized(_)) => {
                return Err(ControllerError::Rejected(RejectReason::AlreadyFinalized));
            }
            Err(e) => {
                error!(work_item_id, error = %e, "Trace append failed; item stays active");
                return Err(e.into());
            }
        };

        // The lock was held across the append, so the slot cannot have changed
        let Some(mut done) = state.active.take() else {
            return Err(ControllerError::Rejected(RejectReason::NoActiveItem));
        };
        done.item.transition(WorkItemState::Complete);
        info!(
            work_item_id,
            sequence = trace.sequence,
            patterns = trace.patterns.len(),
            "Work item complete"
        );
        self.events.publish(EngineEvent::WorkItemCompleted {
            work_item_id: work_item_id.to_string(),
            sequence: trace.sequence,
            timestamp: Utc::now(),
        });
        state.retire(
            Finished {
                item: done.item,
                cause: None,
                last_snapshot: done.last_snapshot,
            },
            self.finished_retention,
        );
        state.last_outcome = Some(WorkItemState::Complete);

        let next = self.admit_next(state);
        Ok(Progress::Completed { trace, next })
    }

    /// Cancel a pending or active item
    pub async fn cancel_work_item(&self, work_item_id: &str) -> ControllerResult<WorkItem> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.active.as_ref().is_some_and(|a| a.item.id == work_item_id) {
            return self
                .fail_active(state, FailureCause::Canceled)
                .await
                .ok_or_else(|| ControllerError::WorkItemNotFound(work_item_id.to_string()));
        }

        if let Some(pos) = state.pending.iter().position(|p| p.id == work_item_id) {
            let Some(mut item) = state.pending.remove(pos) else {
                return Err(ControllerError::WorkItemNotFound(work_item_id.to_string()));
            };
            item.failure_reason = Some(FailureCause::Canceled.to_string());
            item.transition(WorkItemState::Failed);
            info!(work_item_id, "Pending work item canceled");
            self.events.publish(EngineEvent::WorkItemFailed {
                work_item_id: work_item_id.to_string(),
                cause: FailureCause::Canceled,
                timestamp: Utc::now(),
            });
            state.retire(
                Finished {
                    item: item.clone(),
                    cause: Some(FailureCause::Canceled),
                    last_snapshot: None,
                },
                self.finished_retention,
            );
            return Ok(item);
        }

        if state.finished.contains_key(work_item_id) || self.traces.contains(work_item_id) {
            return Err(ControllerError::Rejected(
                self.inactive_reason(state, work_item_id),
            ));
        }
        Err(ControllerError::WorkItemNotFound(work_item_id.to_string()))
    }

    /// Fail the active item if its current phase is past the deadline
    pub async fn enforce_deadlines(&self) -> Option<WorkItem> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let overdue = state
            .active
            .as_ref()
            .is_some_and(|a| a.phase_started.elapsed() > self.phase_timeout);
        if !overdue {
            return None;
        }
        self.fail_active(state, FailureCause::Timeout).await
    }

    /// Consensus for the named item, or the active one.
    ///
    /// The active item is recomputed; finished items report their last
    /// recorded snapshot.
    pub async fn consensus(&self, work_item_id: Option<&str>) -> ControllerResult<ConsensusSnapshot> {
        let state = self.state.lock().await;

        if let Some(active) = state
            .active
            .as_ref()
            .filter(|a| work_item_id.map_or(true, |id| id == a.item.id))
        {
            let phase = active.item.current_phase().unwrap_or_default();
            return Ok(self.consensus.compute(&active.item.stamp(), phase));
        }

        let Some(id) = work_item_id else {
            return Err(ControllerError::Rejected(RejectReason::NoActiveItem));
        };
        if let Some(finished) = state.finished.get(id) {
            return finished
                .last_snapshot
                .clone()
                .ok_or_else(|| ControllerError::WorkItemNotFound(id.to_string()));
        }
        if state.pending.iter().any(|p| p.id == id) {
            return Err(ControllerError::Rejected(RejectReason::NoActiveItem));
        }
        drop(state);

        match self.traces.query(id) {
            Ok(trace) => trace
                .consensus
                .ok_or_else(|| ControllerError::WorkItemNotFound(id.to_string())),
            Err(TraceError::NotFound(_)) => Err(ControllerError::WorkItemNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn fail_active(
        &self,
        state: &mut ControllerState,
        cause: FailureCause,
    ) -> Option<WorkItem> {
        let mut active = state.active.take()?;
        let work_item_id = active.item.id.clone();
        let reason = cause.to_string();

        active.item.failure_reason = Some(reason.clone());
        active.item.transition(WorkItemState::Failed);
        warn!(
            work_item_id = %work_item_id,
            phase = active.item.current_phase().unwrap_or_default(),
            cause = %cause,
            "Work item failed"
        );

        let snapshot = active.last_snapshot.clone().or_else(|| {
            let phase = active.item.current_phase().unwrap_or_default();
            Some(self.consensus.compute(&active.item.stamp(), phase))
        });
        let trace = IntelligenceTrace::degenerate(work_item_id.clone(), reason, snapshot.clone());
        if let Err(e) = self.append_trace(trace).await {
            error!(work_item_id = %work_item_id, error = %e, "Failed to record failure trace");
        }

        self.events.publish(EngineEvent::WorkItemFailed {
            work_item_id,
            cause,
            timestamp: Utc::now(),
        });
        state.retire(
            Finished {
                item: active.item.clone(),
                cause: Some(cause),
                last_snapshot: snapshot,
            },
            self.finished_retention,
        );
        state.last_outcome = Some(WorkItemState::Failed);

        self.admit_next(state);
        Some(active.item)
    }

    fn admit_next(&self, state: &mut ControllerState) -> Option<WorkItem> {
        if state.active.is_some() {
            return None;
        }
        let next = state.pending.pop_front()?;
        let active = ActiveItem::admit(next);
        let item = active.item.clone();

        info!(work_item_id = %item.id, phases = item.phases.len(), "Work item admitted");
        self.events.publish(EngineEvent::WorkItemAdmitted {
            work_item_id: item.id.clone(),
            timestamp: Utc::now(),
        });
        state.active = Some(active);
        Some(item)
    }
}

fn validate_phases(phases: &[String]) -> ControllerResult<()> {
    if phases.is_empty() {
        return Err(ControllerError::InvalidPhases("no phases".into()));
    }
    let mut seen = HashSet::new();
    for phase in phases {
        if !seen.insert(phase.as_str()) {
            return Err(ControllerError::InvalidPhases(format!(
                "duplicate phase: {phase}"
            )));
        }
    }
    Ok(())
}
