//! Engine context: wires the registry, trace store, consensus calculator,
//! router and controller into one explicitly constructed value.
//!
//! There is no process-wide instance: tests build as many independent
//! engines as they like, each with its own trace backend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::consensus::ConsensusCalculator;
use crate::controller::{ControllerError, WorkController};
use crate::events::{EngineEvent, EventBus, SharedEventBus, WorkItemReceiver};
use crate::registry::{AgentRegistry, AgentState, RegistryError};
use crate::router::LevelRouter;
use crate::state::{
    AgentLevel, ConsensusSnapshot, CoordinationRequest, CoordinationResponse, IntelligenceTrace,
    WorkItem, WorkItemId, WorkItemState,
};
use crate::traces::{MemoryTraceStore, RocksTraceStore, SharedTraceLog, TraceError};

/// Umbrella error for engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Shared reference to an Engine
pub type SharedEngine = Arc<Engine>;

/// Overall engine condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Point-in-time health summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub registered_agents: usize,
    pub stale_agents: usize,
    pub active_work_item: Option<WorkItemId>,
    pub pending_work_items: usize,
    pub traces_recorded: usize,
    pub timestamp: DateTime<Utc>,
}

/// The coordination engine
pub struct Engine {
    config: EngineConfig,
    registry: Arc<AgentRegistry>,
    traces: SharedTraceLog,
    controller: Arc<WorkController>,
    router: LevelRouter,
    events: SharedEventBus,
}

impl Engine {
    /// Engine with a durable RocksDB trace store at `config.trace_path`
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        let store = RocksTraceStore::open(&config.trace_path)?;
        Self::with_trace_log(config, Arc::new(store))
    }

    /// Engine with a volatile trace store
    pub fn in_memory(config: EngineConfig) -> EngineResult<Self> {
        Self::with_trace_log(config, Arc::new(MemoryTraceStore::new()))
    }

    /// Engine over an arbitrary trace backend
    pub fn with_trace_log(config: EngineConfig, traces: SharedTraceLog) -> EngineResult<Self> {
        config.validate()?;

        let events = EventBus::new().shared();
        let registry = Arc::new(AgentRegistry::new(config.idle_window()));
        let consensus = ConsensusCalculator::new(registry.clone(), config.consensus_threshold);
        let controller = Arc::new(WorkController::new(
            &config,
            consensus.clone(),
            traces.clone(),
            events.clone(),
        ));
        let router = LevelRouter::new(
            &config,
            registry.clone(),
            consensus,
            controller.clone(),
            traces.clone(),
            events.clone(),
        );

        info!(
            phases = config.phases.len(),
            threshold = config.consensus_threshold,
            traces = traces.len(),
            "Coordination engine ready"
        );

        Ok(Self {
            config,
            registry,
            traces,
            controller,
            router,
            events,
        })
    }

    /// Create a shared reference to this engine
    pub fn shared(self) -> SharedEngine {
        Arc::new(self)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn traces(&self) -> &SharedTraceLog {
        &self.traces
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Events for one work item only, from this point on
    pub fn watch_work_item(&self, work_item_id: &str) -> WorkItemReceiver {
        WorkItemReceiver::new(self.events.subscribe(), work_item_id)
    }

    // =========================================================================
    // Agents
    // =========================================================================

    pub fn register_agent(
        &self,
        agent_id: impl Into<String>,
        level: AgentLevel,
        capabilities: impl IntoIterator<Item = String>,
    ) -> EngineResult<AgentState> {
        Ok(self.router.register_agent(agent_id, level, capabilities)?)
    }

    pub fn deregister_agent(&self, agent_id: &str) -> EngineResult<AgentState> {
        Ok(self.router.deregister_agent(agent_id)?)
    }

    // =========================================================================
    // Coordination
    // =========================================================================

    /// Route one agent report
    pub async fn coordinate(&self, request: CoordinationRequest) -> EngineResult<CoordinationResponse> {
        Ok(self.router.route(request).await?)
    }

    /// Consensus for the named item, or the active one
    pub async fn consensus(&self, work_item_id: Option<&str>) -> EngineResult<ConsensusSnapshot> {
        Ok(self.controller.consensus(work_item_id).await?)
    }

    // =========================================================================
    // Work items
    // =========================================================================

    pub async fn enqueue_work_item(
        &self,
        work_item_id: impl Into<WorkItemId>,
        phases: Option<Vec<String>>,
    ) -> EngineResult<WorkItem> {
        Ok(self.controller.enqueue(work_item_id, phases).await?)
    }

    pub async fn cancel_work_item(&self, work_item_id: &str) -> EngineResult<WorkItem> {
        let canceled = self.controller.cancel_work_item(work_item_id).await?;
        self.router.forget_replies();
        Ok(canceled)
    }

    pub async fn current_work_item(&self) -> Option<WorkItem> {
        self.controller.current().await
    }

    pub async fn work_item(&self, work_item_id: &str) -> Option<WorkItem> {
        self.controller.get(work_item_id).await
    }

    // =========================================================================
    // Traces
    // =========================================================================

    pub fn trace(&self, work_item_id: &str) -> EngineResult<IntelligenceTrace> {
        Ok(self.traces.query(work_item_id)?)
    }

    pub fn trace_range(&self, from: &str, to: &str) -> EngineResult<Vec<IntelligenceTrace>> {
        Ok(self.traces.query_range(from, to)?)
    }

    pub fn recent_traces(&self, limit: usize) -> EngineResult<Vec<IntelligenceTrace>> {
        Ok(self.traces.recent(limit)?)
    }

    // =========================================================================
    // Health and housekeeping
    // =========================================================================

    pub async fn health(&self) -> HealthReport {
        let stale_agents = self.registry.stale_count();
        let last_failed = self.controller.last_outcome().await == Some(WorkItemState::Failed);
        let status = if stale_agents > 0 || last_failed {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            registered_agents: self.registry.len(),
            stale_agents,
            active_work_item: self.controller.current().await.map(|item| item.id),
            pending_work_items: self.controller.pending_count().await,
            traces_recorded: self.traces.len(),
            timestamp: Utc::now(),
        }
    }

    /// One watchdog pass: mark idle agents stale and enforce the phase deadline
    pub async fn tick(&self) -> Option<WorkItem> {
        self.router.sweep_stale();
        let failed = self.controller.enforce_deadlines().await;
        if let Some(item) = &failed {
            warn!(work_item_id = %item.id, "Watchdog failed overdue work item");
            self.router.forget_replies();
        }
        failed
    }

    /// Run `tick` on the configured interval until the handle is aborted
    pub fn spawn_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = engine.config.watchdog_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.tick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        let config = EngineConfig {
            phases: vec!["only".into()],
            ..EngineConfig::default()
        };
        Engine::in_memory(config).unwrap()
    }

    #[tokio::test]
    async fn test_independent_engines() {
        let a = engine();
        let b = engine();
        a.enqueue_work_item("V1", None).await.unwrap();

        assert!(a.current_work_item().await.is_some());
        assert!(b.current_work_item().await.is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            phases: Vec::new(),
            ..EngineConfig::default()
        };
        assert!(matches!(
            Engine::in_memory(config),
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_health_degrades_after_failure() {
        let engine = engine();
        engine.register_agent("a", AgentLevel::L1, Vec::new()).unwrap();
        engine.enqueue_work_item("V1", None).await.unwrap();
        engine.enqueue_work_item("V2", None).await.unwrap();

        let report = engine.health().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.registered_agents, 1);
        assert_eq!(report.active_work_item.as_deref(), Some("V1"));
        assert_eq!(report.pending_work_items, 1);

        engine.cancel_work_item("V1").await.unwrap();
        let report = engine.health().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.active_work_item.as_deref(), Some("V2"));
        assert_eq!(report.traces_recorded, 1);
    }

    #[tokio::test]
    async fn test_events_published() {
        let engine = engine();
        let mut events = engine.subscribe();
        engine.register_agent("a", AgentLevel::L3, Vec::new()).unwrap();
        engine.enqueue_work_item("V1", None).await.unwrap();

        assert_eq!(events.recv().await.unwrap().event_type(), "agent_registered");
        assert_eq!(events.recv().await.unwrap().event_type(), "work_item_enqueued");
        assert_eq!(events.recv().await.unwrap().event_type(), "work_item_admitted");
    }

    #[tokio::test]
    async fn test_watch_work_item_follows_one_item() {
        let engine = engine();
        let mut watched = engine.watch_work_item("V2");
        engine.enqueue_work_item("V1", None).await.unwrap();
        engine.enqueue_work_item("V2", None).await.unwrap();
        engine.cancel_work_item("V1").await.unwrap();

        assert_eq!(watched.recv().await.unwrap().event_type(), "work_item_enqueued");
        let admitted = watched.recv().await.unwrap();
        assert_eq!(admitted.event_type(), "work_item_admitted");
        assert_eq!(admitted.work_item_id(), Some("V2"));
    }
}
