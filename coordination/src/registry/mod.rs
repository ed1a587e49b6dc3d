//! Agent Registry: identity, level and last-reported state of every agent
//!
//! Records are sharded in a `DashMap`, so a report only locks the shard
//! holding that agent. Agents that go quiet past the idle window are marked
//! stale rather than removed, which keeps their audit history while letting
//! consensus exclude them.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::{AgentId, AgentLevel, Payload, PhaseStamp};

/// Error type for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Agent already registered: {0}")]
    DuplicateAgent(AgentId),

    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Liveness of a registered agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    /// Reported within the idle window
    Active,
    /// Silent for longer than the idle window
    Stale,
}

/// Registered agent with its last-reported state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: AgentId,
    pub level: AgentLevel,
    pub capabilities: BTreeSet<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Body of the most recent report
    pub last_payload: Payload,
    /// Phase the most recent report was recorded against
    pub contribution: Option<PhaseStamp>,
    pub status: AgentStatus,
}

impl AgentState {
    fn new(agent_id: AgentId, level: AgentLevel, capabilities: BTreeSet<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id,
            level,
            capabilities,
            registered_at: now,
            last_seen: now,
            last_payload: Payload::new(),
            contribution: None,
            status: AgentStatus::Active,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.status == AgentStatus::Stale
    }

    /// Whether the latest report was recorded against `stamp`
    pub fn contributed_to(&self, stamp: &PhaseStamp) -> bool {
        self.contribution.as_ref() == Some(stamp)
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.contains(tag)
    }
}

/// Concurrent registry of all known agents
pub struct AgentRegistry {
    agents: DashMap<AgentId, AgentState>,
    idle_window: Duration,
}

impl AgentRegistry {
    /// Create an empty registry with the given idle window
    pub fn new(idle_window: Duration) -> Self {
        Self {
            agents: DashMap::new(),
            idle_window,
        }
    }

    pub fn idle_window(&self) -> Duration {
        self.idle_window
    }

    fn is_idle(&self, state: &AgentState, now: DateTime<Utc>) -> bool {
        (now - state.last_seen)
            .to_std()
            .map(|elapsed| elapsed > self.idle_window)
            .unwrap_or(false)
    }

    /// Copy of a record with staleness evaluated against the current time
    fn effective(&self, mut state: AgentState, now: DateTime<Utc>) -> AgentState {
        if self.is_idle(&state, now) {
            state.status = AgentStatus::Stale;
        }
        state
    }

    /// Register a new agent
    pub fn register(
        &self,
        agent_id: impl Into<AgentId>,
        level: AgentLevel,
        capabilities: impl IntoIterator<Item = String>,
    ) -> RegistryResult<AgentState> {
        let agent_id = agent_id.into();
        match self.agents.entry(agent_id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateAgent(agent_id)),
            Entry::Vacant(slot) => {
                let state = AgentState::new(agent_id, level, capabilities.into_iter().collect());
                debug!(agent_id = %state.agent_id, level = %level, "Agent registered");
                slot.insert(state.clone());
                Ok(state)
            }
        }
    }

    /// Record a heartbeat-style report that is not tied to a phase
    pub fn report(&self, agent_id: &str, payload: Payload) -> RegistryResult<()> {
        let mut entry = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))?;

        entry.last_payload = payload;
        entry.last_seen = Utc::now();
        entry.status = AgentStatus::Active;
        Ok(())
    }

    /// Record a report and stamp it against a phase of the active work item
    pub fn report_for_phase(
        &self,
        agent_id: &str,
        stamp: PhaseStamp,
        payload: Payload,
    ) -> RegistryResult<AgentState> {
        let mut entry = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))?;

        entry.last_payload = payload;
        entry.last_seen = Utc::now();
        entry.status = AgentStatus::Active;
        entry.contribution = Some(stamp);
        Ok(entry.clone())
    }

    /// Remove an agent
    pub fn deregister(&self, agent_id: &str) -> RegistryResult<AgentState> {
        self.agents
            .remove(agent_id)
            .map(|(_, state)| state)
            .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))
    }

    /// Look up a single agent
    pub fn get(&self, agent_id: &str) -> Option<AgentState> {
        let now = Utc::now();
        self.agents
            .get(agent_id)
            .map(|entry| self.effective(entry.value().clone(), now))
    }

    /// All agents at a level, ordered by agent ID
    pub fn snapshot(&self, level: AgentLevel) -> Vec<AgentState> {
        let now = Utc::now();
        let mut agents: Vec<AgentState> = self
            .agents
            .iter()
            .filter(|entry| entry.level == level)
            .map(|entry| self.effective(entry.value().clone(), now))
            .collect();

        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Persistently mark idle agents as stale; returns how many were newly marked
    pub fn sweep_stale(&self) -> usize {
        let now = Utc::now();
        let mut marked = 0;
        for mut entry in self.agents.iter_mut() {
            if entry.status == AgentStatus::Active && self.is_idle(&entry, now) {
                entry.status = AgentStatus::Stale;
                marked += 1;
            }
        }
        if marked > 0 {
            debug!(marked, "Marked idle agents stale");
        }
        marked
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn stale_count(&self) -> usize {
        let now = Utc::now();
        self.agents
            .iter()
            .filter(|entry| entry.status == AgentStatus::Stale || self.is_idle(&entry, now))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn caps(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    fn registry() -> AgentRegistry {
        AgentRegistry::new(Duration::from_secs(300))
    }

    #[test]
    fn test_register_rejects_duplicate() {
        let registry = registry();
        registry
            .register("landmark-1", AgentLevel::L1, caps(&["facial"]))
            .unwrap();

        let err = registry
            .register("landmark-1", AgentLevel::L2, caps(&[]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAgent(id) if id == "landmark-1"));
        assert_eq!(registry.get("landmark-1").unwrap().level, AgentLevel::L1);
    }

    #[test]
    fn test_report_unknown_agent() {
        let registry = registry();
        let err = registry.report("ghost", Payload::new()).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownAgent(_)));
    }

    #[test]
    fn test_register_deregister_roundtrip() {
        let registry = registry();
        registry
            .register("au-12", AgentLevel::L1, caps(&["action_unit"]))
            .unwrap();
        registry
            .register("au-1", AgentLevel::L1, caps(&["action_unit"]))
            .unwrap();

        registry.deregister("au-12").unwrap();

        let ids: Vec<String> = registry
            .snapshot(AgentLevel::L1)
            .into_iter()
            .map(|a| a.agent_id)
            .collect();
        assert_eq!(ids, vec!["au-1".to_string()]);
        assert!(matches!(
            registry.deregister("au-12"),
            Err(RegistryError::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_snapshot_is_ordered_and_level_scoped() {
        let registry = registry();
        registry.register("c", AgentLevel::L1, caps(&[])).unwrap();
        registry.register("a", AgentLevel::L1, caps(&[])).unwrap();
        registry.register("b", AgentLevel::L2, caps(&[])).unwrap();

        let ids: Vec<String> = registry
            .snapshot(AgentLevel::L1)
            .into_iter()
            .map(|a| a.agent_id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_report_for_phase_stamps_contribution() {
        let registry = registry();
        registry.register("a", AgentLevel::L1, caps(&[])).unwrap();

        let mut payload = Payload::new();
        payload.insert("result".into(), "ok".into());
        let stamp = PhaseStamp::new("V1", 0);
        let state = registry
            .report_for_phase("a", stamp.clone(), payload)
            .unwrap();

        assert!(state.contributed_to(&stamp));
        assert!(!state.contributed_to(&PhaseStamp::new("V1", 1)));
    }

    #[test]
    fn test_idle_agents_marked_stale() {
        let registry = AgentRegistry::new(Duration::from_millis(50));
        registry.register("quiet", AgentLevel::L3, caps(&[])).unwrap();

        std::thread::sleep(Duration::from_millis(120));

        assert!(registry.get("quiet").unwrap().is_stale());
        assert_eq!(registry.stale_count(), 1);
        assert_eq!(registry.sweep_stale(), 1);
        assert_eq!(registry.sweep_stale(), 0);

        // A fresh report revives the agent
        registry.report("quiet", Payload::new()).unwrap();
        assert!(!registry.get("quiet").unwrap().is_stale());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reports_from_distinct_agents() {
        let registry = Arc::new(registry());
        for i in 0..32 {
            registry
                .register(format!("agent-{i}"), AgentLevel::L1, caps(&["facial"]))
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let mut payload = Payload::new();
                payload.insert("result".into(), i.into());
                registry
                    .report_for_phase(&format!("agent-{i}"), PhaseStamp::new("V1", 0), payload)
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stamp = PhaseStamp::new("V1", 0);
        assert!(registry
            .snapshot(AgentLevel::L1)
            .iter()
            .all(|a| a.contributed_to(&stamp)));
    }
}
