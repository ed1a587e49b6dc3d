//! Consensus Calculator: quorum-style agreement per hierarchy level
//!
//! Agents do not emit comparable scalar judgments, so a level's score is the
//! fraction of its expected (non-stale) agents whose report for the phase
//! under evaluation is satisfactory. The overall score is the mean over the
//! gating levels L1..L4; the L5 orchestrator is never scored.
//!
//! Every call recomputes from the registry. Nothing is cached between calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::registry::{AgentRegistry, AgentState};
use crate::state::{AgentLevel, ConsensusSnapshot, Payload, PhaseStamp};

/// Design default for the overall threshold
pub const DEFAULT_THRESHOLD: f64 = 0.75;

/// Whether a report counts toward its level's quorum.
///
/// The payload needs a non-empty `result` and no `error`. Validators (L4)
/// may additionally veto with `"approved": false`.
pub fn is_satisfactory(level: AgentLevel, payload: &Payload) -> bool {
    let has_result = match payload.get("result") {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(fields)) => !fields.is_empty(),
        Some(_) => true,
    };
    if !has_result {
        return false;
    }

    if payload.get("error").is_some_and(|e| !e.is_null()) {
        return false;
    }

    match level {
        AgentLevel::L4 => payload
            .get("approved")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        _ => true,
    }
}

/// Score a single level from its registry snapshot.
///
/// Stale agents drop out of both numerator and denominator; a level with no
/// expected agents is vacuously satisfied.
pub fn level_score(level: AgentLevel, agents: &[AgentState], stamp: &PhaseStamp) -> f64 {
    let expected: Vec<&AgentState> = agents.iter().filter(|a| !a.is_stale()).collect();
    if expected.is_empty() {
        return 1.0;
    }

    let satisfied = expected
        .iter()
        .filter(|a| a.contributed_to(stamp) && is_satisfactory(level, &a.last_payload))
        .count();

    satisfied as f64 / expected.len() as f64
}

/// Computes consensus snapshots from live registry state
#[derive(Clone)]
pub struct ConsensusCalculator {
    registry: Arc<AgentRegistry>,
    threshold: f64,
}

impl ConsensusCalculator {
    pub fn new(registry: Arc<AgentRegistry>, threshold: f64) -> Self {
        Self {
            registry,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Full recomputation for one phase of one work item
    pub fn compute(&self, stamp: &PhaseStamp, phase: &str) -> ConsensusSnapshot {
        let mut level_scores = BTreeMap::new();
        for &level in AgentLevel::gating() {
            let agents = self.registry.snapshot(level);
            level_scores.insert(level, level_score(level, &agents, stamp));
        }

        let overall = level_scores.values().sum::<f64>() / level_scores.len() as f64;
        let threshold_met = overall > self.threshold;

        debug!(
            work_item_id = %stamp.work_item_id,
            phase,
            overall,
            threshold_met,
            "Consensus computed"
        );

        ConsensusSnapshot {
            work_item_id: stamp.work_item_id.clone(),
            phase: phase.to_string(),
            level_scores,
            overall,
            threshold: self.threshold,
            threshold_met,
            computed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    fn calculator() -> (Arc<AgentRegistry>, ConsensusCalculator) {
        let registry = Arc::new(AgentRegistry::new(Duration::from_secs(300)));
        let calc = ConsensusCalculator::new(registry.clone(), DEFAULT_THRESHOLD);
        (registry, calc)
    }

    #[test]
    fn test_satisfactory_predicate() {
        assert!(is_satisfactory(AgentLevel::L1, &payload(json!({"result": "ok"}))));
        assert!(is_satisfactory(AgentLevel::L1, &payload(json!({"result": 0.4}))));
        assert!(!is_satisfactory(AgentLevel::L1, &payload(json!({}))));
        assert!(!is_satisfactory(AgentLevel::L1, &payload(json!({"result": "  "}))));
        assert!(!is_satisfactory(AgentLevel::L2, &payload(json!({"result": []}))));
        assert!(!is_satisfactory(
            AgentLevel::L1,
            &payload(json!({"result": "ok", "error": "landmark lost"}))
        ));
        assert!(is_satisfactory(
            AgentLevel::L1,
            &payload(json!({"result": "ok", "error": null}))
        ));
    }

    #[test]
    fn test_validator_veto() {
        let vetoed = payload(json!({"result": "signature", "approved": false}));
        assert!(!is_satisfactory(AgentLevel::L4, &vetoed));
        // Only validators can veto
        assert!(is_satisfactory(AgentLevel::L3, &vetoed));
    }

    #[test]
    fn test_empty_levels_are_vacuously_satisfied() {
        let (_registry, calc) = calculator();
        let snapshot = calc.compute(&PhaseStamp::new("V1", 0), "horizontal-analysis");

        assert_eq!(snapshot.level_scores.len(), 4);
        assert!(snapshot.level_scores.values().all(|s| *s == 1.0));
        assert_eq!(snapshot.overall, 1.0);
        assert!(snapshot.threshold_met);
        assert!(!snapshot.level_scores.contains_key(&AgentLevel::L5));
    }

    #[test]
    fn test_level_score_is_k_over_n() {
        let (registry, calc) = calculator();
        let stamp = PhaseStamp::new("V1", 0);
        for id in ["a", "b", "c"] {
            registry
                .register(id, AgentLevel::L1, vec!["facial".to_string()])
                .unwrap();
        }

        registry
            .report_for_phase("a", stamp.clone(), payload(json!({"result": "ok"})))
            .unwrap();
        registry
            .report_for_phase("b", stamp.clone(), payload(json!({"result": "ok"})))
            .unwrap();
        // Unsatisfactory report does not count
        registry
            .report_for_phase("c", stamp.clone(), payload(json!({"result": ""})))
            .unwrap();

        let snapshot = calc.compute(&stamp, "horizontal-analysis");
        assert_eq!(snapshot.level_scores[&AgentLevel::L1], 2.0 / 3.0);
        assert!((snapshot.overall - (2.0 / 3.0 + 3.0) / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_reports_for_other_phase_ignored() {
        let (registry, calc) = calculator();
        registry.register("a", AgentLevel::L2, Vec::new()).unwrap();
        registry
            .report_for_phase(
                "a",
                PhaseStamp::new("V1", 0),
                payload(json!({"result": "ok"})),
            )
            .unwrap();

        let snapshot = calc.compute(&PhaseStamp::new("V1", 1), "department-synthesis");
        assert_eq!(snapshot.level_scores[&AgentLevel::L2], 0.0);
        assert_eq!(snapshot.shortfall(), vec![AgentLevel::L2]);
    }

    #[test]
    fn test_stale_agents_excluded_from_denominator() {
        let registry = Arc::new(AgentRegistry::new(Duration::from_millis(100)));
        let calc = ConsensusCalculator::new(registry.clone(), DEFAULT_THRESHOLD);
        let stamp = PhaseStamp::new("V1", 0);

        registry.register("quiet", AgentLevel::L3, Vec::new()).unwrap();
        registry.register("busy", AgentLevel::L3, Vec::new()).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        registry
            .report_for_phase("busy", stamp.clone(), payload(json!({"result": "ok"})))
            .unwrap();

        let snapshot = calc.compute(&stamp, "vertical-synthesis");
        assert_eq!(snapshot.level_scores[&AgentLevel::L3], 1.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        let registry = Arc::new(AgentRegistry::new(Duration::from_secs(300)));
        let calc = ConsensusCalculator::new(registry.clone(), 1.0);
        let snapshot = calc.compute(&PhaseStamp::new("V1", 0), "p");
        assert_eq!(snapshot.overall, 1.0);
        assert!(!snapshot.threshold_met);
    }
}
