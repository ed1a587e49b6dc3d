//! Engine configuration
//!
//! Layered: `Default`, then an optional TOML file, then `COORDINATION_*`
//! environment variables. The binary applies CLI flags last.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::consensus::DEFAULT_THRESHOLD;

/// Phase names used when a work item is enqueued without its own list
pub const DEFAULT_PHASES: &[&str] = &[
    "horizontal-analysis",
    "department-synthesis",
    "vertical-synthesis",
    "executive-integration",
    "sequential-learning",
];

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Runtime configuration for the coordination engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// HTTP listen address
    pub bind_addr: SocketAddr,

    /// RocksDB directory for the trace store
    pub trace_path: PathBuf,

    /// Ordered phase names assigned to newly enqueued work items
    pub phases: Vec<String>,

    /// Overall consensus must strictly exceed this
    pub consensus_threshold: f64,

    /// Silence after which an agent is considered stale
    pub idle_window_secs: u64,

    /// How long an L2 report waits for its feeding L1 agents
    pub aggregation_wait_ms: u64,

    /// Poll interval inside the aggregation wait
    pub aggregation_poll_ms: u64,

    /// Maximum time the active item may spend in one phase
    pub phase_timeout_secs: u64,

    /// Below-threshold validations tolerated per phase
    pub max_validation_failures: u32,

    /// Number of recent traces consulted for assignment hints
    pub trace_lookback: usize,

    /// Deadline watchdog tick
    pub watchdog_interval_ms: u64,

    /// Finished items kept in memory; older ones are answered from traces
    pub finished_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            trace_path: PathBuf::from(".coordination-traces"),
            phases: DEFAULT_PHASES.iter().map(|p| p.to_string()).collect(),
            consensus_threshold: DEFAULT_THRESHOLD,
            idle_window_secs: 300,
            aggregation_wait_ms: 250,
            aggregation_poll_ms: 25,
            phase_timeout_secs: 30,
            max_validation_failures: 3,
            trace_lookback: 5,
            watchdog_interval_ms: 1000,
            finished_retention: 1024,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML config file; missing keys keep their defaults
    pub fn from_toml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Create config from defaults and environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `COORDINATION_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary key lookup.
    ///
    /// Unparsable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = parse_var(&lookup, "COORDINATION_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(path) = lookup("COORDINATION_TRACE_PATH") {
            self.trace_path = PathBuf::from(path);
        }
        if let Some(threshold) = parse_var(&lookup, "COORDINATION_CONSENSUS_THRESHOLD") {
            self.consensus_threshold = threshold;
        }
        if let Some(secs) = parse_var(&lookup, "COORDINATION_IDLE_WINDOW_SECS") {
            self.idle_window_secs = secs;
        }
        if let Some(ms) = parse_var(&lookup, "COORDINATION_AGGREGATION_WAIT_MS") {
            self.aggregation_wait_ms = ms;
        }
        if let Some(secs) = parse_var(&lookup, "COORDINATION_PHASE_TIMEOUT_SECS") {
            self.phase_timeout_secs = secs;
        }
        if let Some(n) = parse_var(&lookup, "COORDINATION_MAX_VALIDATION_FAILURES") {
            self.max_validation_failures = n;
        }
        if let Some(n) = parse_var(&lookup, "COORDINATION_TRACE_LOOKBACK") {
            self.trace_lookback = n;
        }
        if let Some(n) = parse_var(&lookup, "COORDINATION_FINISHED_RETENTION") {
            self.finished_retention = n;
        }
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.phases.is_empty() {
            return Err(ConfigError::Invalid("phase list is empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for phase in &self.phases {
            if phase.trim().is_empty() {
                return Err(ConfigError::Invalid("phase name is blank".into()));
            }
            if !seen.insert(phase.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate phase: {phase}")));
            }
        }
        if !(0.0..=1.0).contains(&self.consensus_threshold) {
            return Err(ConfigError::Invalid(format!(
                "consensus_threshold {} outside [0, 1]",
                self.consensus_threshold
            )));
        }
        if self.phase_timeout_secs == 0 {
            return Err(ConfigError::Invalid("phase_timeout_secs must be > 0".into()));
        }
        if self.aggregation_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "aggregation_poll_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn idle_window(&self) -> Duration {
        Duration::from_secs(self.idle_window_secs)
    }

    pub fn aggregation_wait(&self) -> Duration {
        Duration::from_millis(self.aggregation_wait_ms)
    }

    pub fn aggregation_poll(&self) -> Duration {
        Duration::from_millis(self.aggregation_poll_ms)
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(1))
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.phases.len(), 5);
        assert_eq!(config.phases[0], "horizontal-analysis");
        assert_eq!(config.consensus_threshold, 0.75);
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn test_overrides_applied_and_bad_values_ignored() {
        let vars: HashMap<&str, &str> = [
            ("COORDINATION_BIND_ADDR", "0.0.0.0:9000"),
            ("COORDINATION_PHASE_TIMEOUT_SECS", "5"),
            ("COORDINATION_MAX_VALIDATION_FAILURES", "many"),
            ("COORDINATION_FINISHED_RETENTION", "64"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.phase_timeout_secs, 5);
        assert_eq!(config.max_validation_failures, 3);
        assert_eq!(config.finished_retention, 64);
    }

    #[test]
    fn test_toml_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordination.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "phases = [\"scan\", \"review\"]").unwrap();
        writeln!(file, "consensus_threshold = 0.5").unwrap();

        let config = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.phases, vec!["scan", "review"]);
        assert_eq!(config.consensus_threshold, 0.5);
        assert_eq!(config.idle_window_secs, 300);
    }

    #[test]
    fn test_toml_file_missing() {
        let err = EngineConfig::from_toml_file("/nonexistent/coordination.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.phases.clear();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.phases.push("horizontal-analysis".into());
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.consensus_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.phase_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.aggregation_poll_ms = 0;
        assert!(config.validate().is_err());
    }
}
