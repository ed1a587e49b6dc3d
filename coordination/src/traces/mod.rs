//! Trace Store: append-only log of intelligence traces
//!
//! Each finished work item leaves exactly one immutable trace. Later work
//! items read earlier traces (through `recent` or `query_range`) to bias the
//! router's assignment hints, so the log is the engine's long-term memory.
//!
//! # Backends
//!
//! - [`RocksTraceStore`]: column-family layout with synced writes. An
//!   acknowledged append survives a process restart.
//! - [`MemoryTraceStore`]: same contract without durability, for tests and
//!   `--ephemeral` runs.
//!
//! # Usage
//!
//! ```ignore
//! use swarm_coordinator::traces::{RocksTraceStore, TraceLog};
//! use swarm_coordinator::state::IntelligenceTrace;
//!
//! let store = RocksTraceStore::open("./.coordination-traces")?;
//! store.append(IntelligenceTrace::completed("V1", patterns, None))?;
//! let earlier = store.query_range("V1", "V9")?;
//! ```

pub mod memory;
pub mod schema;
pub mod store;

use std::sync::Arc;

use crate::state::IntelligenceTrace;

pub use memory::MemoryTraceStore;
pub use store::RocksTraceStore;

/// Error type for trace store operations
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("Trace already finalized for work item: {0}")]
    AlreadyFinalized(String),

    #[error("No trace for work item: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

impl From<rocksdb::Error> for TraceError {
    fn from(err: rocksdb::Error) -> Self {
        TraceError::Storage(err.to_string())
    }
}

/// Result type for trace store operations
pub type TraceResult<T> = Result<T, TraceError>;

/// Shared reference to a trace log
pub type SharedTraceLog = Arc<dyn TraceLog>;

/// Append-only, queryable trace log
pub trait TraceLog: Send + Sync {
    /// Append the trace for a work item.
    ///
    /// Fails with `AlreadyFinalized` if the work item already has a trace;
    /// the stored trace is left untouched. Returns the trace with its
    /// assigned sequence number.
    fn append(&self, trace: IntelligenceTrace) -> TraceResult<IntelligenceTrace>;

    /// Trace for a single work item
    fn query(&self, work_item_id: &str) -> TraceResult<IntelligenceTrace>;

    /// Traces from `from` to `to` (inclusive) in append order.
    ///
    /// Both endpoints must exist. An inverted range yields an empty list.
    fn query_range(&self, from: &str, to: &str) -> TraceResult<Vec<IntelligenceTrace>>;

    /// The last `limit` traces, oldest first
    fn recent(&self, limit: usize) -> TraceResult<Vec<IntelligenceTrace>>;

    /// Whether a trace exists for the work item
    fn contains(&self, work_item_id: &str) -> bool;

    /// Number of traces recorded
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
