//! Column family definitions for the RocksDB trace store
//!
//! Each trace record carries its own append sequence, so a single column
//! family is enough: the append order is rebuilt from the records on open.

/// Column family for trace records, keyed by work item
pub const CF_TRACES: &str = "traces";

/// All column family names
pub const ALL_CFS: &[&str] = &[CF_TRACES];

/// Key prefixes for compound keys
pub mod keys {
    /// Prefix shared by every trace key
    pub const TRACE_PREFIX: &str = "trace:";

    /// Create a trace key
    pub fn trace(work_item_id: &str) -> String {
        format!("{}{}", TRACE_PREFIX, work_item_id)
    }

    /// Parse the work item ID from a trace key
    pub fn parse_trace(key: &str) -> Option<&str> {
        key.strip_prefix(TRACE_PREFIX)
    }
}
