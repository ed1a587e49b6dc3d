//! Action and instruction tags returned to agents
//!
//! Tags are plain strings on the wire so that agents written in any language
//! can match on them.

// Next actions
pub const AWAIT_AGGREGATION: &str = "await-aggregation";
pub const ESCALATE: &str = "escalate";
pub const AWAITING_INPUTS: &str = "awaiting-inputs";
pub const INTEGRATE: &str = "integrate";
pub const FINALIZE_SIGNATURE: &str = "finalize-signature";
pub const ADVANCE_PHASE: &str = "advance-phase";
pub const AWAITING_CONSENSUS: &str = "awaiting-consensus";
pub const UPDATE_TRACES: &str = "update-traces";
pub const ADVANCE_TO_NEXT_ITEM: &str = "advance-to-next-item";

// Assignment instructions
pub const AGGREGATE: &str = "aggregate";
pub const AGGREGATE_PRIORITIZED: &str = "aggregate-prioritized";
pub const VALIDATE: &str = "validate";
pub const ADVANCE: &str = "advance";
pub const COMPLETE: &str = "complete";

/// Suffix that turns a capability tag into its aggregator tag
pub const AGGREGATOR_SUFFIX: &str = "-aggregator";

/// Minimum recorded confidence for a pattern to prioritize its aggregator
pub const PRIORITY_CONFIDENCE: f64 = 0.7;

/// Aggregator tag owning a leaf capability ("facial" -> "facial-aggregator")
pub fn aggregator_tag(capability: &str) -> String {
    format!("{capability}{AGGREGATOR_SUFFIX}")
}

/// Domain an aggregator capability covers ("facial-aggregator" -> "facial").
///
/// Tags without the suffix are taken as the domain itself.
pub fn aggregator_domain(capability: &str) -> &str {
    capability
        .strip_suffix(AGGREGATOR_SUFFIX)
        .unwrap_or(capability)
}
