//! In-memory trace log
//!
//! Same append-once contract as the RocksDB store, without durability.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{TraceError, TraceLog, TraceResult};
use crate::state::{IntelligenceTrace, WorkItemId};

#[derive(Default)]
struct Inner {
    index: HashMap<WorkItemId, u64>,
    traces: BTreeMap<u64, IntelligenceTrace>,
    next_seq: u64,
}

/// Volatile trace log
#[derive(Default)]
pub struct MemoryTraceStore {
    inner: RwLock<Inner>,
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TraceLog for MemoryTraceStore {
    fn append(&self, mut trace: IntelligenceTrace) -> TraceResult<IntelligenceTrace> {
        let mut inner = self.inner.write().map_err(|_| TraceError::LockPoisoned)?;
        if inner.index.contains_key(&trace.work_item_id) {
            return Err(TraceError::AlreadyFinalized(trace.work_item_id));
        }

        inner.next_seq += 1;
        trace.sequence = inner.next_seq;
        inner
            .index
            .insert(trace.work_item_id.clone(), trace.sequence);
        inner.traces.insert(trace.sequence, trace.clone());
        Ok(trace)
    }

    fn query(&self, work_item_id: &str) -> TraceResult<IntelligenceTrace> {
        let inner = self.inner.read().map_err(|_| TraceError::LockPoisoned)?;
        inner
            .index
            .get(work_item_id)
            .and_then(|seq| inner.traces.get(seq))
            .cloned()
            .ok_or_else(|| TraceError::NotFound(work_item_id.to_string()))
    }

    fn query_range(&self, from: &str, to: &str) -> TraceResult<Vec<IntelligenceTrace>> {
        let inner = self.inner.read().map_err(|_| TraceError::LockPoisoned)?;
        let from_seq = *inner
            .index
            .get(from)
            .ok_or_else(|| TraceError::NotFound(from.to_string()))?;
        let to_seq = *inner
            .index
            .get(to)
            .ok_or_else(|| TraceError::NotFound(to.to_string()))?;

        if from_seq > to_seq {
            return Ok(Vec::new());
        }
        Ok(inner
            .traces
            .range(from_seq..=to_seq)
            .map(|(_, trace)| trace.clone())
            .collect())
    }

    fn recent(&self, limit: usize) -> TraceResult<Vec<IntelligenceTrace>> {
        let inner = self.inner.read().map_err(|_| TraceError::LockPoisoned)?;
        let mut traces: Vec<IntelligenceTrace> =
            inner.traces.values().rev().take(limit).cloned().collect();
        traces.reverse();
        Ok(traces)
    }

    fn contains(&self, work_item_id: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.index.contains_key(work_item_id))
            .unwrap_or(false)
    }

    fn len(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.index.len())
            .unwrap_or(0)
    }
}
