//! RocksDB-backed trace store
//!
//! Appends are written with `sync = true` before they are acknowledged.
//! An in-memory index (work item -> sequence) is rebuilt from disk on open
//! and guards idempotence: the index entry for a work item is held locked
//! while its record is written.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteOptions, DB};
use tracing::{debug, info};

use super::schema::{self, ALL_CFS};
use super::{TraceError, TraceLog, TraceResult};
use crate::state::{IntelligenceTrace, WorkItemId};

/// Durable, append-only trace log
pub struct RocksTraceStore {
    db: DB,
    path: PathBuf,
    /// Work item -> sequence
    index: DashMap<WorkItemId, u64>,
    /// Sequence -> work item, for ordered reads
    order: RwLock<BTreeMap<u64, WorkItemId>>,
    next_seq: AtomicU64,
}

impl RocksTraceStore {
    /// Open or create a trace store at the given path
    pub fn open(path: impl Into<PathBuf>) -> TraceResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        let store = Self {
            db,
            path,
            index: DashMap::new(),
            order: RwLock::new(BTreeMap::new()),
            next_seq: AtomicU64::new(1),
        };
        store.rebuild_index()?;
        Ok(store)
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn cf(&self, name: &str) -> TraceResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| TraceError::ColumnFamilyNotFound(name.to_string()))
    }

    fn rebuild_index(&self) -> TraceResult<()> {
        let cf = self.cf(schema::CF_TRACES)?;
        let mut order = self.order.write().map_err(|_| TraceError::LockPoisoned)?;
        let mut max_seq = 0;

        for result in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = result?;
            let key_str = String::from_utf8(key.to_vec())
                .map_err(|e| TraceError::Deserialization(e.to_string()))?;
            if schema::keys::parse_trace(&key_str).is_none() {
                continue;
            }

            let trace: IntelligenceTrace = serde_json::from_slice(&value)
                .map_err(|e| TraceError::Deserialization(e.to_string()))?;
            max_seq = max_seq.max(trace.sequence);
            self.index.insert(trace.work_item_id.clone(), trace.sequence);
            order.insert(trace.sequence, trace.work_item_id);
        }

        self.next_seq.store(max_seq + 1, Ordering::SeqCst);
        info!(
            path = %self.path.display(),
            traces = order.len(),
            "Trace store opened"
        );
        Ok(())
    }

    fn read(&self, work_item_id: &str) -> TraceResult<Option<IntelligenceTrace>> {
        let cf = self.cf(schema::CF_TRACES)?;
        match self.db.get_cf(cf, schema::keys::trace(work_item_id).as_bytes())? {
            Some(bytes) => {
                let trace = serde_json::from_slice(&bytes)
                    .map_err(|e| TraceError::Deserialization(e.to_string()))?;
                Ok(Some(trace))
            }
            None => Ok(None),
        }
    }

    fn read_all(&self, ids: Vec<WorkItemId>) -> TraceResult<Vec<IntelligenceTrace>> {
        ids.into_iter()
            .map(|id| self.read(&id)?.ok_or(TraceError::NotFound(id)))
            .collect()
    }

    fn sequence_of(&self, work_item_id: &str) -> TraceResult<u64> {
        self.index
            .get(work_item_id)
            .map(|seq| *seq)
            .ok_or_else(|| TraceError::NotFound(work_item_id.to_string()))
    }
}

impl TraceLog for RocksTraceStore {
    fn append(&self, mut trace: IntelligenceTrace) -> TraceResult<IntelligenceTrace> {
        let work_item_id = trace.work_item_id.clone();

        match self.index.entry(work_item_id.clone()) {
            Entry::Occupied(_) => Err(TraceError::AlreadyFinalized(work_item_id)),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                trace.sequence = seq;

                let bytes = serde_json::to_vec(&trace)
                    .map_err(|e| TraceError::Serialization(e.to_string()))?;

                let mut write_opts = WriteOptions::default();
                write_opts.set_sync(true);

                let cf = self.cf(schema::CF_TRACES)?;
                self.db.put_cf_opt(
                    cf,
                    schema::keys::trace(&work_item_id).as_bytes(),
                    bytes,
                    &write_opts,
                )?;

                self.order
                    .write()
                    .map_err(|_| TraceError::LockPoisoned)?
                    .insert(seq, work_item_id.clone());
                slot.insert(seq);

                debug!(work_item_id, sequence = seq, "Trace appended");
                Ok(trace)
            }
        }
    }

    fn query(&self, work_item_id: &str) -> TraceResult<IntelligenceTrace> {
        self.read(work_item_id)?
            .ok_or_else(|| TraceError::NotFound(work_item_id.to_string()))
    }

    fn query_range(&self, from: &str, to: &str) -> TraceResult<Vec<IntelligenceTrace>> {
        let from_seq = self.sequence_of(from)?;
        let to_seq = self.sequence_of(to)?;
        if from_seq > to_seq {
            return Ok(Vec::new());
        }

        let ids: Vec<WorkItemId> = {
            let order = self.order.read().map_err(|_| TraceError::LockPoisoned)?;
            order
                .range(from_seq..=to_seq)
                .map(|(_, id)| id.clone())
                .collect()
        };
        self.read_all(ids)
    }

    fn recent(&self, limit: usize) -> TraceResult<Vec<IntelligenceTrace>> {
        let mut ids: Vec<WorkItemId> = {
            let order = self.order.read().map_err(|_| TraceError::LockPoisoned)?;
            order.values().rev().take(limit).cloned().collect()
        };
        ids.reverse();
        self.read_all(ids)
    }

    fn contains(&self, work_item_id: &str) -> bool {
        self.index.contains_key(work_item_id)
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}
