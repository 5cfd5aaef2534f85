//! In-memory hash index over the slave side of a join.
//!
//! Records are owned copies kept in an arena; the map goes from the
//! materialized key (`KeyValues`) to one arena slot (keep-last) or a chain of
//! slots (duplicates allowed). Every stored byte is accounted on a budget
//! guard; when the budget refuses, the insert fails with `OpError::Resource`.

use std::cell::Cell;
use std::collections::HashMap;

use rivulet_core::key::{KeyValues, RecordKey};
use rivulet_core::types::Record;
use rivulet_mem::BudgetGuardImpl;

use crate::traits::{OpError, Result};

/// Rough per-entry bookkeeping cost on top of the record itself.
const ENTRY_OVERHEAD: usize = 48;

#[derive(Debug)]
struct Entry {
    record: Record,
    used: Cell<bool>,
}

#[derive(Debug)]
enum Slot {
    Single(usize),
    Chain(Vec<usize>),
}

impl Slot {
    fn indices(&self) -> &[usize] {
        match self {
            Slot::Single(i) => std::slice::from_ref(i),
            Slot::Chain(v) => v,
        }
    }
}

#[derive(Debug)]
pub struct HashIndex {
    key: RecordKey,
    duplicates: bool,
    entries: Vec<Entry>,
    slots: HashMap<KeyValues, Slot>,
    /// Records whose key can never match (NULL with strict NULL equality).
    parked: Vec<Record>,
    guard: BudgetGuardImpl,
}

impl HashIndex {
    pub fn new(key: RecordKey, duplicates: bool, capacity: usize, guard: BudgetGuardImpl) -> Self {
        Self {
            key,
            duplicates,
            entries: Vec::new(),
            slots: HashMap::with_capacity(capacity),
            parked: Vec::new(),
            guard,
        }
    }

    fn account(&mut self, bytes: usize) -> Result<()> {
        grow(&mut self.guard, bytes, self.entries.len())
    }

    /// Store a record. With keep-last semantics a later record with an equal
    /// key replaces the earlier one.
    pub fn insert(&mut self, record: Record) -> Result<()> {
        let cost = record.approx_bytes() + ENTRY_OVERHEAD;
        if !self.key.equal_null() && self.key.has_null(&record) {
            self.account(cost)?;
            self.parked.push(record);
            return Ok(());
        }
        let values = self.key.values(&record);
        match self.slots.get_mut(&values) {
            Some(Slot::Single(idx)) if !self.duplicates => {
                let idx = *idx;
                let old = self.entries[idx].record.approx_bytes();
                let new = record.approx_bytes();
                if new > old {
                    grow(&mut self.guard, new - old, self.entries.len())?;
                } else {
                    self.guard.shrink(old - new);
                }
                self.entries[idx].record = record;
            }
            Some(slot) => {
                let idx = self.entries.len();
                grow(&mut self.guard, cost + std::mem::size_of::<usize>(), idx)?;
                match slot {
                    Slot::Single(first) => *slot = Slot::Chain(vec![*first, idx]),
                    Slot::Chain(chain) => chain.push(idx),
                }
                self.entries.push(Entry {
                    record,
                    used: Cell::new(false),
                });
            }
            None => {
                self.account(cost + values.0.len() * 32)?;
                let idx = self.entries.len();
                self.entries.push(Entry {
                    record,
                    used: Cell::new(false),
                });
                self.slots.insert(values, Slot::Single(idx));
            }
        }
        Ok(())
    }

    /// Arena slots whose key equals the key of `record`, described by
    /// `probe_key`, in insertion order.
    pub fn matches(&self, probe_key: &RecordKey, record: &Record) -> &[usize] {
        if !self.key.equal_null() && probe_key.has_null(record) {
            return &[];
        }
        self.slots
            .get(&probe_key.values(record))
            .map(Slot::indices)
            .unwrap_or(&[])
    }

    pub fn record(&self, idx: usize) -> &Record {
        &self.entries[idx].record
    }

    pub fn mark_used(&self, idx: usize) {
        if let Some(e) = self.entries.get(idx) {
            e.used.set(true);
        }
    }

    /// Records never passed to `mark_used`, in insertion order, followed by
    /// the records that could not be indexed.
    pub fn unmatched(&self) -> impl Iterator<Item = &Record> {
        self.entries
            .iter()
            .filter(|e| !e.used.get())
            .map(|e| &e.record)
            .chain(self.parked.iter())
    }

    /// Distinct keys held.
    pub fn key_count(&self) -> usize {
        self.slots.len()
    }

    /// Records held, including unindexable ones.
    pub fn len(&self) -> usize {
        self.entries.len() + self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> usize {
        rivulet_core::budget::BudgetGuard::bytes(&self.guard)
    }
}

fn grow(guard: &mut BudgetGuardImpl, bytes: usize, records: usize) -> Result<()> {
    if guard.try_grow(bytes) {
        return Ok(());
    }
    Err(OpError::Resource(format!(
        "hash index: memory budget refused {bytes} more bytes after {records} records ({} bytes held)",
        rivulet_core::budget::BudgetGuard::bytes(guard)
    )))
}
