//! Bounded-memory external sort with run generation and k-way merge.
//!
//! Records are buffered until the buffer holds `capacity` records or the
//! memory budget refuses to grow; the buffer is then stably sorted and
//! written out as a run. `drain` merges the runs, at most `tapes` at a time,
//! into the sink. Ties are broken by run index, and runs are created in
//! arrival order, so the result is identical to a stable in-memory sort.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rivulet_core::key::RecordKey;
use rivulet_core::types::Record;
use rivulet_mem::{BudgetGuardImpl, MemoryBudgetImpl, SpillManager};

use crate::context::NodeContext;
use crate::traits::{OpError, Result};

use super::run::{delete_run, write_run, RunCursor, RunMeta, RunWriter};

pub struct ExternalSorter {
    key: RecordKey,
    capacity: usize,
    tapes: usize,
    chunk_rows: usize,
    buffer: Vec<Record>,
    guard: BudgetGuardImpl,
    runs: Vec<RunMeta>,
    spill: Option<SpillManager>,
    pending: u64,
}

impl ExternalSorter {
    pub fn new(
        key: RecordKey,
        capacity: usize,
        tapes: usize,
        chunk_rows: usize,
        guard: BudgetGuardImpl,
    ) -> Self {
        Self {
            key,
            capacity: capacity.max(1),
            tapes: tapes.max(2),
            chunk_rows: chunk_rows.max(1),
            buffer: Vec::new(),
            guard,
            runs: Vec::new(),
            spill: None,
            pending: 0,
        }
    }

    /// Records put since the last drain or reset.
    pub fn len(&self) -> u64 {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn spilled_bytes(&self) -> u64 {
        self.spill.as_ref().map(SpillManager::bytes_written).unwrap_or(0)
    }

    pub fn put(&mut self, record: Record, ctx: &NodeContext) -> Result<()> {
        let bytes = record.approx_bytes();
        if self.buffer.len() >= self.capacity || !self.guard.try_grow(bytes) {
            self.spill_buffer(ctx)?;
            if !self.guard.try_grow(bytes) {
                return Err(OpError::Resource(format!(
                    "sort buffer: memory budget cannot hold a single record of {bytes} bytes"
                )));
            }
        }
        self.buffer.push(record);
        self.pending += 1;
        Ok(())
    }

    fn sort_buffer(&mut self) {
        let key = &self.key;
        self.buffer.sort_by(|a, b| key.compare(a, b));
    }

    fn spill_manager(&mut self, ctx: &NodeContext) -> Result<&mut SpillManager> {
        if self.spill.is_none() {
            self.spill = Some(ctx.spill_manager()?);
        }
        self.spill
            .as_mut()
            .ok_or_else(|| OpError::Exec("spill manager unavailable".into()))
    }

    fn spill_buffer(&mut self, ctx: &NodeContext) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.sort_buffer();
        let records = std::mem::take(&mut self.buffer);
        let chunk_rows = self.chunk_rows;
        let spill = self.spill_manager(ctx)?;
        let run = write_run(records, spill, chunk_rows)?;
        tracing::debug!(
            node = ctx.node(),
            run = run.index,
            records = run.records,
            "sort buffer spilled"
        );
        self.runs.push(run);
        self.guard.release_all();
        Ok(())
    }

    /// Emit everything put so far in key order, then clear the sorter for
    /// the next batch.
    pub fn drain<F>(&mut self, ctx: &NodeContext, mut sink: F) -> Result<()>
    where
        F: FnMut(Record) -> Result<()>,
    {
        self.pending = 0;
        if self.runs.is_empty() {
            if self.buffer.len() > 1 {
                self.sort_buffer();
            }
            for record in self.buffer.drain(..) {
                sink(record)?;
            }
            self.guard.release_all();
            return Ok(());
        }

        self.spill_buffer(ctx)?;
        let budget = ctx.budget().clone();
        let (key, tapes, chunk_rows) = (self.key.clone(), self.tapes, self.chunk_rows);
        let mut runs = std::mem::take(&mut self.runs);
        let spill = self.spill_manager(ctx)?;

        while runs.len() > tapes {
            tracing::debug!(node = ctx.node(), runs = runs.len(), tapes, "intermediate merge pass");
            let mut merged = Vec::with_capacity(runs.len().div_ceil(tapes));
            for group in runs.chunks(tapes) {
                let mut writer = RunWriter::new(spill, chunk_rows);
                let mut to_run = |record: Record, spill: &mut SpillManager| writer.push(record, spill);
                merge_runs(group, &key, spill, &budget, ctx, &mut to_run)?;
                merged.push(writer.finish(spill)?);
                for run in group {
                    delete_run(run, spill)?;
                }
            }
            runs = merged;
        }

        let mut to_sink = |record: Record, _: &mut SpillManager| sink(record);
        merge_runs(&runs, &key, spill, &budget, ctx, &mut to_sink)?;
        for run in &runs {
            delete_run(run, spill)?;
        }
        Ok(())
    }

    /// Drop buffered records and delete every spilled run.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.guard.release_all();
        self.runs.clear();
        self.pending = 0;
        if let Some(spill) = self.spill.as_mut() {
            if let Err(e) = spill.delete_all() {
                tracing::warn!(error = %e, "failed to delete sort spill segments");
            }
        }
    }
}

/// Merge `runs` in key order; equal keys come out in run order.
fn merge_runs(
    runs: &[RunMeta],
    key: &RecordKey,
    spill: &mut SpillManager,
    budget: &MemoryBudgetImpl,
    ctx: &NodeContext,
    emit: &mut dyn FnMut(Record, &mut SpillManager) -> Result<()>,
) -> Result<()> {
    let mut cursors: Vec<RunCursor> = runs.iter().map(RunCursor::new).collect();
    let mut heap = BinaryHeap::with_capacity(cursors.len());
    for (run, cursor) in cursors.iter_mut().enumerate() {
        if let Some(record) = cursor.next(spill, budget)? {
            heap.push(MergeEntry { key, record, run });
        }
    }
    while let Some(MergeEntry { record, run, .. }) = heap.pop() {
        emit(record, spill)?;
        if let Some(next) = cursors[run].next(spill, budget)? {
            heap.push(MergeEntry {
                key,
                record: next,
                run,
            });
        }
        ctx.checkpoint()?;
    }
    Ok(())
}

/// Entry in the merge heap.
///
/// Ordered by key, then run index, reversed for min-heap behavior.
struct MergeEntry<'k> {
    key: &'k RecordKey,
    record: Record,
    run: usize,
}

impl PartialEq for MergeEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry<'_> {}

impl PartialOrd for MergeEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .compare(&other.record, &self.record)
            .then_with(|| other.run.cmp(&self.run))
    }
}
