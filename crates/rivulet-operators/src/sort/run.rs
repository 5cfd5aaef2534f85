//! Sorted runs on spill storage.
//!
//! A run is written as a sequence of chunk segments of at most `chunk_rows`
//! records each, and read back one chunk at a time, so merging `k` runs keeps
//! at most `k` chunks in memory.

use std::collections::VecDeque;

use rivulet_core::types::Record;
use rivulet_mem::spill::segment::SegmentMeta;
use rivulet_mem::{MemoryBudgetImpl, SpillManager};

use crate::traits::Result;

/// Metadata for a sorted run on disk.
#[derive(Clone, Debug)]
pub struct RunMeta {
    pub index: u32,
    pub records: u64,
    pub chunks: Vec<SegmentMeta>,
}

/// Writes one run, chunk by chunk, in the order records are pushed.
pub struct RunWriter {
    index: u32,
    chunk_rows: usize,
    pending: Vec<Record>,
    chunks: Vec<SegmentMeta>,
    records: u64,
}

impl RunWriter {
    pub fn new(spill: &mut SpillManager, chunk_rows: usize) -> Self {
        Self {
            index: spill.next_run_index(),
            chunk_rows: chunk_rows.max(1),
            pending: Vec::new(),
            chunks: Vec::new(),
            records: 0,
        }
    }

    pub fn push(&mut self, record: Record, spill: &mut SpillManager) -> Result<()> {
        self.pending.push(record);
        self.records += 1;
        if self.pending.len() >= self.chunk_rows {
            self.flush(spill)?;
        }
        Ok(())
    }

    fn flush(&mut self, spill: &mut SpillManager) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk_index = self.chunks.len() as u32;
        let meta = spill.write_chunk(&self.pending, self.index, chunk_index)?;
        self.chunks.push(meta);
        self.pending.clear();
        Ok(())
    }

    pub fn finish(mut self, spill: &mut SpillManager) -> Result<RunMeta> {
        self.flush(spill)?;
        Ok(RunMeta {
            index: self.index,
            records: self.records,
            chunks: self.chunks,
        })
    }
}

/// Write already-sorted records as one run.
pub fn write_run(
    records: impl IntoIterator<Item = Record>,
    spill: &mut SpillManager,
    chunk_rows: usize,
) -> Result<RunMeta> {
    let mut writer = RunWriter::new(spill, chunk_rows);
    for record in records {
        writer.push(record, spill)?;
    }
    writer.finish(spill)
}

/// Streams a run back in order, loading one chunk at a time.
pub struct RunCursor {
    chunks: VecDeque<SegmentMeta>,
    current: std::vec::IntoIter<Record>,
}

impl RunCursor {
    pub fn new(run: &RunMeta) -> Self {
        Self {
            chunks: run.chunks.iter().cloned().collect(),
            current: Vec::new().into_iter(),
        }
    }

    pub fn next(&mut self, spill: &SpillManager, budget: &MemoryBudgetImpl) -> Result<Option<Record>> {
        loop {
            if let Some(record) = self.current.next() {
                return Ok(Some(record));
            }
            let Some(chunk) = self.chunks.pop_front() else {
                return Ok(None);
            };
            self.current = spill.read_chunk(&chunk, budget)?.into_iter();
        }
    }
}

/// Remove a run's segments from storage.
pub fn delete_run(run: &RunMeta, spill: &mut SpillManager) -> Result<()> {
    for chunk in &run.chunks {
        spill.delete_segment(&chunk.name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::id::SpillId;
    use rivulet_core::types::Scalar;
    use rivulet_io::MemoryStorage;
    use rivulet_mem::Codec;
    use std::sync::Arc;

    #[test]
    fn run_roundtrips_across_chunks() {
        let storage = MemoryStorage::new();
        let mut spill = SpillManager::new(
            Arc::new(storage.clone()),
            Codec::None,
            "runs".into(),
            SpillId::new(1),
        );
        let records: Vec<Record> = (0..10).map(|i| Record::new(vec![Scalar::I64(i)])).collect();
        let run = write_run(records.clone(), &mut spill, 3).unwrap();
        assert_eq!(run.chunks.len(), 4);
        assert_eq!(run.records, 10);

        let budget = MemoryBudgetImpl::new(1 << 20);
        let mut cursor = RunCursor::new(&run);
        let mut back = Vec::new();
        while let Some(r) = cursor.next(&spill, &budget).unwrap() {
            back.push(r);
        }
        assert_eq!(back, records);

        delete_run(&run, &mut spill).unwrap();
        assert!(storage.is_empty());
    }
}
