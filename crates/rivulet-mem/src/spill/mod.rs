//! Spilling for external-memory operators.
//!
//! Two shapes of spill exist:
//! - [`SpillManager`]: named, checksummed segments holding chunks of sorted
//!   records on a [`Storage`] backend. Used by the external sorter for runs.
//! - [`buffer::SpillBuffer`]: an append-then-replay file for one input stream,
//!   used by the cross join.

pub mod buffer;
pub mod codec;
pub mod segment;

use std::collections::HashMap;
use std::sync::Arc;

use rivulet_core::id::SpillId;
use rivulet_core::types::Record;

use crate::error::{Error, Result};
use crate::guard::MemoryBudgetImpl;

pub use codec::Codec;
pub use segment::{SegmentHeader, SegmentMeta, SegmentName, HEADER_LEN};

/// Abstract storage interface for spill segments.
///
/// Implemented by `rivulet-io::FsStorage` (local directories) and
/// `rivulet-io::MemoryStorage` (tests).
pub trait Storage: Send + Sync {
    /// Write bytes to a path. Creates parent directories if needed.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read a byte range from a path. Returns at most `len` bytes.
    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Delete a path. Idempotent (no error if path doesn't exist).
    fn delete(&self, path: &str) -> Result<()>;

    /// List all paths under a prefix (cleanup/debugging).
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Size of a path in bytes.
    fn size(&self, path: &str) -> Result<u64>;
}

/// Writes and reads chunks of records for one spilling operator instance.
///
/// Owned by the operator (no sharing across nodes); `delete_all` is called on
/// reset and drop so no segment outlives its run.
pub struct SpillManager {
    storage: Arc<dyn Storage>,
    codec: Codec,
    root_dir: String,
    spill_id: SpillId,
    next_run: u32,
    segments: HashMap<SegmentName, SegmentMeta>,
    bytes_written: u64,
}

impl SpillManager {
    pub fn new(storage: Arc<dyn Storage>, codec: Codec, root_dir: String, spill_id: SpillId) -> Self {
        Self {
            storage,
            codec,
            root_dir,
            spill_id,
            next_run: 0,
            segments: HashMap::new(),
            bytes_written: 0,
        }
    }

    /// Write one chunk of a run as a self-verifying segment:
    /// `[header][payload]`, where the payload is the JSON chunk after the
    /// codec and the checksum covers both parts.
    pub fn write_chunk(
        &mut self,
        records: &[Record],
        run_index: u32,
        chunk_index: u32,
    ) -> Result<SegmentMeta> {
        let json = serde_json::to_vec(records).map_err(|e| Error::Codec {
            codec: "json",
            msg: e.to_string(),
        })?;
        let payload = self.codec.compress(&json)?;
        let header = SegmentHeader::new(self.codec, json.len() as u64, payload.len() as u64);

        let mut segment = header.to_bytes();
        segment.extend_from_slice(&payload);
        let checksum = digest(&segment);

        let name = SegmentName::new(self.spill_id, run_index, chunk_index);
        let path = format!("{}/{}.seg", self.root_dir, name.0);
        self.storage.write(&path, &segment)?;
        self.bytes_written += segment.len() as u64;

        #[cfg(feature = "tracing")]
        tracing::trace!(segment = %name.0, records = records.len(), bytes = segment.len(), "spilled chunk");

        let meta = SegmentMeta {
            name: name.clone(),
            path,
            codec: self.codec,
            records: records.len() as u64,
            uncompressed_len: header.uncompressed_len,
            compressed_len: header.compressed_len,
            checksum,
        };
        self.segments.insert(name, meta.clone());
        Ok(meta)
    }

    /// Read a chunk back. The decoded chunk is charged to `budget` while it
    /// is being decoded; the caller accounts for the records it keeps.
    pub fn read_chunk(&self, meta: &SegmentMeta, budget: &MemoryBudgetImpl) -> Result<Vec<Record>> {
        let segment = self.load_verified(meta)?;
        let header = SegmentHeader::from_bytes(&segment[..HEADER_LEN])?;

        let _decoding = budget.acquire(header.uncompressed_len as usize, "spill_decode")?;
        let json = header.codec.decompress(&segment[HEADER_LEN..], header.uncompressed_len as usize)?;
        serde_json::from_slice(&json).map_err(|e| Error::Codec {
            codec: "json",
            msg: e.to_string(),
        })
    }

    fn load_verified(&self, meta: &SegmentMeta) -> Result<Vec<u8>> {
        let expected = HEADER_LEN + meta.compressed_len as usize;
        let segment = self.storage.read_range(&meta.path, 0, expected)?;
        if segment.len() < expected {
            return Err(Error::Storage(format!(
                "segment {} truncated: {} of {expected} bytes",
                meta.name.0,
                segment.len()
            )));
        }
        if digest(&segment) != meta.checksum {
            return Err(Error::ChecksumMismatch(meta.name.0.clone()));
        }
        Ok(segment)
    }

    /// Generate a unique run index for this spill session.
    pub fn next_run_index(&mut self) -> u32 {
        let idx = self.next_run;
        self.next_run += 1;
        idx
    }

    /// Delete a segment from storage and forget its metadata.
    pub fn delete_segment(&mut self, name: &SegmentName) -> Result<()> {
        if let Some(meta) = self.segments.remove(name) {
            self.storage.delete(&meta.path)?;
        }
        Ok(())
    }

    /// Delete every segment this manager wrote. Idempotent.
    pub fn delete_all(&mut self) -> Result<()> {
        for (_, meta) in self.segments.drain() {
            self.storage.delete(&meta.path)?;
        }
        Ok(())
    }

    pub fn list_segments(&self) -> Vec<SegmentName> {
        self.segments.keys().cloned().collect()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    blake3::hash(bytes).into()
}

impl Drop for SpillManager {
    fn drop(&mut self) {
        if let Err(_e) = self.delete_all() {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_e, "spill segments left behind");
        }
    }
}
