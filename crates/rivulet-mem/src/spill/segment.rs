//! Segment file header and metadata.
//!
//! Layout on disk:
//! [ magic: u32 ][ version: u16 ][ codec: u8 ][ reserved: u8 ]
//! [ uncompressed_len: u64 ][ compressed_len: u64 ]
//! [ payload bytes … ]
//!
//! The payload is a JSON array of records. End-to-end checksum is computed
//! over (header || payload) using blake3.

use serde::{Deserialize, Serialize};

use super::Codec;
use crate::error::{Error, Result};
use rivulet_core::id::SpillId;

pub const MAGIC: u32 = 0x544C_5652; // "RVLT"
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 8 + 8;

/// Upper bound accepted when reading a header back; protects against
/// corrupted files asking for absurd allocations.
pub const MAX_SEGMENT_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub magic: u32,
    pub version: u16,
    pub codec: Codec,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
}

impl SegmentHeader {
    pub fn new(codec: Codec, uncompressed_len: u64, compressed_len: u64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            codec,
            uncompressed_len,
            compressed_len,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(self.codec as u8);
        out.push(0u8); // reserved
        out.extend_from_slice(&self.uncompressed_len.to_le_bytes());
        out.extend_from_slice(&self.compressed_len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Storage("short header".into()));
        }
        let magic = u32::from_le_bytes(fixed::<4>(&bytes[0..4]));
        let version = u16::from_le_bytes(fixed::<2>(&bytes[4..6]));
        let codec = Codec::from_u8(bytes[6])?;
        // bytes[7] reserved
        let uncompressed_len = u64::from_le_bytes(fixed::<8>(&bytes[8..16]));
        let compressed_len = u64::from_le_bytes(fixed::<8>(&bytes[16..24]));

        if magic != MAGIC || version != VERSION {
            return Err(Error::Storage("bad magic/version".into()));
        }

        let header = Self {
            magic,
            version,
            codec,
            uncompressed_len,
            compressed_len,
        };
        header.validate_sizes(MAX_SEGMENT_BYTES)?;
        Ok(header)
    }

    fn validate_sizes(&self, max: u64) -> Result<()> {
        if self.uncompressed_len > max || self.compressed_len > max {
            return Err(Error::Storage(format!(
                "segment sizes {}/{} exceed max {}",
                self.uncompressed_len, self.compressed_len, max
            )));
        }
        if self.codec == Codec::None && self.compressed_len != self.uncompressed_len {
            return Err(Error::Storage("uncompressed segment with mismatched lengths".into()));
        }
        Ok(())
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// Human-friendly name for a segment: spill id, run index and chunk index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentName(pub String);

impl SegmentName {
    pub fn new(id: SpillId, run_index: u32, chunk_index: u32) -> Self {
        SegmentName(format!("{id}_run{run_index}_chunk{chunk_index}"))
    }
}

/// Metadata the engine keeps for a spilled segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub name: SegmentName,
    pub path: String,
    pub codec: Codec,
    pub records: u64,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
    pub checksum: [u8; 32],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_and_corruption() {
        let h = SegmentHeader::new(Codec::None, 42, 42);
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        let back = SegmentHeader::from_bytes(&bytes).unwrap();
        assert_eq!(back.uncompressed_len, 42);

        let mut bad = bytes.clone();
        bad[0] ^= 0xff;
        assert!(SegmentHeader::from_bytes(&bad).is_err());
        assert!(SegmentHeader::from_bytes(&bytes[..10]).is_err());
    }
}
