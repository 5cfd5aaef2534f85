//! Append-then-replay record buffer backed by an anonymous temp file.
//!
//! The two phases are separate types: a [`SpillBuffer`] only accepts appends,
//! and [`SpillBuffer::seal`] turns it into a [`SpillReplay`] that only reads.
//! Each record is framed as `[len: u32 LE][json bytes]`.
//!
//! The file is created with `tempfile::tempfile_in`, so the OS reclaims it
//! when the handle is dropped, including on panic.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use rivulet_core::types::Record;

use crate::error::{Error, Result};

/// Largest frame accepted on replay.
const MAX_FRAME: u32 = 64 * 1024 * 1024;

fn io_err(what: &str, e: std::io::Error) -> Error {
    Error::Buffer(format!("{what}: {e}"))
}

#[derive(Debug)]
pub struct SpillBuffer {
    writer: BufWriter<File>,
    records: u64,
    bytes: u64,
}

impl SpillBuffer {
    /// Create a buffer whose backing file lives in `dir`.
    pub fn create_in(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| io_err("create temp dir", e))?;
        let file = tempfile::tempfile_in(dir)
            .map_err(|e| io_err(&format!("create temp file in {}", dir.display()), e))?;
        Ok(Self {
            writer: BufWriter::new(file),
            records: 0,
            bytes: 0,
        })
    }

    pub fn append(&mut self, record: &Record) -> Result<()> {
        let payload = serde_json::to_vec(record).map_err(|e| Error::Buffer(e.to_string()))?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|l| *l <= MAX_FRAME)
            .ok_or_else(|| Error::Buffer(format!("record of {} bytes too large", payload.len())))?;
        self.writer
            .write_all(&len.to_le_bytes())
            .and_then(|_| self.writer.write_all(&payload))
            .map_err(|e| io_err("append", e))?;
        self.records += 1;
        self.bytes += 4 + payload.len() as u64;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Finish writing and position for the first replay.
    pub fn seal(self) -> Result<SpillReplay> {
        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| io_err("flush", e.into_error()))?;
        file.seek(SeekFrom::Start(0)).map_err(|e| io_err("rewind", e))?;
        Ok(SpillReplay {
            reader: BufReader::new(file),
            records: self.records,
            bytes: self.bytes,
            position: 0,
        })
    }
}

/// Read side of a sealed buffer. Can be rewound any number of times.
#[derive(Debug)]
pub struct SpillReplay {
    reader: BufReader<File>,
    records: u64,
    bytes: u64,
    position: u64,
}

impl SpillReplay {
    pub fn rewind(&mut self) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| io_err("rewind", e))?;
        self.position = 0;
        Ok(())
    }

    /// Next record of the current pass, or `None` once all appended records
    /// have been returned.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if self.position == self.records {
            return Ok(None);
        }
        let mut len_bytes = [0u8; 4];
        match self.reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(Error::Buffer(format!(
                    "buffer truncated after {} of {} records",
                    self.position, self.records
                )))
            }
            Err(e) => return Err(io_err("read frame", e)),
        }
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_FRAME {
            return Err(Error::Buffer(format!("corrupt frame length {len}")));
        }
        let mut payload = vec![0u8; len as usize];
        self.reader
            .read_exact(&mut payload)
            .map_err(|e| io_err("read payload", e))?;
        let record = serde_json::from_slice(&payload).map_err(|e| Error::Buffer(e.to_string()))?;
        self.position += 1;
        Ok(Some(record))
    }

    pub fn len(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::types::Scalar;

    fn rec(i: i64) -> Record {
        Record::new(vec![Scalar::I64(i), Scalar::Null, Scalar::Str(format!("v{i}"))])
    }

    #[test]
    fn replays_in_append_order_many_times() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = SpillBuffer::create_in(dir.path()).unwrap();
        for i in 0..50 {
            buf.append(&rec(i)).unwrap();
        }
        assert_eq!(buf.len(), 50);
        let mut replay = buf.seal().unwrap();

        for _pass in 0..3 {
            let mut seen = Vec::new();
            while let Some(r) = replay.next_record().unwrap() {
                seen.push(r);
            }
            assert_eq!(seen, (0..50).map(rec).collect::<Vec<_>>());
            assert!(replay.next_record().unwrap().is_none());
            replay.rewind().unwrap();
        }
    }

    #[test]
    fn empty_buffer_replays_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let buf = SpillBuffer::create_in(dir.path()).unwrap();
        assert!(buf.is_empty());
        let mut replay = buf.seal().unwrap();
        assert!(replay.next_record().unwrap().is_none());
    }

    #[test]
    fn backing_file_is_anonymous() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = SpillBuffer::create_in(dir.path()).unwrap();
        buf.append(&rec(1)).unwrap();
        let _replay = buf.seal().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn non_finite_floats_replay_bit_exact() {
        let specials = [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0];
        let dir = tempfile::tempdir().unwrap();
        let mut buf = SpillBuffer::create_in(dir.path()).unwrap();
        for v in specials {
            buf.append(&Record::new(vec![Scalar::F64(v), Scalar::F32(v as f32)])).unwrap();
        }
        let mut replay = buf.seal().unwrap();
        for _pass in 0..2 {
            for v in specials {
                let r = replay.next_record().unwrap().unwrap();
                match r.values() {
                    [Scalar::F64(a), Scalar::F32(b)] => {
                        assert_eq!(a.to_bits(), v.to_bits());
                        assert_eq!(b.to_bits(), (v as f32).to_bits());
                    }
                    other => panic!("unexpected {other:?}"),
                }
            }
            assert!(replay.next_record().unwrap().is_none());
            replay.rewind().unwrap();
        }
    }
}
