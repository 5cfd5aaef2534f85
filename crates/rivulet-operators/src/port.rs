//! Ports: blocking, bounded record channels between nodes.
//!
//! A read returns `Ok(None)` at EOF and keeps returning it afterwards. Every
//! record handed out is owned by the caller; keeping one across iterations is
//! a move or an explicit `clone()`.
//!
//! [`channel`] builds a connected pair on top of `std::sync::mpsc::sync_channel`,
//! so a writer blocks once `capacity` records are in flight. [`VecInput`] and
//! [`VecOutput`] are in-memory ends for tests and embedding.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex};

use rivulet_core::types::Record;

use crate::traits::{OpError, Result};

pub trait InputPort: Send {
    /// Next record, or `None` once the upstream signalled EOF.
    fn read(&mut self) -> Result<Option<Record>>;

    fn records_read(&self) -> u64;
}

pub trait OutputPort: Send {
    fn write(&mut self, record: Record) -> Result<()>;

    /// Signal end of stream. Idempotent.
    fn eof(&mut self) -> Result<()>;

    fn records_written(&self) -> u64;
}

/// A connected pair of ports holding at most `capacity` records in flight.
pub fn channel(capacity: usize) -> (ChannelOutput, ChannelInput) {
    let (tx, rx) = std::sync::mpsc::sync_channel(capacity.max(1));
    (
        ChannelOutput {
            tx: Some(tx),
            written: 0,
        },
        ChannelInput {
            rx,
            done: false,
            read: 0,
        },
    )
}

pub struct ChannelInput {
    rx: Receiver<Option<Record>>,
    done: bool,
    read: u64,
}

impl InputPort for ChannelInput {
    fn read(&mut self) -> Result<Option<Record>> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv() {
            Ok(Some(record)) => {
                self.read += 1;
                Ok(Some(record))
            }
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(_) => Err(OpError::Port("upstream closed without EOF".into())),
        }
    }

    fn records_read(&self) -> u64 {
        self.read
    }
}

pub struct ChannelOutput {
    tx: Option<SyncSender<Option<Record>>>,
    written: u64,
}

impl OutputPort for ChannelOutput {
    fn write(&mut self, record: Record) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| OpError::Port("write after EOF".into()))?;
        tx.send(Some(record))
            .map_err(|_| OpError::Port("downstream closed".into()))?;
        self.written += 1;
        Ok(())
    }

    fn eof(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.send(None)
                .map_err(|_| OpError::Port("downstream closed before EOF".into()))?;
        }
        Ok(())
    }

    fn records_written(&self) -> u64 {
        self.written
    }
}

/// Input port over a fixed list of records.
pub struct VecInput {
    records: std::vec::IntoIter<Record>,
    read: Arc<AtomicU64>,
}

impl VecInput {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into_iter(),
            read: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared read counter; stays readable after the port is boxed away.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.read)
    }
}

impl InputPort for VecInput {
    fn read(&mut self) -> Result<Option<Record>> {
        let next = self.records.next();
        if next.is_some() {
            self.read.fetch_add(1, Ordering::Relaxed);
        }
        Ok(next)
    }

    fn records_read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }
}

/// Output port collecting into a shared vector. Clones see the same records.
#[derive(Debug, Clone, Default)]
pub struct VecOutput {
    records: Arc<Mutex<Vec<Record>>>,
    eof: Arc<AtomicBool>,
}

impl VecOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn saw_eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }
}

impl OutputPort for VecOutput {
    fn write(&mut self, record: Record) -> Result<()> {
        if self.saw_eof() {
            return Err(OpError::Port("write after EOF".into()));
        }
        self.records
            .lock()
            .map_err(|_| OpError::Port("output lock poisoned".into()))?
            .push(record);
        Ok(())
    }

    fn eof(&mut self) -> Result<()> {
        self.eof.store(true, Ordering::Release);
        Ok(())
    }

    fn records_written(&self) -> u64 {
        self.records.lock().map(|r| r.len() as u64).unwrap_or(0)
    }
}

/// Discards everything. Used for unconnected optional outputs.
#[derive(Debug, Default)]
pub struct NullOutput {
    written: u64,
}

impl OutputPort for NullOutput {
    fn write(&mut self, _record: Record) -> Result<()> {
        self.written += 1;
        Ok(())
    }

    fn eof(&mut self) -> Result<()> {
        Ok(())
    }

    fn records_written(&self) -> u64 {
        self.written
    }
}

/// The ports of one node for one `execute`.
pub struct NodeIo {
    pub inputs: Vec<Box<dyn InputPort>>,
    pub outputs: Vec<Box<dyn OutputPort>>,
    eof_sent: bool,
}

impl NodeIo {
    pub fn new(inputs: Vec<Box<dyn InputPort>>, outputs: Vec<Box<dyn OutputPort>>) -> Self {
        Self {
            inputs,
            outputs,
            eof_sent: false,
        }
    }

    /// Fail unless at least `inputs` inputs and `outputs` outputs are attached,
    /// so nodes can index the port vectors afterwards.
    pub fn require(&self, inputs: usize, outputs: usize) -> Result<()> {
        if self.inputs.len() < inputs || self.outputs.len() < outputs {
            return Err(OpError::Config(format!(
                "node needs {inputs} inputs and {outputs} outputs, {} and {} attached",
                self.inputs.len(),
                self.outputs.len()
            )));
        }
        Ok(())
    }

    pub fn has_output(&self, idx: usize) -> bool {
        idx < self.outputs.len()
    }

    /// Signal EOF on every output. Only the first call has an effect.
    pub fn broadcast_eof(&mut self) -> Result<()> {
        if self.eof_sent {
            return Ok(());
        }
        self.eof_sent = true;
        for out in &mut self.outputs {
            out.eof()?;
        }
        Ok(())
    }

    pub fn records_in(&self) -> Vec<u64> {
        self.inputs.iter().map(|p| p.records_read()).collect()
    }

    pub fn records_out(&self) -> Vec<u64> {
        self.outputs.iter().map(|p| p.records_written()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::types::Scalar;

    fn rec(i: i64) -> Record {
        Record::new(vec![Scalar::I64(i)])
    }

    #[test]
    fn channel_delivers_in_order_then_eof() {
        let (mut tx, mut rx) = channel(2);
        let writer = std::thread::spawn(move || {
            for i in 0..10 {
                tx.write(rec(i)).unwrap();
            }
            tx.eof().unwrap();
            tx.eof().unwrap();
            tx.records_written()
        });
        let mut seen = Vec::new();
        while let Some(r) = rx.read().unwrap() {
            seen.push(r);
        }
        assert_eq!(writer.join().unwrap(), 10);
        assert_eq!(seen, (0..10).map(rec).collect::<Vec<_>>());
        assert!(rx.read().unwrap().is_none());
        assert_eq!(rx.records_read(), 10);
    }

    #[test]
    fn dropped_writer_is_a_port_error() {
        let (tx, mut rx) = channel(1);
        drop(tx);
        assert!(matches!(rx.read(), Err(OpError::Port(_))));
    }

    #[test]
    fn broadcast_eof_once() {
        let out = VecOutput::new();
        let mut io = NodeIo::new(vec![], vec![Box::new(out.clone())]);
        io.broadcast_eof().unwrap();
        io.broadcast_eof().unwrap();
        assert!(out.saw_eof());
        assert!(io.require(1, 1).is_err());
    }
}
