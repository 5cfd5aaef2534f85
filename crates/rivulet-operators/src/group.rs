//! Group boundary detection over a key-sorted stream.
//!
//! A group is a maximal run of consecutive records with equal keys. The
//! detector also enforces the configured input order: a key that moves
//! backwards is an `OpError::OrderViolation`.

use std::cmp::Ordering;

use rivulet_core::key::RecordKey;
use rivulet_core::types::Record;

use crate::traits::{OpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderMode {
    Ascending,
    Descending,
    /// Any key change starts a new group; no order check.
    Ignore,
    /// The first key change commits the direction.
    Auto,
}

impl OrderMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" | "asc" | "ascending" => Ok(OrderMode::Ascending),
            "d" | "desc" | "descending" => Ok(OrderMode::Descending),
            "i" | "ignore" => Ok(OrderMode::Ignore),
            "auto" => Ok(OrderMode::Auto),
            other => Err(OpError::Config(format!("unknown order '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// First record of the stream.
    First,
    /// Same group as the previous record.
    Same,
    /// Starts a new group; the previous one is closed.
    New,
}

#[derive(Debug)]
pub struct GroupDetector {
    key: RecordKey,
    mode: OrderMode,
    committed: Option<Ordering>,
    previous: Option<Record>,
}

impl GroupDetector {
    pub fn new(key: RecordKey, mode: OrderMode) -> Self {
        let committed = match mode {
            OrderMode::Ascending => Some(Ordering::Less),
            OrderMode::Descending => Some(Ordering::Greater),
            OrderMode::Ignore | OrderMode::Auto => None,
        };
        Self {
            key,
            mode,
            committed,
            previous: None,
        }
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    /// Classify `record` relative to the previous one and remember a copy of
    /// it for the next call.
    pub fn observe(&mut self, record: &Record) -> Result<Boundary> {
        let boundary = match self.previous.take() {
            None => Boundary::First,
            Some(prev) => {
                let ord = self.key.compare(&prev, record);
                if ord == Ordering::Equal && self.key.equals(&prev, record) {
                    Boundary::Same
                } else {
                    let checked = self.check_order(ord, &prev, record);
                    self.previous = Some(prev);
                    checked?;
                    Boundary::New
                }
            }
        };
        self.previous = Some(record.clone());
        Ok(boundary)
    }

    fn check_order(&mut self, ord: Ordering, prev: &Record, next: &Record) -> Result<()> {
        // Equal ordering with unequal keys only happens for strict NULLs.
        if ord == Ordering::Equal || self.mode == OrderMode::Ignore {
            return Ok(());
        }
        match self.committed {
            None => {
                tracing::debug!(direction = ?ord, "group order committed");
                self.committed = Some(ord);
                Ok(())
            }
            Some(dir) if dir == ord => Ok(()),
            Some(_) => Err(OpError::OrderViolation(format!(
                "key [{}] out of order: {:?} followed by {:?}",
                self.key.field_names().join(","),
                self.key.values(prev).0,
                self.key.values(next).0,
            ))),
        }
    }

    /// Forget the previous record; the next `observe` returns `First`.
    pub fn reset(&mut self) {
        self.previous = None;
        if self.mode == OrderMode::Auto {
            self.committed = None;
        }
    }
}
