//! Sort-merge co-grouping of two key-sorted inputs.
//!
//! Precondition: both inputs are sorted by their key in the key's direction.
//! Every cursor checks this as it reads, so an unsorted input fails with
//! `OpError::OrderViolation` instead of producing wrong matches.
//!
//! One lookahead record per side. Each step compares the two heads:
//! A < B yields A alone, B < A yields B alone, equal keys yield a match.

use std::cmp::Ordering;

use rivulet_core::key::RecordKey;
use rivulet_core::types::Record;

use crate::port::InputPort;
use crate::traits::{OpError, Result};

/// One input's read head.
#[derive(Debug)]
pub struct SortedCursor {
    key: RecordKey,
    head: Option<Record>,
    primed: bool,
    side: &'static str,
}

impl SortedCursor {
    pub fn new(key: RecordKey, side: &'static str) -> Self {
        Self {
            key,
            head: None,
            primed: false,
            side,
        }
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    fn prime(&mut self, input: &mut dyn InputPort) -> Result<()> {
        if !self.primed {
            self.head = input.read()?;
            self.primed = true;
        }
        Ok(())
    }

    pub fn head(&self) -> Option<&Record> {
        self.head.as_ref()
    }

    /// Hand out the head and read the next record, checking that it does not
    /// sort before the one handed out.
    pub fn take(&mut self, input: &mut dyn InputPort) -> Result<Option<Record>> {
        let Some(current) = self.head.take() else {
            return Ok(None);
        };
        self.head = input.read()?;
        if let Some(next) = &self.head {
            if self.key.compare(&current, next) == Ordering::Greater {
                return Err(OpError::OrderViolation(format!(
                    "{} input not sorted by [{}]: {:?} followed by {:?}",
                    self.side,
                    self.key.field_names().join(","),
                    self.key.values(&current).0,
                    self.key.values(next).0,
                )));
            }
        }
        Ok(Some(current))
    }

    pub fn reset(&mut self) {
        self.head = None;
        self.primed = false;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    AOnly(Record),
    /// Equal keys. The B record is `None` when B is not advanced on a match.
    Matched(Record, Option<Record>),
    BOnly(Record),
    Done,
}

#[derive(Debug)]
pub struct CoGroup {
    a: SortedCursor,
    b: SortedCursor,
    advance_b_on_match: bool,
}

impl CoGroup {
    /// Pair two cursors. Fails when the keys differ in arity, types or
    /// per-position sort direction.
    pub fn new(a_key: RecordKey, b_key: RecordKey) -> Result<Self> {
        a_key.check_compatible(&b_key)?;
        for (pos, (fa, fb)) in a_key.fields().iter().zip(b_key.fields()).enumerate() {
            if fa.ascending != fb.ascending {
                return Err(OpError::Config(format!(
                    "key position {pos}: '{}' sorts {} but '{}' sorts {}",
                    fa.name,
                    direction(fa.ascending),
                    fb.name,
                    direction(fb.ascending)
                )));
            }
        }
        Ok(Self {
            a: SortedCursor::new(a_key, "first"),
            b: SortedCursor::new(b_key, "second"),
            advance_b_on_match: true,
        })
    }

    /// Keep B in place on a match, so one B record can match many A records.
    pub fn retain_b_on_match(mut self) -> Self {
        self.advance_b_on_match = false;
        self
    }

    pub fn reset(&mut self) {
        self.a.reset();
        self.b.reset();
    }

    pub fn next(&mut self, a_in: &mut dyn InputPort, b_in: &mut dyn InputPort) -> Result<Step> {
        self.a.prime(a_in)?;
        self.b.prime(b_in)?;
        let ord = match (self.a.head(), self.b.head()) {
            (None, None) => return Ok(Step::Done),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => {
                let ord = self.a.key.compare_with(a, &self.b.key, b);
                // strict NULL keys sort together but never match
                if ord == Ordering::Equal && !self.a.key.equals_with(a, &self.b.key, b) {
                    Ordering::Less
                } else {
                    ord
                }
            }
        };
        match ord {
            Ordering::Less => self.a.take(a_in)?.map(Step::AOnly).ok_or_else(lost_head),
            Ordering::Greater => self.b.take(b_in)?.map(Step::BOnly).ok_or_else(lost_head),
            Ordering::Equal => {
                let a = self.a.take(a_in)?.ok_or_else(lost_head)?;
                let b = if self.advance_b_on_match {
                    Some(self.b.take(b_in)?.ok_or_else(lost_head)?)
                } else {
                    None
                };
                Ok(Step::Matched(a, b))
            }
        }
    }
}

fn direction(ascending: bool) -> &'static str {
    if ascending {
        "ascending"
    } else {
        "descending"
    }
}

fn lost_head() -> OpError {
    OpError::Exec("merge cursor lost its head record".into())
}
