//! Identifiers for runs and spill sessions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One spilling session of one node (a sorter, a replay buffer); unique
/// within a run and part of every segment file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpillId(u64);

impl SpillId {
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spill{}", self.0)
    }
}

/// Globally unique id for one graph run; namespaces spill files so that
/// concurrent runs sharing a temp directory never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(uuid::Uuid);

impl RunId {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// 12 hex characters, used in temp directory names.
    pub fn short(&self) -> String {
        let mut s = self.0.simple().to_string();
        s.truncate(12);
        s
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique_and_short() {
        let a = RunId::random();
        let b = RunId::random();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 12);
        assert!(a.to_string().replace('-', "").starts_with(&a.short()));
    }

    #[test]
    fn spill_id_display() {
        assert_eq!(SpillId::new(7).to_string(), "spill7");
        assert_eq!(SpillId::new(7).get(), 7);
    }
}
