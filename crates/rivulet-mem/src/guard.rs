//! MemoryBudget + RAII guard implementations.
//!
//! One budget is created per graph run and shared (cheaply cloned) by every
//! node. Operators hold a guard for the bytes their in-memory state occupies
//! and grow it as the state grows; dropping the guard returns the bytes.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rivulet_core::budget::{BudgetGuard, MemoryBudget};

use crate::error::{Error, Result};

/// Hard cap plus the bytes currently granted, shared by every clone.
struct BudgetInner {
    capacity: usize,
    used: AtomicUsize,
}

impl BudgetInner {
    /// All-or-nothing: either the whole request fits under the cap or
    /// nothing is taken.
    fn try_acquire(&self, bytes: usize) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&next| next <= self.capacity)
            })
            .is_ok()
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// The run budget. Clones share one counter.
#[derive(Clone)]
pub struct MemoryBudgetImpl {
    inner: Arc<BudgetInner>,
}

impl MemoryBudgetImpl {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                capacity: capacity_bytes,
                used: AtomicUsize::new(0),
            }),
        }
    }

    /// Like `try_acquire`, but reports exhaustion as an error.
    pub fn acquire(&self, bytes: usize, tag: &'static str) -> Result<BudgetGuardImpl> {
        self.try_acquire(bytes, tag)
            .ok_or_else(|| Error::BudgetRefused {
                tag,
                requested: bytes,
                capacity: self.inner.capacity,
                used: self.inner.used.load(Ordering::Relaxed),
            })
    }

    /// An empty guard that can later be grown with [`BudgetGuardImpl::try_grow`].
    pub fn empty_guard(&self, tag: &'static str) -> BudgetGuardImpl {
        BudgetGuardImpl {
            inner: Arc::clone(&self.inner),
            bytes: 0,
            tag,
        }
    }
}

impl fmt::Debug for MemoryBudgetImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBudgetImpl")
            .field("capacity", &self.inner.capacity)
            .field("used", &self.inner.used.load(Ordering::Relaxed))
            .finish()
    }
}

/// Bytes held by one piece of operator state; returned on drop.
pub struct BudgetGuardImpl {
    inner: Arc<BudgetInner>,
    bytes: usize,
    tag: &'static str,
}

impl Drop for BudgetGuardImpl {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.inner.release(self.bytes);
            self.bytes = 0;
        }
    }
}

impl fmt::Debug for BudgetGuardImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetGuardImpl")
            .field("tag", &self.tag)
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl BudgetGuard for BudgetGuardImpl {
    fn bytes(&self) -> usize {
        self.bytes
    }
    fn tag(&self) -> &'static str {
        self.tag
    }
}

impl BudgetGuardImpl {
    /// Try to account `delta` more bytes. Returns false (and changes nothing)
    /// when the budget cannot cover them.
    pub fn try_grow(&mut self, delta: usize) -> bool {
        if delta == 0 {
            return true;
        }
        if self.inner.try_acquire(delta) {
            self.bytes += delta;
            true
        } else {
            false
        }
    }

    /// Give back up to `delta` bytes.
    pub fn shrink(&mut self, delta: usize) {
        let delta = delta.min(self.bytes);
        self.inner.release(delta);
        self.bytes -= delta;
    }

    /// Return everything to the budget but keep the guard for reuse.
    pub fn release_all(&mut self) {
        let all = self.bytes;
        self.shrink(all);
    }
}

impl MemoryBudget for MemoryBudgetImpl {
    type Guard = BudgetGuardImpl;

    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard> {
        if bytes == 0 {
            return Some(self.empty_guard(tag));
        }
        if self.inner.try_acquire(bytes) {
            Some(BudgetGuardImpl {
                inner: Arc::clone(&self.inner),
                bytes,
                tag,
            })
        } else {
            None
        }
    }

    fn capacity_bytes(&self) -> usize {
        self.inner.capacity
    }

    fn used_bytes(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_and_shrink_track_usage() {
        let budget = MemoryBudgetImpl::new(100);
        let mut g = budget.empty_guard("test");
        assert!(g.try_grow(60));
        assert!(!g.try_grow(50));
        assert_eq!(budget.used_bytes(), 60);
        g.shrink(20);
        assert_eq!(budget.used_bytes(), 40);
        g.release_all();
        assert_eq!(budget.used_bytes(), 0);
        assert!(g.try_grow(100));
        drop(g);
        assert_eq!(budget.used_bytes(), 0);
    }

    #[test]
    fn acquire_reports_exhaustion() {
        let budget = MemoryBudgetImpl::new(10);
        let _held = budget.acquire(8, "a").unwrap();
        let err = budget.acquire(8, "b").unwrap_err();
        assert!(matches!(err, Error::BudgetRefused { tag: "b", .. }));
    }
}
