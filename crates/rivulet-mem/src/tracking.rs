//! High-water mark of budget usage for run reports.
//!
//! The exec driver samples the run budget on a short timer while nodes are
//! running, and once more as each node returns.

use std::sync::atomic::{AtomicUsize, Ordering};

use rivulet_core::budget::MemoryBudget;

#[derive(Debug, Default)]
pub struct PeakTracker {
    peak_bytes: AtomicUsize,
}

impl PeakTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample<B: MemoryBudget>(&self, budget: &B) {
        let used = budget.used_bytes();
        let before = self.peak_bytes.fetch_max(used, Ordering::AcqRel);
        #[cfg(feature = "tracing")]
        if used > before {
            tracing::trace!(used, capacity = budget.capacity_bytes(), "new memory peak");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = before;
    }

    pub fn peak(&self) -> usize {
        self.peak_bytes.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::MemoryBudgetImpl;

    #[test]
    fn keeps_highest_sample() {
        let budget = MemoryBudgetImpl::new(1000);
        let tracker = PeakTracker::new();
        let big = budget.acquire(700, "t").unwrap();
        tracker.sample(&budget);
        drop(big);
        let _small = budget.acquire(100, "t").unwrap();
        tracker.sample(&budget);
        assert_eq!(tracker.peak(), 700);
    }
}
