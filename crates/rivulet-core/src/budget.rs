//! Memory accounting seam between operators and the run-wide cap.
//!
//! `rivulet-mem` provides the implementation; keys, ports and operators only
//! see these traits.

/// Bytes held against a [`MemoryBudget`]; released when dropped.
pub trait BudgetGuard: Send {
    fn bytes(&self) -> usize;

    /// Label of the structure the bytes belong to ("hash_index", "sort_buffer").
    fn tag(&self) -> &'static str;
}

/// The cap shared by every node of one run.
///
/// A hash join that cannot reserve its index fails with a resource error; a
/// sorter that cannot grow its buffer spills instead.
pub trait MemoryBudget: Send + Sync + 'static {
    type Guard: BudgetGuard;

    /// `None` when `bytes` would push usage past the capacity.
    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard>;

    fn capacity_bytes(&self) -> usize;

    /// Snapshot of reserved bytes; other nodes may change it concurrently.
    fn used_bytes(&self) -> usize;
}
