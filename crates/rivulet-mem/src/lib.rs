#![forbid(unsafe_code)]
//! rivulet-mem: hard memory budgeting, spill segments and replay buffers.
//!
//! This crate provides concrete implementations for the *interfaces* defined
//! in `rivulet-core::budget`. In-memory operator state (hash indexes, sort
//! buffers) is accounted through RAII guards from here, and everything that
//! leaves memory goes through either a [`SpillManager`] (checksummed segments
//! on a [`Storage`] backend) or a [`SpillBuffer`] (sequential replay file).
//!
//! Storage backends themselves live in `rivulet-io`.

pub mod error;
pub mod guard;
pub mod spill;
pub mod tracking;

pub use guard::{BudgetGuardImpl, MemoryBudgetImpl};
pub use spill::buffer::{SpillBuffer, SpillReplay};
pub use spill::{Codec, SpillManager, Storage};
pub use tracking::PeakTracker;
