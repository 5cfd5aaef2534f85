#![forbid(unsafe_code)]
//! rivulet: bounded-memory streaming joins, grouping and sorting.
//!
//! Facade over the workspace crates; integration tests and benches link
//! against this package.

pub use rivulet_core as core;
pub use rivulet_exec as exec;
pub use rivulet_io as io;
pub use rivulet_mem as mem;
pub use rivulet_operators as operators;

pub use rivulet_core::config::EngineConfig;
pub use rivulet_exec::{ExecError, Pipeline, RunReport};
