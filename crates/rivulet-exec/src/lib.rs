#![forbid(unsafe_code)]
//! rivulet-exec: run-to-completion driver, run reports and metrics.
//!
//! A `Pipeline` is a graph of `Node`s joined by bounded channels. Running it
//! spawns one thread per node, shares one memory budget and one temp space
//! across them, and cancels every node as soon as one fails.

pub mod adapters;
pub mod metrics;
pub mod report;
pub mod runtime;
mod scheduler;

pub use report::{NodeReport, NodeStatus, RunReport};
pub use runtime::{ExecError, Pipeline, Result};
