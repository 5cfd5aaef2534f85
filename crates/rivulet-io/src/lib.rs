#![forbid(unsafe_code)]
//! rivulet-io: storage backends for spill segments, temp-directory rotation,
//! and the CSV/JSONL adapters the CLI uses at the edges of a graph.
//!
//! Nothing here knows about operators. Readers yield `Record`s that already
//! conform to a declared `Schema`; writers render them back out.

pub mod error;
pub mod memory_storage;
pub mod readers;
pub mod storage;
pub mod temp;
pub mod writers;

pub use error::{Error, Result};
pub use memory_storage::MemoryStorage;
pub use storage::{build_storage, FsStorage};
pub use temp::TempSpace;
