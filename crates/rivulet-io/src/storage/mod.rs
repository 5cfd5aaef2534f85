//! Storage adapters implementing `rivulet_mem::spill::Storage`.
//!
//! - `fs`: local directories (default).
//! - [`crate::memory_storage::MemoryStorage`]: process-local map, for tests and
//!   small runs that must not touch disk.

mod fs;
pub use fs::FsStorage;

use std::sync::Arc;

use rivulet_core::config::EngineConfig;
use rivulet_mem::Storage;

use crate::error::{Error, Result};
use crate::memory_storage::MemoryStorage;

/// Build the spill storage backend named by `cfg.spill_storage`.
pub fn build_storage(cfg: &EngineConfig) -> Result<Arc<dyn Storage>> {
    match cfg.spill_storage.as_str() {
        "file" | "" => Ok(Arc::new(FsStorage::new())),
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        other => Err(Error::Config(format!("unsupported spill storage '{other}'"))),
    }
}
