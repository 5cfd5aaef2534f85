//! Engine configuration shared by every node of a run.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard memory cap (in bytes) shared by all nodes of one run.
    pub mem_cap_bytes: usize,

    /// Directories used for spill files; nodes take them round-robin.
    pub temp_dirs: Vec<String>,

    /// Capacity (records) of each bounded port channel.
    pub port_capacity: usize,

    /// A node yields its thread after this many processed records.
    pub yield_interval: usize,

    /// Spill segment codec: `none`, `zstd` or `lz4`.
    pub spill_codec: String,

    /// Backend for sorter spill segments: `file` (under `temp_dirs`) or `memory`.
    pub spill_storage: String,

    /// Records per spilled segment chunk (external sort runs).
    pub spill_chunk_rows: usize,

    /// Default in-memory buffer (records) for group-local sorting.
    pub sort_buffer_capacity: usize,

    /// Default number of runs merged per pass.
    pub sort_tapes: usize,

    /// Default initial hash table capacity for hash joins.
    pub hash_table_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mem_cap_bytes: 512 * 1024 * 1024, // 512 MiB default
            temp_dirs: vec![default_temp_dir()],
            port_capacity: 256,
            yield_interval: 1,
            spill_codec: "none".to_string(),
            spill_storage: "file".to_string(),
            spill_chunk_rows: 1024,
            sort_buffer_capacity: 10_000,
            sort_tapes: 6,
            hash_table_size: 512,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `RIVULET_MEM_CAP_BYTES`: memory cap in bytes
    /// - `RIVULET_TEMP_DIRS`: `;`-separated spill directories
    /// - `RIVULET_PORT_CAPACITY`: records buffered per port
    /// - `RIVULET_YIELD_INTERVAL`: records between cooperative yields
    /// - `RIVULET_SPILL_CODEC`: `none`, `zstd` or `lz4`
    /// - `RIVULET_SPILL_STORAGE`: `file` or `memory`
    /// - `RIVULET_SORT_BUFFER`: default sort buffer capacity (records)
    /// - `RIVULET_SORT_TAPES`: default merge fan-in
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("RIVULET_MEM_CAP_BYTES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.mem_cap_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("RIVULET_TEMP_DIRS") {
            let dirs: Vec<String> = s
                .split(';')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect();
            if !dirs.is_empty() {
                cfg.temp_dirs = dirs;
            }
        }

        if let Ok(s) = std::env::var("RIVULET_PORT_CAPACITY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.port_capacity = v;
            }
        }

        if let Ok(s) = std::env::var("RIVULET_YIELD_INTERVAL") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.yield_interval = v;
            }
        }

        if let Ok(s) = std::env::var("RIVULET_SPILL_CODEC") {
            cfg.spill_codec = s.trim().to_ascii_lowercase();
        }

        if let Ok(s) = std::env::var("RIVULET_SPILL_STORAGE") {
            cfg.spill_storage = s.trim().to_ascii_lowercase();
        }

        if let Ok(s) = std::env::var("RIVULET_SORT_BUFFER") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.sort_buffer_capacity = v;
            }
        }

        if let Ok(s) = std::env::var("RIVULET_SORT_TAPES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.sort_tapes = v;
            }
        }

        cfg
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<()> {
        if self.temp_dirs.is_empty() {
            return Err(Error::Config("at least one temp directory is required".into()));
        }
        if self.port_capacity == 0 {
            return Err(Error::Config("port_capacity must be positive".into()));
        }
        if self.spill_chunk_rows == 0 {
            return Err(Error::Config("spill_chunk_rows must be positive".into()));
        }
        if self.sort_tapes < 2 {
            return Err(Error::Config(format!(
                "sort_tapes must be at least 2, got {}",
                self.sort_tapes
            )));
        }
        if !matches!(self.spill_codec.as_str(), "none" | "zstd" | "lz4") {
            return Err(Error::Config(format!(
                "unknown spill codec '{}'",
                self.spill_codec
            )));
        }
        if !matches!(self.spill_storage.as_str(), "file" | "memory") {
            return Err(Error::Config(format!(
                "unknown spill storage '{}'",
                self.spill_storage
            )));
        }
        Ok(())
    }
}

fn default_temp_dir() -> String {
    std::env::temp_dir()
        .join("rivulet-spill")
        .to_string_lossy()
        .into_owned()
}
