//! Temp-directory rotation for spill files.
//!
//! A run gets one `TempSpace` built from `EngineConfig::temp_dirs`. Every
//! directory is namespaced by the run id, so concurrent runs sharing a temp
//! directory never see each other's files. Callers take directories
//! round-robin to spread spill I/O across devices.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rivulet_core::config::EngineConfig;
use rivulet_core::id::RunId;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct TempSpace {
    dirs: Arc<Vec<PathBuf>>,
    next: Arc<AtomicUsize>,
}

impl TempSpace {
    /// One `run-<id>` directory under each of `roots`. Nothing is created yet.
    pub fn new<P: AsRef<Path>>(roots: &[P], run: RunId) -> Result<Self> {
        if roots.is_empty() {
            return Err(Error::Config("no temp directories configured".into()));
        }
        let dirs = roots
            .iter()
            .map(|r| r.as_ref().join(format!("run-{}", run.short())))
            .collect();
        Ok(Self {
            dirs: Arc::new(dirs),
            next: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn from_config(cfg: &EngineConfig, run: RunId) -> Result<Self> {
        Self::new(&cfg.temp_dirs, run)
    }

    /// Next directory in rotation, created on demand.
    pub fn next_dir(&self) -> Result<PathBuf> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.dirs.len();
        let dir = &self.dirs[idx];
        fs::create_dir_all(dir)?;
        Ok(dir.clone())
    }

    /// A fresh sub-directory path for one node's spill segments.
    pub fn node_dir(&self, node: &str) -> Result<PathBuf> {
        Ok(self.next_dir()?.join(sanitize(node)))
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Remove every run directory. Missing directories are fine.
    pub fn cleanup(&self) -> Result<()> {
        for dir in self.dirs.iter() {
            match fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_and_cleans_up() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let space = TempSpace::new(&[a.path(), b.path()], RunId::random()).unwrap();

        let first = space.next_dir().unwrap();
        let second = space.next_dir().unwrap();
        let third = space.next_dir().unwrap();
        assert!(first.starts_with(a.path()));
        assert!(second.starts_with(b.path()));
        assert_eq!(first, third);
        assert!(first.is_dir());

        let node = space.node_dir("sort/1 by key").unwrap();
        assert!(node.ends_with("sort_1_by_key"));

        space.cleanup().unwrap();
        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[test]
    fn empty_root_list_is_rejected() {
        let roots: [&Path; 0] = [];
        assert!(TempSpace::new(&roots, RunId::random()).is_err());
    }
}
