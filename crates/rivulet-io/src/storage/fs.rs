use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rivulet_mem::error::{Error as MemError, Result as MemResult};
use rivulet_mem::Storage;

/// Spill segments as plain files under the run's temp directory.
#[derive(Debug, Clone, Default)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }
}

fn failed<'a>(op: &'static str, path: &'a str) -> impl FnOnce(io::Error) -> MemError + 'a {
    move |e| MemError::Storage(format!("{op} {path}: {e}"))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

impl Storage for FsStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> MemResult<()> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent).map_err(failed("mkdir", path))?;
        }
        let mut file = File::create(path).map_err(failed("create", path))?;
        file.write_all(bytes).map_err(failed("write", path))?;
        file.flush().map_err(failed("flush", path))
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> MemResult<Vec<u8>> {
        let mut file = File::open(path).map_err(failed("open", path))?;
        file.seek(SeekFrom::Start(offset)).map_err(failed("seek", path))?;
        let mut buf = Vec::with_capacity(len);
        file.take(len as u64)
            .read_to_end(&mut buf)
            .map_err(failed("read", path))?;
        Ok(buf)
    }

    /// Missing files count as deleted.
    fn delete(&self, path: &str) -> MemResult<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(failed("delete", path)(e)),
            _ => Ok(()),
        }
    }

    fn list(&self, prefix: &str) -> MemResult<Vec<String>> {
        let root = Path::new(prefix);
        if root.is_file() {
            return Ok(vec![prefix.to_string()]);
        }
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        collect_files(root, &mut files).map_err(failed("list", prefix))?;
        let mut names: Vec<String> = files
            .into_iter()
            .filter_map(|p| p.to_str().map(str::to_owned))
            .collect();
        names.sort();
        Ok(names)
    }

    fn size(&self, path: &str) -> MemResult<u64> {
        Ok(fs::metadata(path).map_err(failed("stat", path))?.len())
    }
}
