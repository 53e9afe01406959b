// src/fs/mod.rs

use std::fmt::Debug;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub mod mock;

/// Metadata returned by [`FileResolver::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_file: bool,
    pub len: u64,
}

/// File access used by the file and certificate stages.
///
/// `read` is the only required capability. `stat` and `open_read` are
/// optional: the default implementations return `None`, meaning "not
/// supported", and callers fall back accordingly.
pub trait FileResolver: Send + Sync + Debug {
    /// Read a whole file.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// File metadata, if this resolver can provide it.
    fn stat(&self, _path: &Path) -> Option<Result<FileStat>> {
        None
    }

    /// Streaming reader, if this resolver can provide one.
    fn open_read(&self, _path: &Path) -> Option<Result<Box<dyn Read + Send>>> {
        None
    }
}

/// Implementation backed by `std::fs`, resolving relative paths against a
/// working directory.
#[derive(Debug, Clone, Default)]
pub struct RealFileResolver {
    working_dir: Option<PathBuf>,
}

impl RealFileResolver {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(working_dir.into()),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl FileResolver for RealFileResolver {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        fs::read(&full).with_context(|| format!("reading file {:?}", full))
    }

    fn stat(&self, path: &Path) -> Option<Result<FileStat>> {
        let full = self.resolve(path);
        let stat = fs::metadata(&full)
            .map(|meta| FileStat {
                is_file: meta.is_file(),
                len: meta.len(),
            })
            .with_context(|| format!("stat {:?}", full));
        Some(stat)
    }

    fn open_read(&self, path: &Path) -> Option<Result<Box<dyn Read + Send>>> {
        let full = self.resolve(path);
        let file = fs::File::open(&full)
            .map(|f| Box::new(f) as Box<dyn Read + Send>)
            .with_context(|| format!("opening file {:?}", full));
        Some(file)
    }
}
