// src/fs/mock.rs

use super::{FileResolver, FileStat};
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir,
    /// Present in `stat` but fails on read (permissions, IO error).
    Unreadable,
}

/// In-memory resolver for tests. `streams` and `stats` toggle the optional
/// capabilities.
#[derive(Debug, Clone)]
pub struct MockFileResolver {
    files: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
    streams: bool,
    stats: bool,
    reads: Arc<Mutex<Vec<PathBuf>>>,
}

impl Default for MockFileResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFileResolver {
    pub fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            streams: true,
            stats: true,
            reads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A resolver exposing only the required `read` capability.
    pub fn read_only() -> Self {
        Self {
            streams: false,
            stats: false,
            ..Self::new()
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.insert(path, MockEntry::File(content.into()));
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        self.insert(path, MockEntry::Dir);
    }

    pub fn add_unreadable(&self, path: impl AsRef<Path>) {
        self.insert(path, MockEntry::Unreadable);
    }

    /// Paths passed to `read` or `open_read`, in call order.
    pub fn reads(&self) -> Vec<PathBuf> {
        self.reads.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn insert(&self, path: impl AsRef<Path>, entry: MockEntry) {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.insert(path.as_ref().to_path_buf(), entry);
    }

    fn entry(&self, path: &Path) -> Option<MockEntry> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.get(path).cloned()
    }

    fn bytes(&self, path: &Path) -> Result<Vec<u8>> {
        self.reads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.to_path_buf());
        match self.entry(path) {
            Some(MockEntry::File(content)) => Ok(content),
            Some(MockEntry::Dir) => Err(anyhow!("{:?} is a directory", path)),
            Some(MockEntry::Unreadable) => Err(anyhow!("permission denied: {:?}", path)),
            None => Err(anyhow!("file not found: {:?}", path)),
        }
    }
}

impl FileResolver for MockFileResolver {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.bytes(path)
    }

    fn stat(&self, path: &Path) -> Option<Result<FileStat>> {
        if !self.stats {
            return None;
        }
        let stat = match self.entry(path) {
            Some(MockEntry::File(content)) => Ok(FileStat {
                is_file: true,
                len: content.len() as u64,
            }),
            Some(MockEntry::Unreadable) => Ok(FileStat {
                is_file: true,
                len: 0,
            }),
            Some(MockEntry::Dir) => Ok(FileStat {
                is_file: false,
                len: 0,
            }),
            None => Err(anyhow!("file not found: {:?}", path)),
        };
        Some(stat)
    }

    fn open_read(&self, path: &Path) -> Option<Result<Box<dyn Read + Send>>> {
        if !self.streams {
            return None;
        }
        Some(
            self.bytes(path)
                .map(|content| Box::new(Cursor::new(content)) as Box<dyn Read + Send>),
        )
    }
}
