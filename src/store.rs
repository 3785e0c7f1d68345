use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::Serialize;
use thiserror::Error;

use crate::util::path::RelPath;

/// The source-relative → target-relative mapping, as persisted in the
/// mapping document. A `None` value is an explicit `null` in the document
/// and is preserved on rewrite.
pub type MappingTable = BTreeMap<RelPath, Option<RelPath>>;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not lock mapping document {path} within {timeout:?}")]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("malformed mapping document {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("could not serialize mapping table for {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("mapping document I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable storage for the mapping table, shared with any external editor
/// of the mapping document. All access goes through an advisory lock on a
/// sibling `.lock` file, acquired with a bounded wait.
///
/// Each instance owns its own path and lock scope, so independent stores
/// (e.g. in tests) never contend through global state.
pub struct MappingStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl MappingStore {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        let path = path.into();
        let lock_path = lock_file_for(&path);
        Self {
            path,
            lock_path,
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the mapping document exists on disk yet.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and parse the mapping document under the lock.
    pub fn read(&self) -> Result<MappingTable, StoreError> {
        let _guard = self.acquire_lock()?;
        let content = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Serialize the table and write it under the lock.
    ///
    /// Keys are emitted sorted (BTreeMap ordering) with fixed 4-space
    /// indentation, so writing an unchanged table is byte-identical. The
    /// document is written in place so external watchers of the mapping
    /// file see a plain modify event.
    pub fn write(&self, table: &MappingTable) -> Result<(), StoreError> {
        let _guard = self.acquire_lock()?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        table
            .serialize(&mut ser)
            .map_err(|source| StoreError::Serialize {
                path: self.path.clone(),
                source,
            })?;
        buf.push(b'\n');

        std::fs::write(&self.path, &buf)?;
        Ok(())
    }

    /// Acquire the advisory lock, polling until the bounded wait expires.
    fn acquire_lock(&self) -> Result<LockGuard, StoreError> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(LockGuard { file }),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::LockTimeout {
                            path: self.path.clone(),
                            timeout: self.lock_timeout,
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
    }
}

/// Holds the advisory lock for the duration of one read or write.
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

fn lock_file_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}
