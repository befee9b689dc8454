//! Collaborator interfaces: the blob store and the time-series sink.
//!
//! Both are consumed synchronously and must tolerate concurrent callers.
//! In-memory and filesystem implementations live here so every stage can
//! be exercised without a cloud client.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use tracing::debug;

use crate::error::{Error, Result};
use crate::types::Point;

/// Object storage addressed by slash-separated paths.
pub trait BlobStore: Send + Sync {
    /// Whether an object exists at `path`.
    fn exists(&self, path: &str) -> Result<bool>;

    /// Read an object. Fails with [`Error::BlobNotFound`] if absent.
    fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Write an object, overwriting any existing one.
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// Every object path starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// A time-series database accepting batched point writes.
pub trait TimeSeriesSink: Send + Sync {
    /// Write all points to `bucket`. Any point's failure fails the whole call.
    fn write(&self, bucket: &str, points: &[Point]) -> Result<()>;
}

/// A stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// In-memory blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Blob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full object including its content type.
    pub fn blob(&self, path: &str) -> Result<Option<Blob>> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        Ok(blobs.get(path).cloned())
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn exists(&self, path: &str) -> Result<bool> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        Ok(blobs.contains_key(path))
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        blobs
            .get(path)
            .map(|blob| blob.bytes.clone())
            .ok_or_else(|| Error::BlobNotFound(path.to_string()))
    }

    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        blobs.insert(
            path.to_string(),
            Blob {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect())
    }
}

/// File name prefix of objects still being written by [`FsBlobStore::put`].
const PARTIAL_PREFIX: &str = ".partial-";

fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(PARTIAL_PREFIX))
}

/// Blob store rooted at a local directory. Paths map onto relative file paths.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(Error::storage(format!("refusing path outside store: {path}")));
        }
        Ok(self.root.join(relative))
    }

    fn collect(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect(&path, out)?;
            } else if is_partial(&path) {
                continue;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                let key: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(key.join("/"));
            }
        }
        Ok(())
    }
}

impl BlobStore for FsBlobStore {
    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.is_file())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        let file = self.resolve(path)?;
        match fs::read(&file) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::BlobNotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        let file = self.resolve(path)?;
        let parent = file
            .parent()
            .ok_or_else(|| Error::storage(format!("no parent directory for {path}")))?;
        fs::create_dir_all(parent)?;
        // Each writer gets its own temp file; readers only ever see whole objects.
        let mut tmp = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .tempfile_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.persist(&file).map_err(|e| Error::Io(e.error))?;
        debug!(path, bytes = bytes.len(), "stored blob");
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut all = Vec::new();
        self.collect(&self.root, &mut all)?;
        all.retain(|p| p.starts_with(prefix));
        all.sort();
        Ok(all)
    }
}

/// Sink that keeps every written point in memory, per bucket.
#[derive(Debug, Default)]
pub struct MemorySink {
    points: Mutex<BTreeMap<String, Vec<Point>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points written to `bucket`, in write order.
    pub fn points(&self, bucket: &str) -> Vec<Point> {
        self.points
            .lock()
            .map(|p| p.get(bucket).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl TimeSeriesSink for MemorySink {
    fn write(&self, bucket: &str, points: &[Point]) -> Result<()> {
        let mut stored = self.points.lock().map_err(|_| Error::sink("sink lock poisoned"))?;
        stored
            .entry(bucket.to_string())
            .or_default()
            .extend_from_slice(points);
        Ok(())
    }
}

fn poisoned() -> Error {
    Error::storage("blob store lock poisoned")
}
