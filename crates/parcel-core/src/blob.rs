//! The blob-storage collaborator: opaque handles to stored file bytes.
//!
//! Rows in the relational store only ever hold a [`BlobHandle`]; the bytes
//! live wherever the [`BlobStore`] implementation puts them.

use std::{
  collections::HashMap,
  fmt, io,
  future::Future,
  path::Path,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use uuid::Uuid;

/// Opaque reference to stored bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobHandle(String);

impl BlobHandle {
  pub fn new(handle: impl Into<String>) -> Self { Self(handle.into()) }

  /// A fresh, unique handle.
  pub fn generate() -> Self { Self(Uuid::new_v4().simple().to_string()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for BlobHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── Body ────────────────────────────────────────────────────────────────────

/// Bytes on their way into a [`BlobStore`].
///
/// Small uploads stay in memory. Large ones are spooled to a temporary file
/// while they stream in; the file is removed when the last clone is dropped.
#[derive(Debug, Clone)]
pub enum BlobBody {
  Memory(Bytes),
  Spooled { path: Arc<TempPath>, len: u64 },
}

impl BlobBody {
  pub fn len(&self) -> u64 {
    match self {
      Self::Memory(bytes) => bytes.len() as u64,
      Self::Spooled { len, .. } => *len,
    }
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// The spool file, if the body lives on disk.
  pub fn spool_path(&self) -> Option<&Path> {
    match self {
      Self::Memory(_) => None,
      Self::Spooled { path, .. } => {
        let path: &Path = path;
        Some(path)
      }
    }
  }

  /// Load the whole body into memory.
  pub async fn read_all(&self) -> io::Result<Bytes> {
    match self {
      Self::Memory(bytes) => Ok(bytes.clone()),
      Self::Spooled { path, .. } => {
        let path: &Path = path;
        Ok(Bytes::from(tokio::fs::read(path).await?))
      }
    }
  }
}

impl From<Bytes> for BlobBody {
  fn from(bytes: Bytes) -> Self { Self::Memory(bytes) }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Put / get / delete over binary blobs.
pub trait BlobStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Store `body` under a new handle.
  fn put(
    &self,
    body: BlobBody,
  ) -> impl Future<Output = Result<BlobHandle, Self::Error>> + Send + '_;

  fn get<'a>(
    &'a self,
    handle: &'a BlobHandle,
  ) -> impl Future<Output = Result<Bytes, Self::Error>> + Send + 'a;

  /// Remove a blob. Deleting a missing blob is not an error.
  fn delete<'a>(
    &'a self,
    handle: &'a BlobHandle,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

// ─── In-memory implementation ────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum MemoryBlobError {
  #[error("blob not found: {0}")]
  Missing(BlobHandle),

  #[error("reading spooled upload: {0}")]
  Io(#[from] io::Error),
}

/// A [`BlobStore`] holding everything in a shared map, useful for testing.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
  blobs: Arc<Mutex<HashMap<BlobHandle, Bytes>>>,
}

impl MemoryBlobStore {
  pub fn new() -> Self { Self::default() }

  pub fn len(&self) -> usize { self.map().len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  // Every critical section is a single map call, so a poisoned map is intact.
  fn map(&self) -> MutexGuard<'_, HashMap<BlobHandle, Bytes>> {
    self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl BlobStore for MemoryBlobStore {
  type Error = MemoryBlobError;

  async fn put(&self, body: BlobBody) -> Result<BlobHandle, Self::Error> {
    let bytes = body.read_all().await?;
    let handle = BlobHandle::generate();
    self.map().insert(handle.clone(), bytes);
    Ok(handle)
  }

  async fn get(&self, handle: &BlobHandle) -> Result<Bytes, Self::Error> {
    self
      .map()
      .get(handle)
      .cloned()
      .ok_or_else(|| MemoryBlobError::Missing(handle.clone()))
  }

  async fn delete(&self, handle: &BlobHandle) -> Result<(), Self::Error> {
    self.map().remove(handle);
    Ok(())
  }
}
