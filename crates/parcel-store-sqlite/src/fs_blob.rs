//! [`FsBlobStore`]: blobs as files under a root directory.
//!
//! Layout: `{root}/{first-2-chars}/{handle}.bin`. Writes go to a temporary
//! file first and are renamed into place, so a reader never sees a partial
//! blob.

use std::{
  io,
  path::{Path, PathBuf},
};

use bytes::Bytes;
use parcel_core::blob::{BlobBody, BlobHandle, BlobStore};
use tokio::{fs, io::AsyncWriteExt as _};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FsBlobStore {
  root: PathBuf,
}

impl FsBlobStore {
  /// Use `root` as the blob directory, creating it if needed.
  pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
    let root = root.into();
    fs::create_dir_all(&root).await?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path { &self.root }

  fn path_for(&self, handle: &BlobHandle) -> io::Result<PathBuf> {
    let h = handle.as_str();
    // Handles come back out of the database; never let one escape the root.
    if h.len() < 3 || !h.chars().all(|c| c.is_ascii_alphanumeric()) {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("malformed blob handle {h:?}"),
      ));
    }
    Ok(self.root.join(&h[..2]).join(format!("{h}.bin")))
  }
}

impl BlobStore for FsBlobStore {
  type Error = io::Error;

  async fn put(&self, body: BlobBody) -> io::Result<BlobHandle> {
    let handle = BlobHandle::generate();
    let path = self.path_for(&handle)?;
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
    }

    let temp = path.with_extension("tmp");
    match &body {
      BlobBody::Memory(bytes) => {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
      }
      // Spooled uploads are copied file to file, never loaded whole.
      BlobBody::Spooled { path: spool, .. } => {
        let spool: &Path = spool;
        fs::copy(spool, &temp).await?;
        fs::File::open(&temp).await?.sync_all().await?;
      }
    }
    fs::rename(&temp, &path).await?;

    debug!(handle = %handle, size = body.len(), "blob written");
    Ok(handle)
  }

  async fn get(&self, handle: &BlobHandle) -> io::Result<Bytes> {
    Ok(Bytes::from(fs::read(self.path_for(handle)?).await?))
  }

  async fn delete(&self, handle: &BlobHandle) -> io::Result<()> {
    match fs::remove_file(self.path_for(handle)?).await {
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      other => other,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn put_get_delete_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::open(dir.path().join("blobs")).await.unwrap();

    let handle = store.put(Bytes::from_static(b"site plan").into()).await.unwrap();
    assert_eq!(store.get(&handle).await.unwrap(), Bytes::from_static(b"site plan"));

    store.delete(&handle).await.unwrap();
    assert!(store.get(&handle).await.is_err());
    // Deleting again is fine.
    store.delete(&handle).await.unwrap();
  }

  #[tokio::test]
  async fn copies_spooled_bodies_into_place() {
    use std::{io::Write as _, sync::Arc};

    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::open(dir.path().join("blobs")).await.unwrap();

    let mut spool = tempfile::NamedTempFile::new().unwrap();
    spool.write_all(b"cadastral map").unwrap();
    let body = BlobBody::Spooled { path: Arc::new(spool.into_temp_path()), len: 13 };

    let handle = store.put(body).await.unwrap();
    assert_eq!(store.get(&handle).await.unwrap(), Bytes::from_static(b"cadastral map"));
  }

  #[tokio::test]
  async fn rejects_handles_that_leave_the_root() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::open(dir.path()).await.unwrap();
    let err = store.get(&BlobHandle::new("../../etc/passwd")).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
  }
}
