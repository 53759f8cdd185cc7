//! Content Hasher: SHA-256 digests over uploaded file bytes.
//!
//! Digests are consumed incrementally so callers never need the whole file in
//! memory at once. Two files are the same content iff their digests are equal.

use std::{fmt, io::Read};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Read buffer size used by [`digest_reader`].
const CHUNK_SIZE: usize = 64 * 1024;

/// Hex-encoded SHA-256 digest of a file's full content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
  pub fn as_str(&self) -> &str { &self.0 }

  /// Wrap a digest previously produced by this module (e.g. read back from
  /// storage). No validation beyond what the storage layer guarantees.
  pub fn from_hex(hex: impl Into<String>) -> Self { Self(hex.into()) }
}

impl fmt::Display for ContentDigest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Incremental hasher fed chunk by chunk, e.g. as a multipart field streams
/// in.
#[derive(Default)]
pub struct ContentHasher {
  inner: Sha256,
}

impl ContentHasher {
  pub fn new() -> Self { Self::default() }

  pub fn update(&mut self, chunk: &[u8]) { self.inner.update(chunk); }

  pub fn finalize(self) -> ContentDigest {
    ContentDigest(hex::encode(self.inner.finalize()))
  }
}

/// Digest an in-memory buffer.
pub fn digest_bytes(bytes: &[u8]) -> ContentDigest {
  let mut hasher = ContentHasher::new();
  for chunk in bytes.chunks(CHUNK_SIZE) {
    hasher.update(chunk);
  }
  hasher.finalize()
}

/// Digest everything readable from `reader`. Read errors propagate.
pub fn digest_reader(mut reader: impl Read) -> std::io::Result<ContentDigest> {
  let mut hasher = ContentHasher::new();
  let mut buf = vec![0u8; CHUNK_SIZE];
  loop {
    let n = reader.read(&mut buf)?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }
  Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn known_vector() {
    assert_eq!(
      digest_bytes(b"abc").as_str(),
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
  }

  #[test]
  fn reader_matches_buffer_across_chunk_boundaries() {
    let data: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
    let from_reader = digest_reader(std::io::Cursor::new(&data)).unwrap();
    assert_eq!(from_reader, digest_bytes(&data));
  }

  #[test]
  fn incremental_updates_match_single_update() {
    let mut hasher = ContentHasher::new();
    hasher.update(b"hello ");
    hasher.update(b"world");
    assert_eq!(hasher.finalize(), digest_bytes(b"hello world"));
  }

  #[test]
  fn different_content_different_digest() {
    assert_ne!(digest_bytes(b"a"), digest_bytes(b"b"));
  }
}
