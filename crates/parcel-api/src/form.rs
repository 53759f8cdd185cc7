//! Request-body decoding shared by the record and file handlers.
//!
//! Record writes accept either JSON or `multipart/form-data`; file writes are
//! multipart only. File parts are hashed chunk by chunk as they stream in, and
//! parts larger than [`SPOOL_THRESHOLD`] are written out to a temporary file
//! instead of being held in memory.
//!
//! Array fields are accepted both bare (`names`) and with the bracket suffix
//! form clients append (`names[]`).

use std::sync::Arc;

use axum::{
  Json,
  extract::{FromRequest, Multipart, Request},
  http::header,
};
use bytes::BytesMut;
use parcel_core::{
  attachment::{BulkUpload, Upload},
  blob::BlobBody,
  hash::ContentHasher,
  record::RecordDraft,
};
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt as _;

use crate::error::ApiError;

/// Field carrying the files of a bulk upload or a record create.
pub const FILES_FIELDS: [&str; 2] = ["files", "files[]"];
/// Parallel display names of a bulk upload.
pub const NAMES_FIELDS: [&str; 2] = ["names[]", "names"];
/// Parallel categories of a bulk upload.
pub const CATEGORIES_FIELDS: [&str; 2] = ["categories[]", "categories"];
/// Field carrying the single file of an add or a replace.
pub const FILE_FIELDS: [&str; 2] = ["uploaded_file", "file"];

/// File parts up to this size stay in memory.
pub const SPOOL_THRESHOLD: usize = 256 * 1024;

// ─── Spooling ─────────────────────────────────────────────────────────────────

enum Spool {
  Memory(BytesMut),
  File { file: tokio::fs::File, path: TempPath, len: u64 },
}

impl Spool {
  fn new() -> Self { Self::Memory(BytesMut::new()) }

  fn len(&self) -> u64 {
    match self {
      Self::Memory(buf) => buf.len() as u64,
      Self::File { len, .. } => *len,
    }
  }

  async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
    match self {
      Self::Memory(buf) if buf.len() + chunk.len() <= SPOOL_THRESHOLD => {
        buf.extend_from_slice(chunk);
      }
      Self::Memory(buf) => {
        let (file, path) = NamedTempFile::new()?.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        file.write_all(&buf[..]).await?;
        file.write_all(chunk).await?;
        let len = (buf.len() + chunk.len()) as u64;
        *self = Self::File { file, path, len };
      }
      Self::File { file, len, .. } => {
        file.write_all(chunk).await?;
        *len += chunk.len() as u64;
      }
    }
    Ok(())
  }

  async fn finish(self) -> std::io::Result<BlobBody> {
    match self {
      Self::Memory(buf) => Ok(BlobBody::Memory(buf.freeze())),
      Self::File { mut file, path, len } => {
        file.flush().await?;
        Ok(BlobBody::Spooled { path: Arc::new(path), len })
      }
    }
  }
}

// ─── Multipart ────────────────────────────────────────────────────────────────

/// A fully-read multipart form, in submission order.
#[derive(Debug, Default)]
pub struct Form {
  texts: Vec<(String, String)>,
  files: Vec<(String, Upload)>,
}

impl Form {
  pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
    let mut form = Self::default();

    while let Some(mut field) = multipart.next_field().await? {
      let name = field.name().unwrap_or_default().to_owned();

      let Some(file_name) = field.file_name().map(str::to_owned) else {
        let value = field.text().await?;
        form.texts.push((name, value));
        continue;
      };

      let content_type = field.content_type().map(str::to_owned);
      let mut hasher = ContentHasher::new();
      let mut spool = Spool::new();
      while let Some(chunk) = field.chunk().await? {
        hasher.update(&chunk);
        spool.write(&chunk).await?;
      }

      // Browsers send an empty, nameless part for an untouched file input.
      if file_name.is_empty() && spool.len() == 0 {
        continue;
      }
      let body = spool.finish().await?;
      let upload = Upload::with_digest(file_name, content_type, body, hasher.finalize());
      form.files.push((name, upload));
    }

    Ok(form)
  }

  /// First text value submitted under `key`.
  pub fn text(&self, key: &str) -> Option<&str> {
    self.texts.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
  }

  /// Every text value submitted under `key`.
  pub fn texts(&self, key: &str) -> Vec<String> {
    self
      .texts
      .iter()
      .filter(|(k, _)| k == key)
      .map(|(_, v)| v.clone())
      .collect()
  }

  /// The values of the first of `keys` that was submitted at all.
  pub fn texts_any(&self, keys: &[&str]) -> Vec<String> {
    keys
      .iter()
      .map(|key| self.texts(key))
      .find(|values| !values.is_empty())
      .unwrap_or_default()
  }

  /// Remove and return every file submitted under any of `keys`.
  pub fn take_files(&mut self, keys: &[&str]) -> Vec<Upload> {
    let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.files)
      .into_iter()
      .partition(|(k, _)| keys.contains(&k.as_str()));
    self.files = kept;
    taken.into_iter().map(|(_, upload)| upload).collect()
  }

  /// The single file submitted under any of `keys`.
  pub fn take_file(&mut self, keys: &[&str]) -> Result<Upload, ApiError> {
    let mut files = self.take_files(keys);
    let field = keys.join(" or ");
    match files.len() {
      1 => Ok(files.remove(0)),
      0 => Err(ApiError::BadRequest(format!("a file is required in field {field}"))),
      n => Err(ApiError::BadRequest(format!("expected one file in field {field}, got {n}"))),
    }
  }

  /// The parallel `files` / `names` / `categories` arrays of a bulk upload.
  pub fn bulk_upload(&mut self) -> Result<BulkUpload, ApiError> {
    let names = self.texts_any(&NAMES_FIELDS);
    let categories = self.texts_any(&CATEGORIES_FIELDS);
    let files = self.take_files(&FILES_FIELDS);
    Ok(BulkUpload::new(files, names, categories)?)
  }

  fn record_texts(&self) -> impl Iterator<Item = (&str, &str)> {
    self
      .texts
      .iter()
      .filter(|(k, _)| {
        !NAMES_FIELDS.contains(&k.as_str()) && !CATEGORIES_FIELDS.contains(&k.as_str())
      })
      .map(|(k, v)| (k.as_str(), v.as_str()))
  }
}

// ─── Record input ─────────────────────────────────────────────────────────────

/// A record write as JSON or as a multipart form with optional files.
///
/// On a multipart create, each file takes the `names` / `categories` entry
/// at its index. A missing or blank entry falls back to the upload filename
/// and the bulk default category; entries past the last file are ignored.
#[derive(Debug)]
pub struct RecordInput {
  pub draft: RecordDraft,
  pub files: BulkUpload,
}

impl RecordInput {
  /// The draft, refusing any attached files.
  pub fn without_files(self) -> Result<RecordDraft, ApiError> {
    if !self.files.is_empty() {
      return Err(ApiError::BadRequest(
        "files cannot be attached here; use the record's files endpoint".into(),
      ));
    }
    Ok(self.draft)
  }
}

fn is_multipart(req: &Request) -> bool {
  req
    .headers()
    .get(header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

/// `values` resized to `n`, padding with blanks.
fn per_index(mut values: Vec<String>, n: usize) -> Vec<String> {
  values.resize(n, String::new());
  values
}

impl<S> FromRequest<S> for RecordInput
where
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
    if !is_multipart(&req) {
      let Json(draft) = Json::<RecordDraft>::from_request(req, state).await?;
      return Ok(Self { draft, files: BulkUpload::default() });
    }

    let mut form = Form::read(Multipart::from_request(req, state).await?).await?;
    let draft = RecordDraft::from_form(form.record_texts())?;

    let files = form.take_files(&FILES_FIELDS);
    let names = per_index(form.texts_any(&NAMES_FIELDS), files.len());
    let categories = per_index(form.texts_any(&CATEGORIES_FIELDS), files.len());

    Ok(Self { draft, files: BulkUpload::new(files, names, categories)? })
  }
}
