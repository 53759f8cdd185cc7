//! File attachments: documents bound to exactly one record.
//!
//! Two dedup policies coexist and are kept as separate operations:
//!
//! - single-file adds skip any upload whose content digest already exists on
//!   the record ([`dedup_by_digest`]);
//! - bulk uploads skip only uploads matching an existing attachment on digest
//!   *and* all metadata ([`BulkKey`]), so identical bytes under a different
//!   name or category are kept.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  Error, Result,
  blob::{BlobBody, BlobHandle},
  hash::{ContentDigest, digest_bytes},
};

/// Attachments in this category cannot be deleted. Exact, case-sensitive.
pub const PROTECTED_CATEGORY: &str = "required";

/// Category for single-file uploads that don't name one.
pub const DEFAULT_CATEGORY: &str = "additional";

/// Category for bulk uploads that don't name one.
pub const DEFAULT_BULK_CATEGORY: &str = "Uncategorized";

/// Content-type label when neither the client nor the filename tells us.
pub const UNKNOWN_CONTENT_TYPE: &str = "Unknown";

const CATEGORY_MAX_LEN: usize = 32;

// ─── Category ────────────────────────────────────────────────────────────────

/// A free-form attachment category. The value [`PROTECTED_CATEGORY`] blocks
/// deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
  /// Use `value` if it is non-empty, else `default`.
  pub fn or_default(value: Option<&str>, default: &str) -> Result<Self> {
    match value {
      Some(v) if !v.is_empty() => Self::new(v),
      _ => Self::new(default),
    }
  }

  pub fn new(value: impl Into<String>) -> Result<Self> {
    let value = value.into();
    if value.is_empty() {
      return Err(Error::Validation("category may not be empty".into()));
    }
    if value.chars().count() > CATEGORY_MAX_LEN {
      return Err(Error::Validation(format!(
        "category may be at most {CATEGORY_MAX_LEN} characters"
      )));
    }
    Ok(Self(value))
  }

  pub fn as_str(&self) -> &str { &self.0 }

  pub fn is_protected(&self) -> bool { self.0 == PROTECTED_CATEGORY }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── Content type ────────────────────────────────────────────────────────────

/// Explicit content type, else a guess from the filename extension, else
/// [`UNKNOWN_CONTENT_TYPE`].
pub fn resolve_content_type(explicit: Option<&str>, file_name: &str) -> String {
  if let Some(ct) = explicit.map(str::trim).filter(|ct| !ct.is_empty()) {
    return ct.to_owned();
  }
  mime_guess::from_path(file_name)
    .first_raw()
    .unwrap_or(UNKNOWN_CONTENT_TYPE)
    .to_owned()
}

// ─── Uploads ─────────────────────────────────────────────────────────────────

/// File bytes as received from a client, with their content digest.
#[derive(Debug, Clone)]
pub struct Upload {
  pub file_name:    String,
  /// Content type declared by the client, if any.
  pub content_type: Option<String>,
  pub body:         BlobBody,
  digest:           ContentDigest,
}

impl Upload {
  /// Hash in-memory `bytes` and wrap them.
  pub fn new(
    file_name: impl Into<String>,
    content_type: Option<String>,
    bytes: impl Into<Bytes>,
  ) -> Self {
    let bytes = bytes.into();
    let digest = digest_bytes(&bytes);
    Self { file_name: file_name.into(), content_type, body: BlobBody::Memory(bytes), digest }
  }

  /// Wrap a body whose digest was computed while it streamed in. `digest`
  /// must have been produced by a [`crate::hash::ContentHasher`] fed exactly
  /// these bytes.
  pub fn with_digest(
    file_name: impl Into<String>,
    content_type: Option<String>,
    body: BlobBody,
    digest: ContentDigest,
  ) -> Self {
    Self { file_name: file_name.into(), content_type, body, digest }
  }

  pub fn digest(&self) -> &ContentDigest { &self.digest }

  pub fn resolved_content_type(&self) -> String {
    resolve_content_type(self.content_type.as_deref(), &self.file_name)
  }
}

/// Input to single-file add: one upload plus its metadata.
#[derive(Debug, Clone)]
pub struct NewAttachment {
  pub upload:       Upload,
  pub display_name: String,
  pub category:     Category,
}

impl NewAttachment {
  /// Single-file add input. The display name is required; the category
  /// defaults to [`DEFAULT_CATEGORY`].
  pub fn single(
    upload: Upload,
    display_name: Option<&str>,
    category: Option<&str>,
  ) -> Result<Self> {
    let display_name = display_name
      .map(str::trim)
      .filter(|n| !n.is_empty())
      .ok_or_else(|| Error::Validation("display_name is required".into()))?
      .to_owned();
    Ok(Self {
      upload,
      display_name,
      category: Category::or_default(category, DEFAULT_CATEGORY)?,
    })
  }

  /// The bulk dedup key this attachment would be stored under.
  pub fn bulk_key(&self) -> BulkKey {
    BulkKey {
      digest:       self.upload.digest().clone(),
      display_name: self.display_name.clone(),
      file_name:    self.upload.file_name.clone(),
      category:     self.category.clone(),
      content_type: self.upload.resolved_content_type(),
    }
  }
}

/// Parallel arrays of a bulk upload, checked to be the same length.
#[derive(Debug, Clone, Default)]
pub struct BulkUpload {
  items: Vec<NewAttachment>,
}

impl BulkUpload {
  /// Pair up `files`, `names` and `categories`. Blank names fall back to the
  /// upload's filename, blank categories to [`DEFAULT_BULK_CATEGORY`].
  pub fn new(
    files: Vec<Upload>,
    names: Vec<String>,
    categories: Vec<String>,
  ) -> Result<Self> {
    if files.len() != names.len() || files.len() != categories.len() {
      return Err(Error::Validation(format!(
        "mismatch between files ({}), names ({}) and categories ({})",
        files.len(),
        names.len(),
        categories.len()
      )));
    }

    let items = files
      .into_iter()
      .zip(names)
      .zip(categories)
      .map(|((upload, name), category)| {
        let display_name = if name.trim().is_empty() {
          upload.file_name.clone()
        } else {
          name.trim().to_owned()
        };
        Ok(NewAttachment {
          category: Category::or_default(Some(&category), DEFAULT_BULK_CATEGORY)?,
          display_name,
          upload,
        })
      })
      .collect::<Result<_>>()?;

    Ok(Self { items })
  }

  pub fn len(&self) -> usize { self.items.len() }

  pub fn is_empty(&self) -> bool { self.items.is_empty() }

  pub fn into_items(self) -> Vec<NewAttachment> { self.items }
}

/// The tuple bulk uploads deduplicate on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BulkKey {
  pub digest:       ContentDigest,
  pub display_name: String,
  pub file_name:    String,
  pub category:     Category,
  pub content_type: String,
}

// ─── Stored attachment ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
  pub id:             Uuid,
  pub record_id:      Uuid,
  #[serde(skip)]
  pub blob:           BlobHandle,
  /// Filename the bytes were uploaded under.
  pub file_name:      String,
  pub display_name:   String,
  pub category:       Category,
  pub content_type:   String,
  pub content_digest: ContentDigest,
  pub size_bytes:     u64,
  pub uploaded_at:    DateTime<Utc>,
}

impl Attachment {
  pub fn bulk_key(&self) -> BulkKey {
    BulkKey {
      digest:       self.content_digest.clone(),
      display_name: self.display_name.clone(),
      file_name:    self.file_name.clone(),
      category:     self.category.clone(),
      content_type: self.content_type.clone(),
    }
  }
}

/// Result of a single-file add.
#[derive(Debug, Clone)]
pub enum AddOutcome {
  /// A new attachment was stored.
  Created(Attachment),
  /// The record already holds these bytes; nothing was written.
  Existing(Attachment),
}

impl AddOutcome {
  pub fn attachment(&self) -> &Attachment {
    match self {
      Self::Created(a) | Self::Existing(a) => a,
    }
  }

  pub fn into_attachment(self) -> Attachment {
    match self {
      Self::Created(a) | Self::Existing(a) => a,
    }
  }

  pub fn is_new(&self) -> bool { matches!(self, Self::Created(_)) }
}

/// Result of a bulk upload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkOutcome {
  pub created: Vec<Attachment>,
  pub skipped: usize,
}

/// Find an attachment on the record with the same bytes as `upload`.
pub fn dedup_by_digest<'a>(
  existing: &'a [Attachment],
  upload: &Upload,
) -> Option<&'a Attachment> {
  existing.iter().find(|a| &a.content_digest == upload.digest())
}
