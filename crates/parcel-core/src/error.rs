//! Error types for `parcel-core`.
//!
//! These are the business-rule failures every backend and surface shares.
//! Storage and transport failures live in the crates that own them.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid input: {0}")]
  Validation(String),

  #[error("a record with UPIN {0:?} already exists")]
  UpinConflict(String),

  #[error("username {0:?} is already taken")]
  UsernameTaken(String),

  #[error("record not found: {0}")]
  RecordNotFound(String),

  #[error("attachment not found: {0}")]
  AttachmentNotFound(Uuid),

  #[error("user not found: {0}")]
  UserNotFound(String),

  #[error("role not found: {0}")]
  RoleNotFound(String),

  #[error("authentication required")]
  Unauthorized,

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("attachment {0} is in a protected category and cannot be deleted")]
  ProtectedAttachment(Uuid),
}

/// Coarse classification used by request boundaries to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Validation,
  Conflict,
  NotFound,
  Unauthorized,
  Forbidden,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Validation(_) => ErrorKind::Validation,
      Self::UpinConflict(_) | Self::UsernameTaken(_) => ErrorKind::Conflict,
      Self::RecordNotFound(_)
      | Self::AttachmentNotFound(_)
      | Self::UserNotFound(_)
      | Self::RoleNotFound(_) => ErrorKind::NotFound,
      Self::Unauthorized => ErrorKind::Unauthorized,
      Self::Forbidden(_) | Self::ProtectedAttachment(_) => ErrorKind::Forbidden,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
