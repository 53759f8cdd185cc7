//! Error type for `parcel-store-sqlite`.

use parcel_core::store::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] parcel_core::Error),

  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("corrupt column value: {0}")]
  Corrupt(String),

  #[error("blob store error: {0}")]
  Blob(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl From<tokio_rusqlite::Error> for Error {
  /// Domain and JSON errors raised inside a connection closure travel as
  /// `Other`; unwrap them back into their own variants.
  fn from(e: tokio_rusqlite::Error) -> Self {
    match e {
      tokio_rusqlite::Error::Other(boxed) => match boxed.downcast::<parcel_core::Error>() {
        Ok(core) => Error::Core(*core),
        Err(boxed) => match boxed.downcast::<serde_json::Error>() {
          Ok(json) => Error::Json(*json),
          Err(boxed) => Error::Database(tokio_rusqlite::Error::Other(boxed)),
        },
      },
      other => Error::Database(other),
    }
  }
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self { Error::Database(e.into()) }
}

impl DomainError for Error {
  fn domain(&self) -> Option<&parcel_core::Error> {
    match self {
      Error::Core(e) => Some(e),
      _ => None,
    }
  }
}

/// Lift a domain error so it can be returned from inside a connection
/// closure.
pub(crate) fn raise(e: parcel_core::Error) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(e))
}

pub(crate) fn json_err(e: serde_json::Error) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(e))
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
