//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  extract::{
    multipart::{MultipartError, MultipartRejection},
    rejection::JsonRejection,
  },
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use parcel_core::{Error as CoreError, ErrorKind, store::DomainError};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  /// A business-rule failure, by kind and message.
  #[error("{message}")]
  Domain { kind: ErrorKind, message: String },

  #[error("bad request: {0}")]
  BadRequest(String),

  /// A body the framework could not decode, with the status it chose.
  #[error("{1}")]
  Rejected(StatusCode, String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Classify a backend error: its domain part if it has one, else a 500.
  pub fn store<E: DomainError>(e: E) -> Self {
    match e.domain() {
      Some(core) => core.into(),
      None => Self::Store(Box::new(e)),
    }
  }

  pub fn unauthorized() -> Self { CoreError::Unauthorized.into() }
}

impl From<&CoreError> for ApiError {
  fn from(e: &CoreError) -> Self {
    Self::Domain { kind: e.kind(), message: e.to_string() }
  }
}

impl From<CoreError> for ApiError {
  fn from(e: CoreError) -> Self { (&e).into() }
}

impl From<std::io::Error> for ApiError {
  fn from(e: std::io::Error) -> Self { Self::Store(Box::new(e)) }
}

impl From<MultipartError> for ApiError {
  fn from(e: MultipartError) -> Self { Self::Rejected(e.status(), e.body_text()) }
}

impl From<MultipartRejection> for ApiError {
  fn from(e: MultipartRejection) -> Self { Self::Rejected(e.status(), e.body_text()) }
}

impl From<JsonRejection> for ApiError {
  fn from(e: JsonRejection) -> Self { Self::Rejected(e.status(), e.body_text()) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::Domain { kind, message } => (status_for(*kind), message.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Rejected(status, m) => (*status, m.clone()),
      ApiError::Store(e) => {
        tracing::error!(error = %e, "request failed in storage");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };

    let mut res = (status, Json(json!({ "error": message }))).into_response();
    if status == StatusCode::UNAUTHORIZED {
      res.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"parcel\""),
      );
    }
    res
  }
}

fn status_for(kind: ErrorKind) -> StatusCode {
  match kind {
    ErrorKind::Validation => StatusCode::BAD_REQUEST,
    ErrorKind::Conflict => StatusCode::CONFLICT,
    ErrorKind::NotFound => StatusCode::NOT_FOUND,
    ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
    ErrorKind::Forbidden => StatusCode::FORBIDDEN,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn domain_kinds_map_to_statuses() {
    let cases = [
      (CoreError::Validation("x".into()), StatusCode::BAD_REQUEST),
      (CoreError::UpinConflict("U-1".into()), StatusCode::CONFLICT),
      (CoreError::RecordNotFound("U-1".into()), StatusCode::NOT_FOUND),
      (CoreError::Forbidden("no".into()), StatusCode::FORBIDDEN),
      (CoreError::ProtectedAttachment(uuid::Uuid::nil()), StatusCode::FORBIDDEN),
    ];
    for (err, status) in cases {
      assert_eq!(ApiError::from(err).into_response().status(), status);
    }
  }

  #[test]
  fn unauthorized_carries_challenge() {
    let res = ApiError::unauthorized().into_response();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
      res.headers().get(header::WWW_AUTHENTICATE).unwrap(),
      "Basic realm=\"parcel\""
    );
  }
}
