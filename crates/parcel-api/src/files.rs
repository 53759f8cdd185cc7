//! Handlers for file attachments.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/records/upin/{upin}/files` | Upload order |
//! | `POST`   | `/records/upin/{upin}/files` | Multipart `uploaded_file`, `display_name`, `category` |
//! | `PUT`    | `/records/upin/{upin}/files` | Multipart `files`, `names[]`, `categories[]` |
//! | `PUT`    | `/files/{id}` | Multipart `uploaded_file`; keeps name and category |
//!
//! `file` is accepted for `uploaded_file`, and the array fields may drop the
//! `[]` suffix.
//! | `DELETE` | `/files/{id}` | 403 for the protected category |
//! | `GET`    | `/files/{id}/content` | Raw bytes |

use axum::{
  Json,
  extract::{Multipart, Path, State},
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use parcel_core::{
  Error as CoreError,
  access::Policy,
  attachment::{Attachment, BulkOutcome, NewAttachment, UNKNOWN_CONTENT_TYPE},
  record::Record,
  store::PropertyStore,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  AppState,
  auth::Caller,
  error::ApiError,
  form::{FILE_FIELDS, Form},
};

const DISPLAY_NAME_FIELD: &str = "display_name";
const CATEGORY_FIELD: &str = "category";

async fn record_for_upin<S: PropertyStore>(store: &S, upin: &str) -> Result<Record, ApiError> {
  store
    .get_record_by_upin(upin)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| CoreError::RecordNotFound(upin.to_owned()).into())
}

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /records/upin/{upin}/files`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(upin): Path<String>,
) -> Result<Json<Vec<Attachment>>, ApiError>
where
  S: PropertyStore + 'static,
{
  caller.require(Policy::AuthenticatedOnly)?;
  let record = record_for_upin(state.store.as_ref(), &upin).await?;
  let files = state.store.list_files(record.id).await.map_err(ApiError::store)?;
  Ok(Json(files))
}

// ─── Add ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AddResponse {
  /// `false` when the record already held these bytes.
  pub created: bool,
  pub file:    Attachment,
}

/// `POST /records/upin/{upin}/files`
///
/// Returns `201` for a new attachment and `200` with the existing one when
/// the bytes are already on the record.
pub async fn add<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(upin): Path<String>,
  multipart: Multipart,
) -> Result<Response, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AdministratorOrEditor)?;
  let mut form = Form::read(multipart).await?;
  let upload = form.take_file(&FILE_FIELDS)?;
  let input = NewAttachment::single(
    upload,
    form.text(DISPLAY_NAME_FIELD),
    form.text(CATEGORY_FIELD),
  )?;

  let record = record_for_upin(state.store.as_ref(), &upin).await?;
  let outcome = state
    .store
    .add_file(&ctx, record.id, input)
    .await
    .map_err(ApiError::store)?;

  let status = if outcome.is_new() { StatusCode::CREATED } else { StatusCode::OK };
  let body = AddResponse { created: outcome.is_new(), file: outcome.into_attachment() };
  Ok((status, Json(body)).into_response())
}

/// `PUT /records/upin/{upin}/files`
pub async fn bulk<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(upin): Path<String>,
  multipart: Multipart,
) -> Result<(StatusCode, Json<BulkOutcome>), ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AdministratorOrEditor)?;
  let files = Form::read(multipart).await?.bulk_upload()?;

  let record = record_for_upin(state.store.as_ref(), &upin).await?;
  let outcome = state
    .store
    .bulk_upload(&ctx, record.id, files)
    .await
    .map_err(ApiError::store)?;

  let status = if outcome.created.is_empty() { StatusCode::OK } else { StatusCode::CREATED };
  Ok((status, Json(outcome)))
}

// ─── Replace / delete ─────────────────────────────────────────────────────────

/// `PUT /files/{id}`
pub async fn replace<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
  multipart: Multipart,
) -> Result<Json<Attachment>, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AdministratorOrEditor)?;
  let upload = Form::read(multipart).await?.take_file(&FILE_FIELDS)?;
  let file = state
    .store
    .replace_file(&ctx, id, upload)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(file))
}

/// `DELETE /files/{id}`
pub async fn delete<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AdministratorOrEditor)?;
  state.store.delete_file(&ctx, id).await.map_err(ApiError::store)?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Download ─────────────────────────────────────────────────────────────────

/// `GET /files/{id}/content`
pub async fn download<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
) -> Result<Response, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AuthenticatedOnly)?;
  let (file, bytes) = state
    .store
    .download_file(&ctx, id)
    .await
    .map_err(ApiError::store)?;

  let content_type = HeaderValue::from_str(&file.content_type)
    .ok()
    .filter(|_| file.content_type != UNKNOWN_CONTENT_TYPE)
    .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

  Ok(
    (
      [
        (header::CONTENT_TYPE, content_type),
        (header::CONTENT_DISPOSITION, content_disposition(&file.file_name)),
      ],
      bytes,
    )
      .into_response(),
  )
}

/// `attachment` with a quoted ASCII `filename`. Names outside ASCII also get
/// an RFC 6266 `filename*` carrying the percent-encoded UTF-8 original.
fn content_disposition(file_name: &str) -> HeaderValue {
  let fallback: String = file_name
    .chars()
    .filter(|c| !c.is_control())
    .map(|c| if c == '"' || c == '\\' || !c.is_ascii() { '_' } else { c })
    .collect();
  let mut value = format!("attachment; filename=\"{fallback}\"");
  if !file_name.is_ascii() {
    value.push_str("; filename*=UTF-8''");
    value.push_str(&urlencoding::encode(file_name));
  }
  HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
