//! Handlers for `/records` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/records` | At most one exact-match filter, e.g. `?kebele=01` |
//! | `POST`   | `/records` | JSON, or multipart with optional `files` |
//! | `GET`    | `/records/recent` | Newest first |
//! | `GET`    | `/records/check-upin/{upin}` | `{"exists": bool}` |
//! | `GET`    | `/records/{id}` | Record plus its files; 404 if not found |
//! | `PUT`    | `/records/{id}` | Full replacement |
//! | `DELETE` | `/records/{id}` | Cascades to files |
//! | `PATCH`  | `/records/upin/{upin}` | Absent keys untouched |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use parcel_core::{
  Error as CoreError,
  access::Policy,
  record::{Record, RecordDetail, RecordFilter},
  store::PropertyStore,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, auth::Caller, error::ApiError, form::RecordInput};

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
  #[serde(rename = "UPIN")]
  pub upin:                  Option<String>,
  #[serde(rename = "ExistingArchiveCode")]
  pub existing_archive_code: Option<String>,
  #[serde(rename = "ServiceOfEstate")]
  pub service_of_estate:     Option<String>,
  pub kebele:                Option<String>,
  #[serde(rename = "proofOfPossession")]
  pub proof_of_possession:   Option<String>,
  #[serde(rename = "possessionStatus")]
  pub possession_status:     Option<String>,
}

impl ListParams {
  /// The single filter requested, if any. Combined filters are rejected.
  pub fn into_filter(self) -> Result<Option<RecordFilter>, CoreError> {
    let candidates = [
      self.upin.map(RecordFilter::Upin),
      self.existing_archive_code.map(RecordFilter::ArchiveCode),
      self.service_of_estate.map(RecordFilter::ServiceOfEstate),
      self.kebele.map(RecordFilter::Kebele),
      self.proof_of_possession.map(RecordFilter::ProofOfPossession),
      self.possession_status.map(RecordFilter::PossessionStatus),
    ];
    let mut given = candidates.into_iter().flatten();
    let first = given.next();
    if given.next().is_some() {
      return Err(CoreError::Validation(
        "only one filter may be applied at a time".into(),
      ));
    }
    Ok(first)
  }
}

/// `GET /records[?<field>=<value>]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Record>>, ApiError>
where
  S: PropertyStore + 'static,
{
  caller.require(Policy::AuthenticatedOnly)?;
  let filter = params.into_filter()?;
  let records = state.store.list_records(filter).await.map_err(ApiError::store)?;
  Ok(Json(records))
}

/// `GET /records/recent`
pub async fn recent<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
) -> Result<Json<Vec<Record>>, ApiError>
where
  S: PropertyStore + 'static,
{
  caller.require(Policy::AuthenticatedOnly)?;
  let records = state
    .store
    .recent_records(state.config.recent_records_limit)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(records))
}

#[derive(Debug, Serialize)]
pub struct UpinCheck {
  pub exists: bool,
}

/// `GET /records/check-upin/{upin}`
pub async fn check_upin<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(upin): Path<String>,
) -> Result<Json<UpinCheck>, ApiError>
where
  S: PropertyStore + 'static,
{
  caller.require(Policy::AuthenticatedOnly)?;
  let exists = state.store.upin_exists(&upin).await.map_err(ApiError::store)?;
  Ok(Json(UpinCheck { exists }))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /records`
pub async fn create<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  input: RecordInput,
) -> Result<impl IntoResponse, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AdministratorOrEditor)?;
  let fields = input.draft.into_fields()?;
  let detail = state
    .store
    .create_record(&ctx, fields, input.files)
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(detail)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /records/{id}`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
) -> Result<Json<RecordDetail>, ApiError>
where
  S: PropertyStore + 'static,
{
  caller.require(Policy::AuthenticatedOnly)?;
  let record = state
    .store
    .get_record(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| CoreError::RecordNotFound(id.to_string()))?;
  let files = state.store.list_files(id).await.map_err(ApiError::store)?;
  Ok(Json(RecordDetail { record, files }))
}

// ─── Update ───────────────────────────────────────────────────────────────────

/// `PUT /records/{id}`
pub async fn update<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
  input: RecordInput,
) -> Result<Json<Record>, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AdministratorOrEditor)?;
  let fields = input.without_files()?.into_fields()?;
  let record = state
    .store
    .update_record(&ctx, id, fields)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(record))
}

/// `PATCH /records/upin/{upin}`
pub async fn patch_by_upin<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(upin): Path<String>,
  input: RecordInput,
) -> Result<Json<Record>, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AdministratorOrEditor)?;
  let draft = input.without_files()?;
  let record = state
    .store
    .patch_record_by_upin(&ctx, &upin, draft)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(record))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// `DELETE /records/{id}`
pub async fn delete<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AdministratorOnly)?;
  state.store.delete_record(&ctx, id).await.map_err(ApiError::store)?;
  Ok(StatusCode::NO_CONTENT)
}
