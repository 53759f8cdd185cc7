//! `GET /audit-logs[?limit=N]`: newest first, capped by configuration.

use axum::{
  Json,
  extract::{Query, State},
};
use parcel_core::{audit::AuditEntry, store::PropertyStore};
use serde::Deserialize;

use crate::{AppState, auth::Caller, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct AuditParams {
  pub limit: Option<usize>,
}

pub async fn list<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Query(params): Query<AuditParams>,
) -> Result<Json<Vec<AuditEntry>>, ApiError>
where
  S: PropertyStore + 'static,
{
  caller.require(state.config.audit_log_policy)?;
  let cap = state.config.audit_log_limit;
  let limit = params.limit.map_or(cap, |n| n.min(cap));
  let entries = state.store.query_audit(limit).await.map_err(ApiError::store)?;
  Ok(Json(entries))
}
