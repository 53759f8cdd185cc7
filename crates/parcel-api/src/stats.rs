//! Handlers for `/statistics/*` and `/dashboard-metrics`.
//!
//! Every statistics view appends a `VIEW` entry naming the report, which is
//! what the dashboard counts as a generated report.

use axum::{Json, extract::State};
use parcel_core::{
  access::{Policy, RequestContext},
  audit::{AuditAction, NewAuditEntry},
  stats::{AmountPaidCount, DashboardMetrics, GroupCount, GroupField},
  store::PropertyStore,
};

use crate::{AppState, auth::Caller, error::ApiError};

const AMOUNT_PAID_REPORT: &str = "amount-paid";

async fn note_view<S: PropertyStore>(
  store: &S,
  ctx: &RequestContext,
  report: &str,
) -> Result<(), ApiError> {
  let entry = NewAuditEntry::new(ctx, AuditAction::View, format!("Viewed {report} report"));
  store.append_audit(entry).await.map_err(ApiError::store)?;
  Ok(())
}

async fn grouped<S>(
  state: &AppState<S>,
  caller: Caller,
  field: GroupField,
) -> Result<Json<Vec<GroupCount>>, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AuthenticatedOnly)?;
  let counts = state.store.count_by(field).await.map_err(ApiError::store)?;
  note_view(state.store.as_ref(), &ctx, field.report_name()).await?;
  Ok(Json(counts))
}

/// `GET /statistics/possession-status`
pub async fn possession_status<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
) -> Result<Json<Vec<GroupCount>>, ApiError>
where
  S: PropertyStore + 'static,
{
  grouped(&state, caller, GroupField::PossessionStatus).await
}

/// `GET /statistics/service-of-estate`
pub async fn service_of_estate<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
) -> Result<Json<Vec<GroupCount>>, ApiError>
where
  S: PropertyStore + 'static,
{
  grouped(&state, caller, GroupField::ServiceOfEstate).await
}

/// `GET /statistics/proof-of-possession`
pub async fn proof_of_possession<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
) -> Result<Json<Vec<GroupCount>>, ApiError>
where
  S: PropertyStore + 'static,
{
  grouped(&state, caller, GroupField::ProofOfPossession).await
}

/// `GET /statistics/amount-paid`
pub async fn amount_paid<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
) -> Result<Json<Vec<AmountPaidCount>>, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AuthenticatedOnly)?;
  let counts = state.store.amount_paid_counts().await.map_err(ApiError::store)?;
  note_view(state.store.as_ref(), &ctx, AMOUNT_PAID_REPORT).await?;
  Ok(Json(counts))
}

/// `GET /dashboard-metrics`
pub async fn dashboard<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
) -> Result<Json<DashboardMetrics>, ApiError>
where
  S: PropertyStore + 'static,
{
  caller.require(Policy::AdministratorOnly)?;
  let metrics = state
    .store
    .dashboard_metrics(chrono::Utc::now())
    .await
    .map_err(ApiError::store)?;
  Ok(Json(metrics))
}
