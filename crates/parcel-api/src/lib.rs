//! HTTP surface for the parcel property-records backend.
//!
//! Exposes an axum [`Router`] backed by any [`PropertyStore`]. Requests are
//! authenticated with HTTP Basic against the store's accounts; every handler
//! checks its own [`parcel_core::access::Policy`] before touching the store.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = parcel_api::router(AppState::new(store, ApiConfig::default()));
//! axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
//! ```

pub mod accounts;
pub mod audit;
pub mod auth;
pub mod error;
pub mod files;
pub mod form;
pub mod records;
pub mod stats;

use std::sync::Arc;

use axum::{
  Router,
  extract::DefaultBodyLimit,
  routing::{get, patch, post, put},
};
use parcel_core::{access::Policy, audit::DEFAULT_QUERY_LIMIT, store::PropertyStore};
use serde::Deserialize;

pub use error::ApiError;

// ─── Configuration ────────────────────────────────────────────────────────────

/// The request-facing part of the server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Upper bound on entries returned by `GET /audit-logs`.
  #[serde(default = "default_audit_log_limit")]
  pub audit_log_limit:      usize,
  /// Who may read the audit log.
  #[serde(default)]
  pub audit_log_policy:     Policy,
  #[serde(default = "default_max_upload_bytes")]
  pub max_upload_bytes:     usize,
  #[serde(default = "default_recent_records_limit")]
  pub recent_records_limit: usize,
}

fn default_audit_log_limit() -> usize { DEFAULT_QUERY_LIMIT }

fn default_max_upload_bytes() -> usize { 64 * 1024 * 1024 }

fn default_recent_records_limit() -> usize { 4 }

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      audit_log_limit:      default_audit_log_limit(),
      audit_log_policy:     Policy::default(),
      max_upload_bytes:     default_max_upload_bytes(),
      recent_records_limit: default_recent_records_limit(),
    }
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub store:  Arc<S>,
  pub config: Arc<ApiConfig>,
}

impl<S> AppState<S> {
  pub fn new(store: S, config: ApiConfig) -> Self {
    Self { store: Arc::new(store), config: Arc::new(config) }
  }
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), config: Arc::clone(&self.config) }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the full API router for `state`.
///
/// Handlers read the caller's address from `ConnectInfo<SocketAddr>` when the
/// router is served with connect info; without it, audit entries carry no
/// address.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: PropertyStore + 'static,
{
  let body_limit = state.config.max_upload_bytes;

  Router::new()
    // Accounts
    .route("/accounts/login",  post(accounts::login::<S>))
    .route("/accounts/logout", post(accounts::logout::<S>))
    .route("/accounts/users",  get(accounts::list_users::<S>).post(accounts::create_user::<S>))
    .route(
      "/accounts/users/{username}",
      get(accounts::get_user::<S>)
        .patch(accounts::update_user::<S>)
        .delete(accounts::delete_user::<S>),
    )
    .route(
      "/accounts/users/{username}/roles/{role}",
      post(accounts::grant_role::<S>).delete(accounts::revoke_role::<S>),
    )
    .route("/accounts/roles", get(accounts::list_roles::<S>))
    // Records
    .route("/records",                   get(records::list::<S>).post(records::create::<S>))
    .route("/records/recent",            get(records::recent::<S>))
    .route("/records/check-upin/{upin}", get(records::check_upin::<S>))
    .route(
      "/records/{id}",
      get(records::get_one::<S>)
        .put(records::update::<S>)
        .delete(records::delete::<S>),
    )
    .route("/records/upin/{upin}", patch(records::patch_by_upin::<S>))
    // Files
    .route(
      "/records/upin/{upin}/files",
      get(files::list::<S>).post(files::add::<S>).put(files::bulk::<S>),
    )
    .route("/files/{id}",         put(files::replace::<S>).delete(files::delete::<S>))
    .route("/files/{id}/content", get(files::download::<S>))
    // Audit log
    .route("/audit-logs", get(audit::list::<S>))
    // Statistics
    .route("/statistics/possession-status",    get(stats::possession_status::<S>))
    .route("/statistics/service-of-estate",    get(stats::service_of_estate::<S>))
    .route("/statistics/proof-of-possession",  get(stats::proof_of_possession::<S>))
    .route("/statistics/amount-paid",          get(stats::amount_paid::<S>))
    .route("/dashboard-metrics",               get(stats::dashboard::<S>))
    .layer(DefaultBodyLimit::max(body_limit))
    .with_state(state)
}

#[cfg(test)]
mod tests;
