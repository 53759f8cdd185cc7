//! Handlers for `/accounts` endpoints.
//!
//! | Method          | Path | Notes |
//! |-----------------|------|-------|
//! | `POST`          | `/accounts/login` | Body: `{"username","password"}` |
//! | `POST`          | `/accounts/logout` | |
//! | `GET` / `POST`  | `/accounts/users` | Body: `{"username","password","roles"}` |
//! | `GET` / `PATCH` / `DELETE` | `/accounts/users/{username}` | PATCH body: any of `{"username","password","roles"}` |
//! | `POST`/`DELETE` | `/accounts/users/{username}/roles/{role}` | Grant / revoke |
//! | `GET`           | `/accounts/roles` | |
//!
//! Login does not open a session; every other request carries HTTP Basic
//! credentials.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use parcel_core::{
  Error as CoreError,
  access::Policy,
  account::{NewUser, User, UserUpdate},
  audit::{AuditAction, LOGIN_FAILED, NewAuditEntry},
  store::PropertyStore,
};
use serde::Deserialize;

use crate::{
  AppState,
  auth::{self, Caller},
  error::ApiError,
};

// ─── Session ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginBody {
  pub username: String,
  pub password: String,
}

/// `POST /accounts/login`
pub async fn login<S>(
  State(state): State<AppState<S>>,
  Caller(ctx): Caller,
  Json(body): Json<LoginBody>,
) -> Result<Json<User>, ApiError>
where
  S: PropertyStore + 'static,
{
  let store = state.store.as_ref();

  let Some(user) = auth::authenticate(store, &body.username, &body.password).await? else {
    tracing::warn!(username = %body.username, "failed login");
    let entry = NewAuditEntry::new(
      &ctx,
      AuditAction::Custom(LOGIN_FAILED.into()),
      format!("Failed login attempt for {}.", body.username),
    );
    store.append_audit(entry).await.map_err(ApiError::store)?;
    return Err(ApiError::unauthorized());
  };

  let role = auth::actor_for(&user).role_label();
  let entry = NewAuditEntry::new(
    &ctx,
    AuditAction::Login,
    format!("User {} logged in.", user.username),
  )
  .with_user(&user.username)
  .with_role(role);
  store.append_audit(entry).await.map_err(ApiError::store)?;

  tracing::info!(username = %user.username, "login");
  Ok(Json(user))
}

/// `POST /accounts/logout`
pub async fn logout<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
) -> Result<StatusCode, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AuthenticatedOnly)?;
  let details = format!("User {} logged out.", ctx.actor.label);
  let entry = NewAuditEntry::new(&ctx, AuditAction::Logout, details);
  state.store.append_audit(entry).await.map_err(ApiError::store)?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Users ────────────────────────────────────────────────────────────────────

/// `GET /accounts/users`
pub async fn list_users<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
) -> Result<Json<Vec<User>>, ApiError>
where
  S: PropertyStore + 'static,
{
  caller.require(Policy::AdministratorOnly)?;
  let users = state.store.list_users().await.map_err(ApiError::store)?;
  Ok(Json(users))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserBody {
  pub username: String,
  pub password: String,
  #[serde(default)]
  pub roles:    Vec<String>,
}

/// `POST /accounts/users`
pub async fn create_user<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Json(body): Json<CreateUserBody>,
) -> Result<(StatusCode, Json<User>), ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AdministratorOnly)?;
  if body.password.is_empty() {
    return Err(ApiError::BadRequest("password is required".into()));
  }
  let input = NewUser {
    username:      body.username,
    password_hash: auth::hash_password(&body.password)?,
    roles:         body.roles,
  };
  let user = state.store.create_user(&ctx, input).await.map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserBody {
  pub username: Option<String>,
  /// Ignored when empty.
  pub password: Option<String>,
  /// Replaces every membership when present.
  pub roles:    Option<Vec<String>>,
}

/// `GET /accounts/users/{username}`
pub async fn get_user<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(username): Path<String>,
) -> Result<Json<User>, ApiError>
where
  S: PropertyStore + 'static,
{
  caller.require(Policy::AdministratorOnly)?;
  let user = state
    .store
    .get_user(&username)
    .await
    .map_err(ApiError::store)?
    .ok_or(CoreError::UserNotFound(username))?;
  Ok(Json(user))
}

/// `PATCH /accounts/users/{username}`
pub async fn update_user<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(username): Path<String>,
  Json(body): Json<UpdateUserBody>,
) -> Result<Json<User>, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AdministratorOnly)?;
  let password_hash = match body.password.filter(|p| !p.is_empty()) {
    Some(password) => Some(auth::hash_password(&password)?),
    None => None,
  };
  let update = UserUpdate { username: body.username, password_hash, roles: body.roles };
  let user = state
    .store
    .update_user(&ctx, &username, update)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(user))
}

/// `DELETE /accounts/users/{username}`
pub async fn delete_user<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path(username): Path<String>,
) -> Result<StatusCode, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AdministratorOnly)?;
  state.store.delete_user(&ctx, &username).await.map_err(ApiError::store)?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Roles ────────────────────────────────────────────────────────────────────

/// `GET /accounts/roles`
pub async fn list_roles<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
) -> Result<Json<Vec<String>>, ApiError>
where
  S: PropertyStore + 'static,
{
  caller.require(Policy::AdministratorOnly)?;
  let roles = state.store.list_roles().await.map_err(ApiError::store)?;
  Ok(Json(roles))
}

/// `POST /accounts/users/{username}/roles/{role}`
pub async fn grant_role<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path((username, role)): Path<(String, String)>,
) -> Result<Json<User>, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AdministratorOnly)?;
  let user = state
    .store
    .grant_role(&ctx, &username, &role)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(user))
}

/// `DELETE /accounts/users/{username}/roles/{role}`
pub async fn revoke_role<S>(
  State(state): State<AppState<S>>,
  caller: Caller,
  Path((username, role)): Path<(String, String)>,
) -> Result<Json<User>, ApiError>
where
  S: PropertyStore + 'static,
{
  let ctx = caller.require(Policy::AdministratorOnly)?;
  let user = state
    .store
    .revoke_role(&ctx, &username, &role)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(user))
}
