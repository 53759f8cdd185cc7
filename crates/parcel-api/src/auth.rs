//! HTTP Basic identity resolution and argon2 password handling.
//!
//! Every request is resolved to a [`RequestContext`] by the [`Caller`]
//! extractor. Missing or wrong credentials resolve to the anonymous actor;
//! it is the handler's [`Policy`] check that turns that into a 401.

use std::net::SocketAddr;

use argon2::{
  Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use axum::{
  extract::{ConnectInfo, FromRequestParts},
  http::{HeaderMap, header, request::Parts},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use parcel_core::{
  access::{ActorContext, Policy, RequestContext},
  account::User,
  store::PropertyStore,
};
use rand_core::OsRng;

use crate::{AppState, error::ApiError};

/// The identity behind the current request.
#[derive(Debug, Clone)]
pub struct Caller(pub RequestContext);

impl Caller {
  /// Apply `policy` and hand back the context for the store call.
  pub fn require(self, policy: Policy) -> Result<RequestContext, ApiError> {
    policy.check(&self.0.actor)?;
    Ok(self.0)
  }
}

/// Username and password from an `Authorization: Basic` header.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
  let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
  let encoded = value.strip_prefix("Basic ")?;
  let decoded = B64.decode(encoded.trim()).ok()?;
  let creds = String::from_utf8(decoded).ok()?;
  let (username, password) = creds.split_once(':')?;
  Some((username.to_owned(), password.to_owned()))
}

/// The address the request came from, when the server exposes it.
pub fn source_addr(parts: &Parts) -> Option<std::net::IpAddr> {
  parts
    .extensions
    .get::<ConnectInfo<SocketAddr>>()
    .map(|ConnectInfo(addr)| addr.ip())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
  let Ok(parsed) = PasswordHash::new(password_hash) else {
    return false;
  };
  Argon2::default()
    .verify_password(password.as_bytes(), &parsed)
    .is_ok()
}

/// Produce an argon2 PHC string for `password` with a fresh salt.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
  let salt = SaltString::generate(&mut OsRng);
  let hash = Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map_err(|e| ApiError::Store(format!("argon2 error: {e}").into()))?;
  Ok(hash.to_string())
}

/// Check `username`/`password` against the store's accounts.
pub async fn authenticate<S: PropertyStore>(
  store: &S,
  username: &str,
  password: &str,
) -> Result<Option<User>, ApiError> {
  let Some(creds) = store.find_credentials(username).await.map_err(ApiError::store)? else {
    return Ok(None);
  };
  Ok(verify_password(password, &creds.password_hash).then_some(creds.user))
}

pub fn actor_for(user: &User) -> ActorContext {
  ActorContext::authenticated(user.username.clone(), user.roles.clone())
}

impl<S> FromRequestParts<AppState<S>> for Caller
where
  S: PropertyStore + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    let addr = source_addr(parts);

    let actor = match basic_credentials(&parts.headers) {
      Some((username, password)) => {
        match authenticate(state.store.as_ref(), &username, &password).await? {
          Some(user) => actor_for(&user),
          None => {
            tracing::warn!(%username, "rejected basic credentials");
            ActorContext::anonymous()
          }
        }
      }
      None => ActorContext::anonymous(),
    };

    Ok(Caller(RequestContext::new(actor, addr)))
  }
}
