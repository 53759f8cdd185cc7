//! Accounts: the identities and role assignments the identity collaborator
//! resolves requests against.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{Error, Result, access::Role};

const USERNAME_MAX_LEN: usize = 150;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
  pub id:         Uuid,
  pub username:   String,
  pub roles:      Vec<Role>,
  pub created_at: DateTime<Utc>,
}

/// A user together with the stored password hash, for verification only.
#[derive(Debug, Clone)]
pub struct Credentials {
  pub user:          User,
  /// PHC string produced by argon2.
  pub password_hash: String,
}

/// Input to account creation. The password is hashed by the caller.
#[derive(Debug, Clone)]
pub struct NewUser {
  pub username:      String,
  pub password_hash: String,
  pub roles:         Vec<String>,
}

impl NewUser {
  pub fn validate(&self) -> Result<()> { validate_username(&self.username) }
}

/// Changes to an existing account. `None` leaves a field as it is; `roles`
/// replaces the whole membership when present.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
  pub username:      Option<String>,
  /// PHC string produced by argon2.
  pub password_hash: Option<String>,
  pub roles:         Option<Vec<String>>,
}

impl UserUpdate {
  pub fn validate(&self) -> Result<()> {
    match &self.username {
      Some(name) => validate_username(name),
      None => Ok(()),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.username.is_none() && self.password_hash.is_none() && self.roles.is_none()
  }
}

fn validate_username(name: &str) -> Result<()> {
  let name = name.trim();
  if name.is_empty() {
    return Err(Error::Validation("username is required".into()));
  }
  if name.len() > USERNAME_MAX_LEN {
    return Err(Error::Validation(format!(
      "username may be at most {USERNAME_MAX_LEN} characters"
    )));
  }
  // Usernames travel in HTTP Basic credentials, which split on ':'.
  if name.contains(':') || name.chars().any(char::is_whitespace) {
    return Err(Error::Validation(
      "username may not contain ':' or whitespace".into(),
    ));
  }
  Ok(())
}
