//! Audit log entries: an append-only, denormalised trail of who did what.
//!
//! Entries snapshot the actor's label and role as plain strings so history
//! survives the deletion of users, records and attachments.

use std::{convert::Infallible, fmt, net::IpAddr, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::access::RequestContext;

/// Default cap on entries returned by an audit query.
pub const DEFAULT_QUERY_LIMIT: usize = 500;

// ─── Action ──────────────────────────────────────────────────────────────────

/// What kind of thing happened. The known kinds form the display vocabulary;
/// storage accepts anything through [`AuditAction::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuditAction {
  Login,
  Logout,
  Create,
  Update,
  Delete,
  Download,
  View,
  Other,
  /// An action outside the display vocabulary, e.g. `REPORT_GENERATED`.
  Custom(String),
}

impl AuditAction {
  pub fn as_str(&self) -> &str {
    match self {
      Self::Login => "LOGIN",
      Self::Logout => "LOGOUT",
      Self::Create => "CREATE",
      Self::Update => "UPDATE",
      Self::Delete => "DELETE",
      Self::Download => "DOWNLOAD",
      Self::View => "VIEW",
      Self::Other => "OTHER",
      Self::Custom(s) => s,
    }
  }
}

impl FromStr for AuditAction {
  type Err = Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s {
      "LOGIN" => Self::Login,
      "LOGOUT" => Self::Logout,
      "CREATE" => Self::Create,
      "UPDATE" => Self::Update,
      "DELETE" => Self::Delete,
      "DOWNLOAD" => Self::Download,
      "VIEW" => Self::View,
      "OTHER" => Self::Other,
      other => Self::Custom(other.to_owned()),
    })
  }
}

impl fmt::Display for AuditAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for AuditAction {
  fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for AuditAction {
  fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    let Ok(action) = String::deserialize(d)?.parse();
    Ok(action)
  }
}

/// Ad hoc action counted by the dashboard alongside [`AuditAction::View`].
pub const REPORT_GENERATED: &str = "REPORT_GENERATED";

/// Ad hoc action appended when a login attempt is rejected.
pub const LOGIN_FAILED: &str = "LOGIN_FAILED";

// ─── Entries ─────────────────────────────────────────────────────────────────

/// A stored audit entry. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
  /// Monotonic sequence number; breaks timestamp ties in newest-first reads.
  pub id:         i64,
  pub user:       String,
  pub action:     AuditAction,
  pub details:    String,
  pub ip_address: Option<IpAddr>,
  pub role:       String,
  pub timestamp:  DateTime<Utc>,
}

/// Input to an audit append. The store assigns `id` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
  pub user:       String,
  pub action:     AuditAction,
  pub details:    String,
  pub ip_address: Option<IpAddr>,
  pub role:       String,
}

impl NewAuditEntry {
  /// Attribute an action to the request's actor: their label (or
  /// `"Anonymous"`) and their highest-precedence role (or `"User"`).
  pub fn new(
    ctx: &RequestContext,
    action: AuditAction,
    details: impl Into<String>,
  ) -> Self {
    Self {
      user:       ctx.actor.audit_label(),
      action,
      details:    details.into(),
      ip_address: ctx.source_addr,
      role:       ctx.actor.role_label(),
    }
  }

  /// Override the actor label, for authentication flows that log an actor
  /// before a session exists.
  pub fn with_user(mut self, user: impl Into<String>) -> Self {
    self.user = user.into();
    self
  }

  pub fn with_role(mut self, role: impl Into<String>) -> Self {
    self.role = role.into();
    self
  }
}
