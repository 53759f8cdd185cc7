//! Access Policy: per-request capability checks over an explicit actor.
//!
//! The actor is resolved once at the request boundary and passed down as an
//! [`ActorContext`]; nothing in this crate looks it up ambiently.

use std::{fmt, net::IpAddr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const ADMINISTRATORS: &str = "Administrators";
pub const EDITORS: &str = "Editors";

/// Label recorded for actors with no session.
pub const ANONYMOUS_LABEL: &str = "Anonymous";

/// Role recorded for actors with no role assignments.
pub const DEFAULT_ROLE_LABEL: &str = "User";

// ─── Roles ───────────────────────────────────────────────────────────────────

/// A role (group) an actor may be a member of.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
  Administrators,
  Editors,
  Custom(String),
}

impl Role {
  pub fn from_name(name: &str) -> Self {
    match name {
      ADMINISTRATORS => Self::Administrators,
      EDITORS => Self::Editors,
      other => Self::Custom(other.to_owned()),
    }
  }

  pub fn name(&self) -> &str {
    match self {
      Self::Administrators => ADMINISTRATORS,
      Self::Editors => EDITORS,
      Self::Custom(name) => name,
    }
  }

  /// Lower ranks take precedence when an actor holds several roles.
  fn rank(&self) -> u8 {
    match self {
      Self::Administrators => 0,
      Self::Editors => 1,
      Self::Custom(_) => 2,
    }
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl Serialize for Role {
  fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(self.name())
  }
}

impl<'de> Deserialize<'de> for Role {
  fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
    Ok(Self::from_name(&String::deserialize(d)?))
  }
}

// ─── Actor ───────────────────────────────────────────────────────────────────

/// Who is calling, as resolved by the identity collaborator for this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
  pub label:            String,
  pub roles:            Vec<Role>,
  pub is_authenticated: bool,
}

impl ActorContext {
  pub fn anonymous() -> Self {
    Self {
      label:            ANONYMOUS_LABEL.to_owned(),
      roles:            Vec::new(),
      is_authenticated: false,
    }
  }

  pub fn authenticated(label: impl Into<String>, roles: Vec<Role>) -> Self {
    Self { label: label.into(), roles, is_authenticated: true }
  }

  pub fn has_role(&self, role: &Role) -> bool { self.roles.contains(role) }

  /// The role that represents this actor in the audit log:
  /// Administrators, then Editors, then other roles alphabetically.
  pub fn primary_role(&self) -> Option<&Role> {
    self
      .roles
      .iter()
      .min_by(|a, b| a.rank().cmp(&b.rank()).then_with(|| a.name().cmp(b.name())))
  }

  /// [`Self::primary_role`] as a label, defaulting to `"User"`.
  pub fn role_label(&self) -> String {
    self
      .primary_role()
      .map(|r| r.name().to_owned())
      .unwrap_or_else(|| DEFAULT_ROLE_LABEL.to_owned())
  }

  /// The actor label recorded in the audit log.
  pub fn audit_label(&self) -> String {
    if self.is_authenticated {
      self.label.clone()
    } else {
      ANONYMOUS_LABEL.to_owned()
    }
  }
}

/// Everything a core operation needs to know about the inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
  pub actor:       ActorContext,
  pub source_addr: Option<IpAddr>,
}

impl RequestContext {
  pub fn new(actor: ActorContext, source_addr: Option<IpAddr>) -> Self {
    Self { actor, source_addr }
  }

  /// An unauthenticated context with no known address.
  pub fn anonymous() -> Self { Self::new(ActorContext::anonymous(), None) }
}

// ─── Policies ────────────────────────────────────────────────────────────────

/// The named capability checks used across the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
  AuthenticatedOnly,
  #[default]
  AdministratorOnly,
  AdministratorOrEditor,
}

impl Policy {
  /// Authentication is checked first (`Unauthorized`), then role membership
  /// (`Forbidden`).
  pub fn check(self, actor: &ActorContext) -> Result<()> {
    if !actor.is_authenticated {
      return Err(Error::Unauthorized);
    }
    let permitted = match self {
      Self::AuthenticatedOnly => true,
      Self::AdministratorOnly => actor.has_role(&Role::Administrators),
      Self::AdministratorOrEditor => {
        actor.has_role(&Role::Administrators) || actor.has_role(&Role::Editors)
      }
    };
    if permitted {
      Ok(())
    } else {
      Err(Error::Forbidden(format!("{} may not perform this action", actor.label)))
    }
  }
}
