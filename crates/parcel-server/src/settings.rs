//! Runtime configuration, deserialised from `config.toml` and `PARCEL_*`
//! environment variables.

use std::path::{Path, PathBuf};

use parcel_api::ApiConfig;
use parcel_core::access::Policy;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                          String,
  #[serde(default = "default_port")]
  pub port:                          u16,
  /// SQLite database file. A leading `~/` is expanded.
  #[serde(default = "default_store_path")]
  pub store_path:                    PathBuf,
  /// Directory for attachment bytes. A leading `~/` is expanded.
  #[serde(default = "default_blob_dir")]
  pub blob_dir:                      PathBuf,
  /// When both are set, this user is made an administrator at startup.
  pub bootstrap_admin_username:      Option<String>,
  /// PHC string from `parcel-server --hash-password`.
  pub bootstrap_admin_password_hash: Option<String>,
  #[serde(default = "default_audit_log_limit")]
  pub audit_log_limit:               usize,
  #[serde(default)]
  pub audit_log_policy:              Policy,
  #[serde(default = "default_max_upload_bytes")]
  pub max_upload_bytes:              usize,
  #[serde(default = "default_recent_records_limit")]
  pub recent_records_limit:          usize,
}

fn default_host() -> String { "127.0.0.1".to_owned() }

fn default_port() -> u16 { 8000 }

fn default_store_path() -> PathBuf { PathBuf::from("parcel.db") }

fn default_blob_dir() -> PathBuf { PathBuf::from("blobs") }

fn default_audit_log_limit() -> usize { ApiConfig::default().audit_log_limit }

fn default_max_upload_bytes() -> usize { ApiConfig::default().max_upload_bytes }

fn default_recent_records_limit() -> usize { ApiConfig::default().recent_records_limit }

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn api(&self) -> ApiConfig {
    ApiConfig {
      audit_log_limit:      self.audit_log_limit,
      audit_log_policy:     self.audit_log_policy,
      max_upload_bytes:     self.max_upload_bytes,
      recent_records_limit: self.recent_records_limit,
    }
  }

  /// Username and hash of the bootstrap administrator, when both are set.
  pub fn bootstrap_admin(&self) -> Option<(&str, &str)> {
    Some((
      self.bootstrap_admin_username.as_deref()?,
      self.bootstrap_admin_password_hash.as_deref()?,
    ))
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
