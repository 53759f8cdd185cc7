//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings with microsecond
//! precision so that string order is chronological order. UUIDs are stored
//! hyphenated and lowercase. Record fields are stored as JSON with the
//! filterable ones duplicated into plain columns.

use std::{collections::HashSet, net::IpAddr};

use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use parcel_core::{
  access::Role,
  account::User,
  attachment::{Attachment, Category},
  audit::{AuditEntry, NewAuditEntry},
  blob::BlobHandle,
  hash::ContentDigest,
  record::{Record, RecordFields},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

/// The current time at storage precision, so values handed back to callers
/// compare equal to what a later read returns.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

// ─── Records ─────────────────────────────────────────────────────────────────

/// Column values for one `records` row.
pub struct RecordRow {
  pub record_id:             String,
  pub upin:                  String,
  pub existing_archive_code: String,
  pub service_of_estate:     String,
  pub kebele:                String,
  pub proof_of_possession:   String,
  pub possession_status:     String,
  pub first_amount_cents:    Option<i64>,
  pub second_amount_cents:   Option<i64>,
  pub third_amount_cents:    Option<i64>,
  pub fields_json:           String,
  pub created_at:            String,
  pub updated_at:            String,
}

impl RecordRow {
  pub fn encode(record: &Record) -> serde_json::Result<Self> {
    let f = &record.fields;
    Ok(Self {
      record_id:             encode_uuid(record.id),
      upin:                  f.upin.clone(),
      existing_archive_code: f.existing_archive_code.clone(),
      service_of_estate:     f.service_of_estate.clone(),
      kebele:                f.kebele.clone(),
      proof_of_possession:   f.proof_of_possession.clone(),
      possession_status:     f.possession_status.clone(),
      first_amount_cents:    f.first_amount.map(|a| a.cents()),
      second_amount_cents:   f.second_amount.map(|a| a.cents()),
      third_amount_cents:    f.third_amount.map(|a| a.cents()),
      fields_json:           serde_json::to_string(f)?,
      created_at:            encode_dt(record.created_at),
      updated_at:            encode_dt(record.updated_at),
    })
  }
}

/// Raw strings read directly from a `records` row.
pub struct RawRecord {
  pub record_id:   String,
  pub fields_json: String,
  pub created_at:  String,
  pub updated_at:  String,
}

impl RawRecord {
  pub fn into_record(self) -> Result<Record> {
    Ok(Record {
      id:         decode_uuid(&self.record_id)?,
      fields:     decode_fields(&self.fields_json)?,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

pub fn decode_fields(s: &str) -> serde_json::Result<RecordFields> { serde_json::from_str(s) }

// ─── Attachments ─────────────────────────────────────────────────────────────

/// The bulk-upload dedup tuple as stored: digest, display name, filename,
/// category, content type.
pub type RawBulkKey = (String, String, String, String, String);

/// Column values for one `attachments` row.
pub struct AttachmentRow {
  pub attachment_id:  String,
  pub record_id:      String,
  pub blob_handle:    String,
  pub file_name:      String,
  pub display_name:   String,
  pub category:       String,
  pub content_type:   String,
  pub content_digest: String,
  pub size_bytes:     i64,
  pub uploaded_at:    String,
}

impl AttachmentRow {
  pub fn encode(a: &Attachment) -> Self {
    Self {
      attachment_id:  encode_uuid(a.id),
      record_id:      encode_uuid(a.record_id),
      blob_handle:    a.blob.as_str().to_owned(),
      file_name:      a.file_name.clone(),
      display_name:   a.display_name.clone(),
      category:       a.category.as_str().to_owned(),
      content_type:   a.content_type.clone(),
      content_digest: a.content_digest.as_str().to_owned(),
      size_bytes:     i64::try_from(a.size_bytes).unwrap_or(i64::MAX),
      uploaded_at:    encode_dt(a.uploaded_at),
    }
  }

  pub fn bulk_key(&self) -> RawBulkKey {
    (
      self.content_digest.clone(),
      self.display_name.clone(),
      self.file_name.clone(),
      self.category.clone(),
      self.content_type.clone(),
    )
  }

  pub fn is_in(&self, keys: &HashSet<RawBulkKey>) -> bool { keys.contains(&self.bulk_key()) }
}

/// Raw strings read directly from an `attachments` row. Shares its column
/// order with [`AttachmentRow`].
pub type RawAttachment = AttachmentRow;

impl RawAttachment {
  pub fn into_attachment(self) -> Result<Attachment> {
    Ok(Attachment {
      id:             decode_uuid(&self.attachment_id)?,
      record_id:      decode_uuid(&self.record_id)?,
      blob:           BlobHandle::new(self.blob_handle),
      file_name:      self.file_name,
      display_name:   self.display_name,
      category:       Category::new(self.category)?,
      content_type:   self.content_type,
      content_digest: ContentDigest::from_hex(self.content_digest),
      size_bytes:     u64::try_from(self.size_bytes)
        .map_err(|_| Error::Corrupt(format!("negative size_bytes {}", self.size_bytes)))?,
      uploaded_at:    decode_dt(&self.uploaded_at)?,
    })
  }
}

// ─── Audit log ───────────────────────────────────────────────────────────────

/// Column values for one `audit_log` insert.
pub struct AuditRow {
  pub user:       String,
  pub action:     String,
  pub details:    String,
  pub ip_address: Option<String>,
  pub role:       String,
  pub timestamp:  String,
}

impl AuditRow {
  pub fn encode(entry: &NewAuditEntry, at: DateTime<Utc>) -> Self {
    Self {
      user:       entry.user.clone(),
      action:     entry.action.as_str().to_owned(),
      details:    entry.details.clone(),
      ip_address: entry.ip_address.map(|ip| ip.to_string()),
      role:       entry.role.clone(),
      timestamp:  encode_dt(at),
    }
  }
}

/// Raw strings read directly from an `audit_log` row.
pub struct RawAuditEntry {
  pub entry_id:   i64,
  pub user:       String,
  pub action:     String,
  pub details:    String,
  pub ip_address: Option<String>,
  pub role:       String,
  pub timestamp:  String,
}

impl RawAuditEntry {
  pub fn into_entry(self) -> Result<AuditEntry> {
    let ip_address = self
      .ip_address
      .as_deref()
      .map(str::parse::<IpAddr>)
      .transpose()
      .map_err(|e| Error::Corrupt(format!("ip_address: {e}")))?;
    let Ok(action) = self.action.parse();
    Ok(AuditEntry {
      id: self.entry_id,
      user: self.user,
      action,
      details: self.details,
      ip_address,
      role: self.role,
      timestamp: decode_dt(&self.timestamp)?,
    })
  }
}

// ─── Users ───────────────────────────────────────────────────────────────────

/// Raw strings read directly from a `users` row plus its role names.
pub struct RawUser {
  pub user_id:    String,
  pub username:   String,
  pub created_at: String,
  pub roles:      Vec<String>,
}

impl RawUser {
  pub fn into_user(self) -> Result<User> {
    Ok(User {
      id:         decode_uuid(&self.user_id)?,
      username:   self.username,
      roles:      self.roles.iter().map(|r| Role::from_name(r)).collect(),
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone as _;

  use super::*;

  #[test]
  fn timestamps_sort_as_strings() {
    let a = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let b = a + chrono::Duration::microseconds(500_000);
    let c = a + chrono::Duration::microseconds(123);
    let mut encoded = [encode_dt(b), encode_dt(a), encode_dt(c)];
    encoded.sort();
    assert_eq!(encoded, [encode_dt(a), encode_dt(c), encode_dt(b)]);
    assert_eq!(decode_dt(&encode_dt(c)).unwrap(), c);
  }

  #[test]
  fn now_survives_a_roundtrip() {
    let t = now();
    assert_eq!(decode_dt(&encode_dt(t)).unwrap(), t);
  }
}
