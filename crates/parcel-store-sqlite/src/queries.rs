//! Synchronous statements run inside `tokio_rusqlite` closures.
//!
//! Each helper takes a plain [`rusqlite::Connection`] so it can be used both
//! directly and through a [`rusqlite::Transaction`] (which derefs to one).

use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension as _, Row, params};

use crate::encode::{
  AttachmentRow, AuditRow, RawAttachment, RawAuditEntry, RawBulkKey, RawRecord, RecordRow,
};

// ─── Records ─────────────────────────────────────────────────────────────────

pub const RECORD_COLUMNS: &str = "record_id, fields_json, created_at, updated_at";

pub fn raw_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
  Ok(RawRecord {
    record_id:   row.get(0)?,
    fields_json: row.get(1)?,
    created_at:  row.get(2)?,
    updated_at:  row.get(3)?,
  })
}

pub fn record_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<RawRecord>> {
  conn
    .query_row(
      &format!("SELECT {RECORD_COLUMNS} FROM records WHERE record_id = ?1"),
      params![id],
      raw_record,
    )
    .optional()
}

pub fn record_by_upin(conn: &Connection, upin: &str) -> rusqlite::Result<Option<RawRecord>> {
  conn
    .query_row(
      &format!("SELECT {RECORD_COLUMNS} FROM records WHERE upin = ?1"),
      params![upin],
      raw_record,
    )
    .optional()
}

pub fn record_upin(conn: &Connection, id: &str) -> rusqlite::Result<Option<String>> {
  conn
    .query_row("SELECT upin FROM records WHERE record_id = ?1", params![id], |r| r.get(0))
    .optional()
}

/// Whether `upin` belongs to any record other than `except`.
pub fn upin_taken(conn: &Connection, upin: &str, except: Option<&str>) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT 1 FROM records WHERE upin = ?1 AND (?2 IS NULL OR record_id <> ?2)",
        params![upin, except],
        |_| Ok(()),
      )
      .optional()?
      .is_some(),
  )
}

pub fn insert_record(conn: &Connection, r: &RecordRow) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO records (
       record_id, upin, existing_archive_code, service_of_estate, kebele,
       proof_of_possession, possession_status,
       first_amount_cents, second_amount_cents, third_amount_cents,
       fields_json, created_at, updated_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    params![
      r.record_id,
      r.upin,
      r.existing_archive_code,
      r.service_of_estate,
      r.kebele,
      r.proof_of_possession,
      r.possession_status,
      r.first_amount_cents,
      r.second_amount_cents,
      r.third_amount_cents,
      r.fields_json,
      r.created_at,
      r.updated_at,
    ],
  )?;
  Ok(())
}

/// Overwrite every mutable column of the record. `created_at` is kept.
pub fn update_record(conn: &Connection, r: &RecordRow) -> rusqlite::Result<usize> {
  conn.execute(
    "UPDATE records SET
       upin = ?2, existing_archive_code = ?3, service_of_estate = ?4,
       kebele = ?5, proof_of_possession = ?6, possession_status = ?7,
       first_amount_cents = ?8, second_amount_cents = ?9, third_amount_cents = ?10,
       fields_json = ?11, updated_at = ?12
     WHERE record_id = ?1",
    params![
      r.record_id,
      r.upin,
      r.existing_archive_code,
      r.service_of_estate,
      r.kebele,
      r.proof_of_possession,
      r.possession_status,
      r.first_amount_cents,
      r.second_amount_cents,
      r.third_amount_cents,
      r.fields_json,
      r.updated_at,
    ],
  )
}

// ─── Attachments ─────────────────────────────────────────────────────────────

const ATTACHMENT_COLUMNS: &str = "attachment_id, record_id, blob_handle, file_name, display_name, \
   category, content_type, content_digest, size_bytes, uploaded_at";

fn raw_attachment(row: &Row<'_>) -> rusqlite::Result<RawAttachment> {
  Ok(RawAttachment {
    attachment_id:  row.get(0)?,
    record_id:      row.get(1)?,
    blob_handle:    row.get(2)?,
    file_name:      row.get(3)?,
    display_name:   row.get(4)?,
    category:       row.get(5)?,
    content_type:   row.get(6)?,
    content_digest: row.get(7)?,
    size_bytes:     row.get(8)?,
    uploaded_at:    row.get(9)?,
  })
}

/// Attachments of one record in upload order.
pub fn attachments_for(conn: &Connection, record_id: &str) -> rusqlite::Result<Vec<RawAttachment>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {ATTACHMENT_COLUMNS} FROM attachments
     WHERE record_id = ?1
     ORDER BY uploaded_at, rowid"
  ))?;
  let rows = stmt
    .query_map(params![record_id], raw_attachment)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// An attachment together with the UPIN of the record it belongs to.
pub fn attachment_with_upin(
  conn: &Connection,
  id: &str,
) -> rusqlite::Result<Option<(RawAttachment, String)>> {
  conn
    .query_row(
      "SELECT a.attachment_id, a.record_id, a.blob_handle, a.file_name, a.display_name,
              a.category, a.content_type, a.content_digest, a.size_bytes, a.uploaded_at,
              r.upin
       FROM attachments a
       JOIN records r ON r.record_id = a.record_id
       WHERE a.attachment_id = ?1",
      params![id],
      |row| Ok((raw_attachment(row)?, row.get(10)?)),
    )
    .optional()
}

pub fn attachment_with_digest(
  conn: &Connection,
  record_id: &str,
  digest: &str,
) -> rusqlite::Result<Option<RawAttachment>> {
  conn
    .query_row(
      &format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM attachments
         WHERE record_id = ?1 AND content_digest = ?2
         ORDER BY uploaded_at, rowid
         LIMIT 1"
      ),
      params![record_id, digest],
      raw_attachment,
    )
    .optional()
}

pub fn bulk_keys(conn: &Connection, record_id: &str) -> rusqlite::Result<HashSet<RawBulkKey>> {
  let mut stmt = conn.prepare(
    "SELECT content_digest, display_name, file_name, category, content_type
     FROM attachments WHERE record_id = ?1",
  )?;
  let keys = stmt
    .query_map(params![record_id], |r| {
      Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
    })?
    .collect::<rusqlite::Result<HashSet<_>>>()?;
  Ok(keys)
}

pub fn insert_attachment(conn: &Connection, a: &AttachmentRow) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO attachments (
       attachment_id, record_id, blob_handle, file_name, display_name,
       category, content_type, content_digest, size_bytes, uploaded_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    params![
      a.attachment_id,
      a.record_id,
      a.blob_handle,
      a.file_name,
      a.display_name,
      a.category,
      a.content_type,
      a.content_digest,
      a.size_bytes,
      a.uploaded_at,
    ],
  )?;
  Ok(())
}

// ─── Audit log ───────────────────────────────────────────────────────────────

pub const AUDIT_COLUMNS: &str = "entry_id, user, action, details, ip_address, role, timestamp";

pub fn raw_audit(row: &Row<'_>) -> rusqlite::Result<RawAuditEntry> {
  Ok(RawAuditEntry {
    entry_id:   row.get(0)?,
    user:       row.get(1)?,
    action:     row.get(2)?,
    details:    row.get(3)?,
    ip_address: row.get(4)?,
    role:       row.get(5)?,
    timestamp:  row.get(6)?,
  })
}

/// Append one entry and return its sequence number.
pub fn insert_audit(conn: &Connection, e: &AuditRow) -> rusqlite::Result<i64> {
  conn.execute(
    "INSERT INTO audit_log (user, action, details, ip_address, role, timestamp)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    params![e.user, e.action, e.details, e.ip_address, e.role, e.timestamp],
  )?;
  Ok(conn.last_insert_rowid())
}

// ─── Accounts ────────────────────────────────────────────────────────────────

pub fn user_id(conn: &Connection, username: &str) -> rusqlite::Result<Option<String>> {
  conn
    .query_row("SELECT user_id FROM users WHERE username = ?1", params![username], |r| r.get(0))
    .optional()
}

/// `(user_id, username, password_hash, created_at)` for one user.
pub fn credentials(
  conn: &Connection,
  username: &str,
) -> rusqlite::Result<Option<(String, String, String, String)>> {
  conn
    .query_row(
      "SELECT user_id, username, password_hash, created_at FROM users WHERE username = ?1",
      params![username],
      |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    )
    .optional()
}

pub fn roles_for(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare("SELECT role FROM user_roles WHERE user_id = ?1 ORDER BY role")?;
  let roles = stmt
    .query_map(params![user_id], |r| r.get(0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(roles)
}

pub fn role_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row("SELECT 1 FROM roles WHERE name = ?1", params![name], |_| Ok(()))
      .optional()?
      .is_some(),
  )
}
