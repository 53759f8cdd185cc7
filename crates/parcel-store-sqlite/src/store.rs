//! [`SqliteStore`]: the SQLite implementation of [`PropertyStore`].
//!
//! Every mutation and its audit entry commit in one `IMMEDIATE` transaction.
//! Blob bytes are written before the transaction and removed again if it
//! does not commit; blobs orphaned by deletes are removed after it commits.

use std::{collections::HashSet, path::Path, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{TransactionBehavior, params, types::Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parcel_core::{
  access::{ADMINISTRATORS, RequestContext, Role},
  account::{Credentials, NewUser, User, UserUpdate},
  attachment::{
    AddOutcome, Attachment, BulkOutcome, BulkUpload, Category, NewAttachment, Upload,
    dedup_by_digest,
  },
  audit::{AuditAction, AuditEntry, NewAuditEntry, REPORT_GENERATED},
  blob::{BlobHandle, BlobStore},
  record::{Record, RecordDetail, RecordDraft, RecordFields, RecordFilter},
  stats::{
    AmountField, AmountPaidCount, DashboardMetrics, GroupCount, GroupField,
    active_window_start, start_of_month,
  },
  store::PropertyStore,
};

use crate::{
  Error, Result,
  encode::{
    AttachmentRow, AuditRow, RawAttachment, RawAuditEntry, RawRecord, RawUser, RecordRow,
    decode_dt, decode_fields, encode_dt, encode_uuid, now,
  },
  error::{json_err, raise},
  queries,
  schema::SCHEMA,
};

fn blob_err(e: impl std::error::Error + Send + Sync + 'static) -> Error {
  Error::Blob(Box::new(e))
}

fn record_column(filter: &RecordFilter) -> &'static str {
  match filter {
    RecordFilter::Upin(_) => "upin",
    RecordFilter::ArchiveCode(_) => "existing_archive_code",
    RecordFilter::ServiceOfEstate(_) => "service_of_estate",
    RecordFilter::Kebele(_) => "kebele",
    RecordFilter::ProofOfPossession(_) => "proof_of_possession",
    RecordFilter::PossessionStatus(_) => "possession_status",
  }
}

fn group_column(field: GroupField) -> &'static str {
  match field {
    GroupField::PossessionStatus => "possession_status",
    GroupField::ServiceOfEstate => "service_of_estate",
    GroupField::ProofOfPossession => "proof_of_possession",
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A parcel store backed by a single SQLite file plus a [`BlobStore`] for
/// attachment bytes.
///
/// Cloning is cheap: the connection and blob store are reference-counted.
pub struct SqliteStore<B> {
  pub(crate) conn: tokio_rusqlite::Connection,
  blobs:           Arc<B>,
}

impl<B> Clone for SqliteStore<B> {
  fn clone(&self) -> Self {
    Self { conn: self.conn.clone(), blobs: Arc::clone(&self.blobs) }
  }
}

impl<B: BlobStore> SqliteStore<B> {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>, blobs: B) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, blobs: Arc::new(blobs) };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory(blobs: B) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, blobs: Arc::new(blobs) };
    store.init_schema().await?;
    Ok(store)
  }

  pub fn blobs(&self) -> &B { &self.blobs }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Make sure `username` exists and is an administrator. An existing
  /// user's password is left untouched.
  pub async fn ensure_administrator(&self, username: &str, password_hash: &str) -> Result<User> {
    let input = NewUser {
      username:      username.trim().to_owned(),
      password_hash: password_hash.to_owned(),
      roles:         vec![ADMINISTRATORS.to_owned()],
    };
    input.validate()?;

    let name = input.username.clone();
    let created = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (user_id, created) = match queries::user_id(&tx, &input.username)? {
          Some(id) => (id, false),
          None => {
            let id = encode_uuid(Uuid::new_v4());
            tx.execute(
              "INSERT INTO users (user_id, username, password_hash, created_at)
               VALUES (?1, ?2, ?3, ?4)",
              params![id, input.username, input.password_hash, encode_dt(now())],
            )?;
            (id, true)
          }
        };
        tx.execute(
          "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
          params![user_id, ADMINISTRATORS],
        )?;
        tx.commit()?;
        Ok(created)
      })
      .await?;

    if created {
      info!(username = %name, "bootstrap administrator created");
    }
    self
      .find_credentials(&name)
      .await?
      .map(|c| c.user)
      .ok_or_else(|| parcel_core::Error::UserNotFound(name).into())
  }

  // ── Blob staging ──────────────────────────────────────────────────────────

  /// Write an upload's bytes and describe the attachment that would hold
  /// them. Nothing is recorded in the database yet.
  async fn stage(
    &self,
    record_id: Uuid,
    item: NewAttachment,
    at: DateTime<Utc>,
  ) -> Result<Attachment> {
    let content_type = item.upload.resolved_content_type();
    let content_digest = item.upload.digest().clone();
    let size_bytes = item.upload.body.len();
    let blob = self.blobs.put(item.upload.body).await.map_err(blob_err)?;
    Ok(Attachment {
      id: Uuid::new_v4(),
      record_id,
      blob,
      file_name: item.upload.file_name,
      display_name: item.display_name,
      category: item.category,
      content_type,
      content_digest,
      size_bytes,
      uploaded_at: at,
    })
  }

  /// Stage every bulk item whose dedup key is neither on the record already
  /// nor earlier in the same batch. Returns the staged attachments and the
  /// number skipped.
  async fn stage_bulk(
    &self,
    record_id: Uuid,
    existing: &[Attachment],
    files: BulkUpload,
    at: DateTime<Utc>,
  ) -> Result<(Vec<Attachment>, usize)> {
    let mut seen: HashSet<_> = existing.iter().map(Attachment::bulk_key).collect();
    let mut staged = Vec::new();
    let mut skipped = 0;

    for item in files.into_items() {
      if !seen.insert(item.bulk_key()) {
        debug!(file_name = %item.upload.file_name, "bulk upload: skipping exact duplicate");
        skipped += 1;
        continue;
      }
      match self.stage(record_id, item, at).await {
        Ok(a) => staged.push(a),
        Err(e) => {
          self.discard(staged.into_iter().map(|a| a.blob).collect()).await;
          return Err(e);
        }
      }
    }
    Ok((staged, skipped))
  }

  /// Best-effort removal of blobs no row refers to.
  async fn discard(&self, handles: Vec<BlobHandle>) {
    for handle in handles {
      if let Err(e) = self.blobs.delete(&handle).await {
        warn!(blob = %handle, error = %e, "failed to remove orphaned blob");
      }
    }
  }

  /// The UPIN and attachments of record `id`, or `None` if it doesn't exist.
  async fn record_files(&self, id: Uuid) -> Result<Option<(String, Vec<Attachment>)>> {
    let id_str = encode_uuid(id);
    let raw = self
      .conn
      .call(move |conn| {
        let Some(upin) = queries::record_upin(conn, &id_str)? else {
          return Ok(None);
        };
        Ok(Some((upin, queries::attachments_for(conn, &id_str)?)))
      })
      .await?;

    raw
      .map(|(upin, raws)| {
        let files = raws
          .into_iter()
          .map(RawAttachment::into_attachment)
          .collect::<Result<Vec<_>>>()?;
        Ok((upin, files))
      })
      .transpose()
  }

  async fn attachment_with_upin(&self, id: Uuid) -> Result<Option<(Attachment, String)>> {
    let id_str = encode_uuid(id);
    let raw = self
      .conn
      .call(move |conn| Ok(queries::attachment_with_upin(conn, &id_str)?))
      .await?;
    raw.map(|(a, upin)| Ok((a.into_attachment()?, upin))).transpose()
  }

  async fn query_records(&self, sql: String, args: Vec<Value>) -> Result<Vec<Record>> {
    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(args.iter()), queries::raw_record)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawRecord::into_record).collect()
  }

  async fn count(&self, sql: &'static str, args: Vec<Value>) -> Result<u64> {
    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(sql, rusqlite::params_from_iter(args.iter()), |r| r.get(0))?)
      })
      .await?;
    Ok(u64::try_from(n).unwrap_or_default())
  }

  async fn change_role(
    &self,
    ctx: &RequestContext,
    username: &str,
    role: &str,
    grant: bool,
  ) -> Result<User> {
    let name = username.to_owned();
    let role = role.to_owned();
    let details = if grant {
      format!("Added user {name} to role {role}")
    } else {
      format!("Removed user {name} from role {role}")
    };
    let audit = AuditRow::encode(&NewAuditEntry::new(ctx, AuditAction::Update, details), now());

    let changed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(user_id) = queries::user_id(&tx, &name)? else {
          return Err(raise(parcel_core::Error::UserNotFound(name)));
        };
        if !queries::role_exists(&tx, &role)? {
          return Err(raise(parcel_core::Error::RoleNotFound(role)));
        }
        let changed = if grant {
          tx.execute(
            "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
            params![user_id, role],
          )?
        } else {
          tx.execute(
            "DELETE FROM user_roles WHERE user_id = ?1 AND role = ?2",
            params![user_id, role],
          )?
        };
        if changed > 0 {
          queries::insert_audit(&tx, &audit)?;
        }
        tx.commit()?;
        Ok(changed > 0)
      })
      .await?;

    if changed {
      info!(username, grant, "role membership changed");
    }
    self
      .find_credentials(username)
      .await?
      .map(|c| c.user)
      .ok_or_else(|| parcel_core::Error::UserNotFound(username.to_owned()).into())
  }
}

// ─── PropertyStore impl ──────────────────────────────────────────────────────

impl<B: BlobStore> PropertyStore for SqliteStore<B> {
  type Error = Error;

  // ── Records ───────────────────────────────────────────────────────────────

  async fn create_record(
    &self,
    ctx: &RequestContext,
    fields: RecordFields,
    files: BulkUpload,
  ) -> Result<RecordDetail> {
    fields.validate()?;
    if self.upin_exists(&fields.upin).await? {
      return Err(parcel_core::Error::UpinConflict(fields.upin).into());
    }

    let at = now();
    let record = Record { id: Uuid::new_v4(), fields, created_at: at, updated_at: at };
    let row = RecordRow::encode(&record)?;
    let audit = AuditRow::encode(
      &NewAuditEntry::new(
        ctx,
        AuditAction::Create,
        format!("Created record with UPIN {}", record.fields.upin),
      ),
      at,
    );

    let (staged, skipped) = self.stage_bulk(record.id, &[], files, at).await?;
    let rows: Vec<AttachmentRow> = staged.iter().map(AttachmentRow::encode).collect();

    let committed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if queries::upin_taken(&tx, &row.upin, None)? {
          return Err(raise(parcel_core::Error::UpinConflict(row.upin)));
        }
        queries::insert_record(&tx, &row)?;
        for a in &rows {
          queries::insert_attachment(&tx, a)?;
        }
        queries::insert_audit(&tx, &audit)?;
        tx.commit()?;
        Ok(())
      })
      .await;

    if let Err(e) = committed {
      self.discard(staged.into_iter().map(|a| a.blob).collect()).await;
      return Err(e.into());
    }

    info!(
      record_id = %record.id,
      upin = %record.fields.upin,
      files = staged.len(),
      skipped,
      "record created"
    );
    Ok(RecordDetail { record, files: staged })
  }

  async fn get_record(&self, id: Uuid) -> Result<Option<Record>> {
    let id_str = encode_uuid(id);
    let raw = self
      .conn
      .call(move |conn| Ok(queries::record_by_id(conn, &id_str)?))
      .await?;
    raw.map(RawRecord::into_record).transpose()
  }

  async fn get_record_by_upin(&self, upin: &str) -> Result<Option<Record>> {
    let upin = upin.to_owned();
    let raw = self
      .conn
      .call(move |conn| Ok(queries::record_by_upin(conn, &upin)?))
      .await?;
    raw.map(RawRecord::into_record).transpose()
  }

  async fn upin_exists(&self, upin: &str) -> Result<bool> {
    let upin = upin.to_owned();
    Ok(
      self
        .conn
        .call(move |conn| Ok(queries::upin_taken(conn, &upin, None)?))
        .await?,
    )
  }

  async fn list_records(&self, filter: Option<RecordFilter>) -> Result<Vec<Record>> {
    let (where_clause, args) = match &filter {
      Some(f) => (
        format!("WHERE {} = ?1", record_column(f)),
        vec![Value::Text(f.value().to_owned())],
      ),
      None => (String::new(), Vec::new()),
    };
    let sql = format!(
      "SELECT {} FROM records {where_clause} ORDER BY created_at DESC, rowid DESC",
      queries::RECORD_COLUMNS
    );
    self.query_records(sql, args).await
  }

  async fn recent_records(&self, limit: usize) -> Result<Vec<Record>> {
    let sql = format!(
      "SELECT {} FROM records ORDER BY created_at DESC, rowid DESC LIMIT ?1",
      queries::RECORD_COLUMNS
    );
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    self.query_records(sql, vec![Value::Integer(limit)]).await
  }

  async fn update_record(
    &self,
    ctx: &RequestContext,
    id: Uuid,
    fields: RecordFields,
  ) -> Result<Record> {
    fields.validate()?;
    let at = now();
    let mut record = Record { id, fields, created_at: at, updated_at: at };
    let row = RecordRow::encode(&record)?;
    let audit = AuditRow::encode(
      &NewAuditEntry::new(
        ctx,
        AuditAction::Update,
        format!("Updated record with UPIN {}", record.fields.upin),
      ),
      at,
    );

    let created_at = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(current) = queries::record_by_id(&tx, &row.record_id)? else {
          return Err(raise(parcel_core::Error::RecordNotFound(row.record_id)));
        };
        if queries::upin_taken(&tx, &row.upin, Some(&row.record_id))? {
          return Err(raise(parcel_core::Error::UpinConflict(row.upin)));
        }
        queries::update_record(&tx, &row)?;
        queries::insert_audit(&tx, &audit)?;
        tx.commit()?;
        Ok(current.created_at)
      })
      .await?;

    record.created_at = decode_dt(&created_at)?;
    info!(record_id = %id, upin = %record.fields.upin, "record updated");
    Ok(record)
  }

  async fn patch_record_by_upin(
    &self,
    ctx: &RequestContext,
    upin: &str,
    draft: RecordDraft,
  ) -> Result<Record> {
    let upin = upin.to_owned();
    let at = now();
    let updated_at = encode_dt(at);
    let audit = AuditRow::encode(
      &NewAuditEntry::new(ctx, AuditAction::Update, format!("Updated record with UPIN {upin}")),
      at,
    );

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(current) = queries::record_by_upin(&tx, &upin)? else {
          return Err(raise(parcel_core::Error::RecordNotFound(upin)));
        };
        let fields = decode_fields(&current.fields_json).map_err(json_err)?;
        let fields = draft.apply_to(&fields).map_err(raise)?;
        if fields.upin != upin && queries::upin_taken(&tx, &fields.upin, Some(&current.record_id))? {
          return Err(raise(parcel_core::Error::UpinConflict(fields.upin)));
        }

        let row = RecordRow {
          record_id:             current.record_id.clone(),
          upin:                  fields.upin.clone(),
          existing_archive_code: fields.existing_archive_code.clone(),
          service_of_estate:     fields.service_of_estate.clone(),
          kebele:                fields.kebele.clone(),
          proof_of_possession:   fields.proof_of_possession.clone(),
          possession_status:     fields.possession_status.clone(),
          first_amount_cents:    fields.first_amount.map(|a| a.cents()),
          second_amount_cents:   fields.second_amount.map(|a| a.cents()),
          third_amount_cents:    fields.third_amount.map(|a| a.cents()),
          fields_json:           serde_json::to_string(&fields).map_err(json_err)?,
          created_at:            current.created_at.clone(),
          updated_at:            updated_at.clone(),
        };
        queries::update_record(&tx, &row)?;
        queries::insert_audit(&tx, &audit)?;
        tx.commit()?;

        Ok(RawRecord {
          record_id:   row.record_id,
          fields_json: row.fields_json,
          created_at:  row.created_at,
          updated_at:  row.updated_at,
        })
      })
      .await?;

    let record = raw.into_record()?;
    info!(record_id = %record.id, upin = %record.fields.upin, "record patched");
    Ok(record)
  }

  async fn delete_record(&self, ctx: &RequestContext, id: Uuid) -> Result<()> {
    let id_str = encode_uuid(id);
    let at = now();
    let mut audit = AuditRow::encode(&NewAuditEntry::new(ctx, AuditAction::Delete, ""), at);

    let handles = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(upin) = queries::record_upin(&tx, &id_str)? else {
          return Err(raise(parcel_core::Error::RecordNotFound(id_str)));
        };
        let handles: Vec<String> = queries::attachments_for(&tx, &id_str)?
          .into_iter()
          .map(|a| a.blob_handle)
          .collect();
        // Attachment rows go with the record via ON DELETE CASCADE.
        tx.execute("DELETE FROM records WHERE record_id = ?1", params![id_str])?;
        audit.details =
          format!("Deleted record with UPIN {upin} and {} attached file(s)", handles.len());
        queries::insert_audit(&tx, &audit)?;
        tx.commit()?;
        Ok(handles)
      })
      .await?;

    info!(record_id = %id, files = handles.len(), "record deleted");
    self.discard(handles.into_iter().map(BlobHandle::new).collect()).await;
    Ok(())
  }

  // ── Attachments ───────────────────────────────────────────────────────────

  async fn add_file(
    &self,
    ctx: &RequestContext,
    record_id: Uuid,
    input: NewAttachment,
  ) -> Result<AddOutcome> {
    let Some((upin, existing)) = self.record_files(record_id).await? else {
      return Err(parcel_core::Error::RecordNotFound(record_id.to_string()).into());
    };
    if let Some(found) = dedup_by_digest(&existing, &input.upload) {
      debug!(attachment_id = %found.id, %upin, "add file: content already attached");
      return Ok(AddOutcome::Existing(found.clone()));
    }

    let at = now();
    let attachment = self.stage(record_id, input, at).await?;
    let row = AttachmentRow::encode(&attachment);
    let audit = AuditRow::encode(
      &NewAuditEntry::new(
        ctx,
        AuditAction::Create,
        format!("Added file {} to record {upin}", attachment.display_name),
      ),
      at,
    );

    let committed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if queries::record_upin(&tx, &row.record_id)?.is_none() {
          return Err(raise(parcel_core::Error::RecordNotFound(row.record_id)));
        }
        // Someone may have attached the same bytes since the check above.
        if let Some(raw) = queries::attachment_with_digest(&tx, &row.record_id, &row.content_digest)? {
          return Ok(Some(raw));
        }
        queries::insert_attachment(&tx, &row)?;
        queries::insert_audit(&tx, &audit)?;
        tx.commit()?;
        Ok(None)
      })
      .await;

    match committed {
      Ok(None) => {
        info!(attachment_id = %attachment.id, %upin, "file attached");
        Ok(AddOutcome::Created(attachment))
      }
      Ok(Some(raw)) => {
        self.discard(vec![attachment.blob]).await;
        Ok(AddOutcome::Existing(raw.into_attachment()?))
      }
      Err(e) => {
        self.discard(vec![attachment.blob]).await;
        Err(e.into())
      }
    }
  }

  async fn bulk_upload(
    &self,
    ctx: &RequestContext,
    record_id: Uuid,
    files: BulkUpload,
  ) -> Result<BulkOutcome> {
    let Some((upin, existing)) = self.record_files(record_id).await? else {
      return Err(parcel_core::Error::RecordNotFound(record_id.to_string()).into());
    };

    let at = now();
    let (staged, mut skipped) = self.stage_bulk(record_id, &existing, files, at).await?;
    if staged.is_empty() {
      return Ok(BulkOutcome { created: Vec::new(), skipped });
    }

    let rows: Vec<AttachmentRow> = staged.iter().map(AttachmentRow::encode).collect();
    let mut audit = AuditRow::encode(&NewAuditEntry::new(ctx, AuditAction::Create, ""), at);
    let record_id_str = encode_uuid(record_id);

    let committed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(upin) = queries::record_upin(&tx, &record_id_str)? else {
          return Err(raise(parcel_core::Error::RecordNotFound(record_id_str)));
        };
        let present = queries::bulk_keys(&tx, &record_id_str)?;
        let mut inserted = Vec::new();
        for (i, row) in rows.iter().enumerate() {
          if row.is_in(&present) {
            continue;
          }
          queries::insert_attachment(&tx, row)?;
          inserted.push(i);
        }
        if !inserted.is_empty() {
          audit.details = format!("Uploaded {} file(s) to record {upin}", inserted.len());
          queries::insert_audit(&tx, &audit)?;
        }
        tx.commit()?;
        Ok(inserted)
      })
      .await;

    let inserted = match committed {
      Ok(inserted) => inserted,
      Err(e) => {
        self.discard(staged.into_iter().map(|a| a.blob).collect()).await;
        return Err(e.into());
      }
    };

    let mut created = Vec::with_capacity(inserted.len());
    let mut lost = Vec::new();
    for (i, a) in staged.into_iter().enumerate() {
      if inserted.contains(&i) {
        created.push(a);
      } else {
        lost.push(a.blob);
      }
    }
    skipped += lost.len();
    self.discard(lost).await;

    info!(%upin, created = created.len(), skipped, "bulk upload committed");
    Ok(BulkOutcome { created, skipped })
  }

  async fn list_files(&self, record_id: Uuid) -> Result<Vec<Attachment>> {
    let id_str = encode_uuid(record_id);
    let raws = self
      .conn
      .call(move |conn| Ok(queries::attachments_for(conn, &id_str)?))
      .await?;
    raws.into_iter().map(RawAttachment::into_attachment).collect()
  }

  async fn get_file(&self, id: Uuid) -> Result<Option<Attachment>> {
    Ok(self.attachment_with_upin(id).await?.map(|(a, _)| a))
  }

  async fn download_file(&self, ctx: &RequestContext, id: Uuid) -> Result<(Attachment, Bytes)> {
    let Some((attachment, upin)) = self.attachment_with_upin(id).await? else {
      return Err(parcel_core::Error::AttachmentNotFound(id).into());
    };
    let bytes = self.blobs.get(&attachment.blob).await.map_err(blob_err)?;
    self
      .append_audit(NewAuditEntry::new(
        ctx,
        AuditAction::Download,
        format!("Downloaded file {} from record {upin}", attachment.display_name),
      ))
      .await?;
    Ok((attachment, bytes))
  }

  async fn replace_file(&self, ctx: &RequestContext, id: Uuid, upload: Upload) -> Result<Attachment> {
    let Some((current, upin)) = self.attachment_with_upin(id).await? else {
      return Err(parcel_core::Error::AttachmentNotFound(id).into());
    };

    let at = now();
    let content_type = upload.resolved_content_type();
    let content_digest = upload.digest().clone();
    let size_bytes = upload.body.len();
    let file_name = upload.file_name.clone();
    let blob = self.blobs.put(upload.body).await.map_err(blob_err)?;

    let replaced = Attachment {
      blob,
      file_name,
      content_type,
      content_digest,
      size_bytes,
      ..current
    };
    let row = AttachmentRow::encode(&replaced);
    let audit = AuditRow::encode(
      &NewAuditEntry::new(
        ctx,
        AuditAction::Update,
        format!("Replaced file {} on record {upin}", replaced.display_name),
      ),
      at,
    );

    let committed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some((old, _)) = queries::attachment_with_upin(&tx, &row.attachment_id)? else {
          return Err(raise(parcel_core::Error::AttachmentNotFound(id)));
        };
        tx.execute(
          "UPDATE attachments SET
             blob_handle = ?2, file_name = ?3, content_type = ?4,
             content_digest = ?5, size_bytes = ?6
           WHERE attachment_id = ?1",
          params![
            row.attachment_id,
            row.blob_handle,
            row.file_name,
            row.content_type,
            row.content_digest,
            row.size_bytes,
          ],
        )?;
        queries::insert_audit(&tx, &audit)?;
        tx.commit()?;
        Ok(old.blob_handle)
      })
      .await;

    match committed {
      Ok(old) => {
        info!(attachment_id = %id, %upin, "file replaced");
        self.discard(vec![BlobHandle::new(old)]).await;
        Ok(replaced)
      }
      Err(e) => {
        self.discard(vec![replaced.blob]).await;
        Err(e.into())
      }
    }
  }

  async fn delete_file(&self, ctx: &RequestContext, id: Uuid) -> Result<()> {
    let id_str = encode_uuid(id);
    let mut audit = AuditRow::encode(&NewAuditEntry::new(ctx, AuditAction::Delete, ""), now());

    let handle = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some((raw, upin)) = queries::attachment_with_upin(&tx, &id_str)? else {
          return Err(raise(parcel_core::Error::AttachmentNotFound(id)));
        };
        if Category::new(raw.category.clone()).map_err(raise)?.is_protected() {
          return Err(raise(parcel_core::Error::ProtectedAttachment(id)));
        }
        tx.execute("DELETE FROM attachments WHERE attachment_id = ?1", params![id_str])?;
        audit.details = format!("Deleted file {} from record {upin}", raw.display_name);
        queries::insert_audit(&tx, &audit)?;
        tx.commit()?;
        Ok(raw.blob_handle)
      })
      .await?;

    info!(attachment_id = %id, "file deleted");
    self.discard(vec![BlobHandle::new(handle)]).await;
    Ok(())
  }

  // ── Audit log ─────────────────────────────────────────────────────────────

  async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
    let at = now();
    let row = AuditRow::encode(&entry, at);
    let id = self
      .conn
      .call(move |conn| Ok(queries::insert_audit(conn, &row)?))
      .await?;

    Ok(AuditEntry {
      id,
      user: entry.user,
      action: entry.action,
      details: entry.details,
      ip_address: entry.ip_address,
      role: entry.role,
      timestamp: at,
    })
  }

  async fn query_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let raws: Vec<RawAuditEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM audit_log ORDER BY timestamp DESC, entry_id DESC LIMIT ?1",
          queries::AUDIT_COLUMNS
        ))?;
        let rows = stmt
          .query_map(params![limit], queries::raw_audit)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawAuditEntry::into_entry).collect()
  }

  // ── Accounts ──────────────────────────────────────────────────────────────

  async fn create_user(&self, ctx: &RequestContext, input: NewUser) -> Result<User> {
    input.validate()?;
    let mut roles = input.roles.clone();
    roles.sort();
    roles.dedup();

    let at = now();
    let user = User {
      id:         Uuid::new_v4(),
      username:   input.username.trim().to_owned(),
      roles:      roles.iter().map(|r| Role::from_name(r)).collect(),
      created_at: at,
    };
    let user_id = encode_uuid(user.id);
    let username = user.username.clone();
    let audit = AuditRow::encode(
      &NewAuditEntry::new(ctx, AuditAction::Create, format!("Created user {username}")),
      at,
    );

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if queries::user_id(&tx, &username)?.is_some() {
          return Err(raise(parcel_core::Error::UsernameTaken(username)));
        }
        for role in &roles {
          if !queries::role_exists(&tx, role)? {
            return Err(raise(parcel_core::Error::RoleNotFound(role.clone())));
          }
        }
        tx.execute(
          "INSERT INTO users (user_id, username, password_hash, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          params![user_id, username, input.password_hash, encode_dt(at)],
        )?;
        for role in &roles {
          tx.execute(
            "INSERT INTO user_roles (user_id, role) VALUES (?1, ?2)",
            params![user_id, role],
          )?;
        }
        queries::insert_audit(&tx, &audit)?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    info!(username = %user.username, "user created");
    Ok(user)
  }

  async fn list_users(&self) -> Result<Vec<User>> {
    let raws: Vec<RawUser> = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare("SELECT user_id, username, created_at FROM users ORDER BY username")?;
        let users = stmt
          .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get(1)?, r.get(2)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut raws = Vec::with_capacity(users.len());
        for (user_id, username, created_at) in users {
          let roles = queries::roles_for(conn, &user_id)?;
          raws.push(RawUser { user_id, username, created_at, roles });
        }
        Ok(raws)
      })
      .await?;
    raws.into_iter().map(RawUser::into_user).collect()
  }

  async fn get_user(&self, username: &str) -> Result<Option<User>> {
    Ok(self.find_credentials(username).await?.map(|c| c.user))
  }

  async fn update_user(
    &self,
    ctx: &RequestContext,
    username: &str,
    update: UserUpdate,
  ) -> Result<User> {
    update.validate()?;
    let current = username.to_owned();
    let renamed = update.username.as_deref().map(str::trim).map(str::to_owned);
    let target = renamed.clone().unwrap_or_else(|| current.clone());
    let roles = update.roles.map(|mut roles| {
      roles.sort();
      roles.dedup();
      roles
    });
    let audit = AuditRow::encode(
      &NewAuditEntry::new(ctx, AuditAction::Update, format!("Updated user {target}")),
      now(),
    );
    let password_hash = update.password_hash;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(user_id) = queries::user_id(&tx, &current)? else {
          return Err(raise(parcel_core::Error::UserNotFound(current)));
        };
        if let Some(name) = renamed.filter(|name| *name != current) {
          if queries::user_id(&tx, &name)?.is_some() {
            return Err(raise(parcel_core::Error::UsernameTaken(name)));
          }
          tx.execute(
            "UPDATE users SET username = ?2 WHERE user_id = ?1",
            params![user_id, name],
          )?;
        }
        if let Some(hash) = password_hash {
          tx.execute(
            "UPDATE users SET password_hash = ?2 WHERE user_id = ?1",
            params![user_id, hash],
          )?;
        }
        if let Some(roles) = roles {
          for role in &roles {
            if !queries::role_exists(&tx, role)? {
              return Err(raise(parcel_core::Error::RoleNotFound(role.clone())));
            }
          }
          tx.execute("DELETE FROM user_roles WHERE user_id = ?1", params![user_id])?;
          for role in &roles {
            tx.execute(
              "INSERT INTO user_roles (user_id, role) VALUES (?1, ?2)",
              params![user_id, role],
            )?;
          }
        }
        queries::insert_audit(&tx, &audit)?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    info!(username, now = %target, "user updated");
    self
      .get_user(&target)
      .await?
      .ok_or_else(|| parcel_core::Error::UserNotFound(target).into())
  }

  async fn delete_user(&self, ctx: &RequestContext, username: &str) -> Result<()> {
    let name = username.to_owned();
    let audit = AuditRow::encode(
      &NewAuditEntry::new(ctx, AuditAction::Delete, format!("Deleted user {name}")),
      now(),
    );

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // Role memberships go with the user via ON DELETE CASCADE.
        let removed = tx.execute("DELETE FROM users WHERE username = ?1", params![name])?;
        if removed == 0 {
          return Err(raise(parcel_core::Error::UserNotFound(name)));
        }
        queries::insert_audit(&tx, &audit)?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    info!(username, "user deleted");
    Ok(())
  }

  async fn find_credentials(&self, username: &str) -> Result<Option<Credentials>> {
    let username = username.to_owned();
    let raw = self
      .conn
      .call(move |conn| {
        let Some((user_id, username, password_hash, created_at)) =
          queries::credentials(conn, &username)?
        else {
          return Ok(None);
        };
        let roles = queries::roles_for(conn, &user_id)?;
        Ok(Some((RawUser { user_id, username, created_at, roles }, password_hash)))
      })
      .await?;

    raw
      .map(|(user, password_hash)| Ok(Credentials { user: user.into_user()?, password_hash }))
      .transpose()
  }

  async fn list_roles(&self) -> Result<Vec<String>> {
    Ok(
      self
        .conn
        .call(|conn| {
          let mut stmt = conn.prepare("SELECT name FROM roles ORDER BY name")?;
          let names = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
          Ok(names)
        })
        .await?,
    )
  }

  async fn grant_role(&self, ctx: &RequestContext, username: &str, role: &str) -> Result<User> {
    self.change_role(ctx, username, role, true).await
  }

  async fn revoke_role(&self, ctx: &RequestContext, username: &str, role: &str) -> Result<User> {
    self.change_role(ctx, username, role, false).await
  }

  // ── Statistics ────────────────────────────────────────────────────────────

  async fn count_by(&self, field: GroupField) -> Result<Vec<GroupCount>> {
    let col = group_column(field);
    let sql = format!(
      "SELECT {col}, COUNT(*) AS n FROM records GROUP BY {col} ORDER BY n DESC, {col} ASC"
    );
    let rows: Vec<(String, i64)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(
      rows
        .into_iter()
        .map(|(value, n)| GroupCount { value, count: u64::try_from(n).unwrap_or_default() })
        .collect(),
    )
  }

  async fn amount_paid_counts(&self) -> Result<Vec<AmountPaidCount>> {
    let counts: [i64; 3] = self
      .conn
      .call(|conn| {
        Ok(conn.query_row(
          "SELECT
             COUNT(CASE WHEN first_amount_cents  > 0 THEN 1 END),
             COUNT(CASE WHEN second_amount_cents > 0 THEN 1 END),
             COUNT(CASE WHEN third_amount_cents  > 0 THEN 1 END)
           FROM records",
          [],
          |r| Ok([r.get(0)?, r.get(1)?, r.get(2)?]),
        )?)
      })
      .await?;

    Ok(
      AmountField::ALL
        .iter()
        .zip(counts)
        .map(|(field, n)| AmountPaidCount {
          name:  field.label().to_owned(),
          count: u64::try_from(n).unwrap_or_default(),
        })
        .collect(),
    )
  }

  async fn dashboard_metrics(&self, now: DateTime<Utc>) -> Result<DashboardMetrics> {
    let month_start = encode_dt(start_of_month(now));
    let window_start = encode_dt(active_window_start(now));

    Ok(DashboardMetrics {
      total_records:       self.count("SELECT COUNT(*) FROM records", vec![]).await?,
      registered_users:    self.count("SELECT COUNT(*) FROM users", vec![]).await?,
      reports_generated:   self
        .count(
          "SELECT COUNT(*) FROM audit_log WHERE action IN (?1, ?2)",
          vec![
            Value::Text(AuditAction::View.as_str().to_owned()),
            Value::Text(REPORT_GENERATED.to_owned()),
          ],
        )
        .await?,
      files_uploaded:      self
        .count(
          "SELECT COUNT(*) FROM attachments WHERE uploaded_at >= ?1",
          vec![Value::Text(month_start)],
        )
        .await?,
      recent_active_users: self
        .count(
          "SELECT COUNT(DISTINCT user) FROM audit_log WHERE action = ?1 AND timestamp >= ?2",
          vec![Value::Text(AuditAction::Login.as_str().to_owned()), Value::Text(window_start)],
        )
        .await?,
    })
  }
}
