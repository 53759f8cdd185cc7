//! The `PropertyStore` trait: the contract the core requires from its
//! relational and blob collaborators.
//!
//! Implemented by storage backends (e.g. `parcel-store-sqlite`). The API layer
//! depends on this abstraction, not on any concrete backend.
//!
//! Every mutating method takes the [`RequestContext`] of the caller and
//! appends the matching audit entry in the same unit of work as the change
//! itself. Access checks are the caller's job; see [`crate::access::Policy`].

use std::future::Future;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  Error,
  access::RequestContext,
  account::{Credentials, NewUser, User, UserUpdate},
  attachment::{AddOutcome, Attachment, BulkOutcome, BulkUpload, NewAttachment, Upload},
  audit::{AuditEntry, NewAuditEntry},
  record::{Record, RecordDetail, RecordDraft, RecordFields, RecordFilter},
  stats::{AmountPaidCount, DashboardMetrics, GroupCount, GroupField},
};

/// Exposes the business-rule part of a backend error, if there is one, so
/// request boundaries can tell a `NotFound` from a disk failure without
/// knowing the backend.
pub trait DomainError: std::error::Error + Send + Sync + 'static {
  fn domain(&self) -> Option<&Error>;
}

/// Abstraction over a property-records backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait PropertyStore: Send + Sync {
  type Error: DomainError;

  // ── Records ───────────────────────────────────────────────────────────

  /// Persist a new record, attach `files` under the bulk-upload dedup rule
  /// and append a `CREATE` entry.
  ///
  /// Fails with [`Error::UpinConflict`] if the UPIN is already taken.
  fn create_record<'a>(
    &'a self,
    ctx: &'a RequestContext,
    fields: RecordFields,
    files: BulkUpload,
  ) -> impl Future<Output = Result<RecordDetail, Self::Error>> + Send + 'a;

  fn get_record(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send + '_;

  fn get_record_by_upin<'a>(
    &'a self,
    upin: &'a str,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send + 'a;

  fn upin_exists<'a>(
    &'a self,
    upin: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// All records matching `filter` (or all records), newest first.
  fn list_records(
    &self,
    filter: Option<RecordFilter>,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + '_;

  /// The `limit` most recently created records.
  fn recent_records(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + '_;

  /// Replace every field of record `id` and append an `UPDATE` entry.
  fn update_record<'a>(
    &'a self,
    ctx: &'a RequestContext,
    id: Uuid,
    fields: RecordFields,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send + 'a;

  /// Overlay `draft` onto the record with this UPIN and append an `UPDATE`
  /// entry. Fails with [`Error::RecordNotFound`] if no record matches.
  fn patch_record_by_upin<'a>(
    &'a self,
    ctx: &'a RequestContext,
    upin: &'a str,
    draft: RecordDraft,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send + 'a;

  /// Delete record `id` with all of its attachments and append a `DELETE`
  /// entry.
  fn delete_record<'a>(
    &'a self,
    ctx: &'a RequestContext,
    id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Attachments ───────────────────────────────────────────────────────

  /// Attach a file unless the record already holds the same bytes, in which
  /// case the existing attachment is returned and nothing is written.
  fn add_file<'a>(
    &'a self,
    ctx: &'a RequestContext,
    record_id: Uuid,
    input: NewAttachment,
  ) -> impl Future<Output = Result<AddOutcome, Self::Error>> + Send + 'a;

  /// Attach several files, skipping only exact (digest + metadata) repeats.
  fn bulk_upload<'a>(
    &'a self,
    ctx: &'a RequestContext,
    record_id: Uuid,
    files: BulkUpload,
  ) -> impl Future<Output = Result<BulkOutcome, Self::Error>> + Send + 'a;

  fn list_files(
    &self,
    record_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Attachment>, Self::Error>> + Send + '_;

  fn get_file(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Attachment>, Self::Error>> + Send + '_;

  /// Read an attachment's bytes and append a `DOWNLOAD` entry.
  fn download_file<'a>(
    &'a self,
    ctx: &'a RequestContext,
    id: Uuid,
  ) -> impl Future<Output = Result<(Attachment, Bytes), Self::Error>> + Send + 'a;

  /// Swap the stored bytes of attachment `id`, keeping its identity, display
  /// name and category. The digest and content type are recomputed.
  fn replace_file<'a>(
    &'a self,
    ctx: &'a RequestContext,
    id: Uuid,
    upload: Upload,
  ) -> impl Future<Output = Result<Attachment, Self::Error>> + Send + 'a;

  /// Delete attachment `id`. Fails with [`Error::ProtectedAttachment`] for
  /// the protected category.
  fn delete_file<'a>(
    &'a self,
    ctx: &'a RequestContext,
    id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Audit log ─────────────────────────────────────────────────────────

  fn append_audit(
    &self,
    entry: NewAuditEntry,
  ) -> impl Future<Output = Result<AuditEntry, Self::Error>> + Send + '_;

  /// The `limit` most recent entries, newest first.
  fn query_audit(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<AuditEntry>, Self::Error>> + Send + '_;

  // ── Accounts ──────────────────────────────────────────────────────────

  fn create_user<'a>(
    &'a self,
    ctx: &'a RequestContext,
    input: NewUser,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + 'a;

  fn list_users(
    &self,
  ) -> impl Future<Output = Result<Vec<User>, Self::Error>> + Send + '_;

  fn get_user<'a>(
    &'a self,
    username: &'a str,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + 'a;

  /// Apply `update` to `username`, returning the account as stored.
  fn update_user<'a>(
    &'a self,
    ctx: &'a RequestContext,
    username: &'a str,
    update: UserUpdate,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + 'a;

  /// Remove an account and its role memberships. Audit entries naming the
  /// user are kept as written.
  fn delete_user<'a>(
    &'a self,
    ctx: &'a RequestContext,
    username: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Look up a user and their password hash. Roles are read fresh.
  fn find_credentials<'a>(
    &'a self,
    username: &'a str,
  ) -> impl Future<Output = Result<Option<Credentials>, Self::Error>> + Send + 'a;

  fn list_roles(
    &self,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  /// Add `username` to `role`. Idempotent.
  fn grant_role<'a>(
    &'a self,
    ctx: &'a RequestContext,
    username: &'a str,
    role: &'a str,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + 'a;

  /// Remove `username` from `role`. Idempotent.
  fn revoke_role<'a>(
    &'a self,
    ctx: &'a RequestContext,
    username: &'a str,
    role: &'a str,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + 'a;

  // ── Statistics ────────────────────────────────────────────────────────

  /// Record counts grouped by `field`, most frequent first.
  fn count_by(
    &self,
    field: GroupField,
  ) -> impl Future<Output = Result<Vec<GroupCount>, Self::Error>> + Send + '_;

  fn amount_paid_counts(
    &self,
  ) -> impl Future<Output = Result<Vec<AmountPaidCount>, Self::Error>> + Send + '_;

  fn dashboard_metrics(
    &self,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<DashboardMetrics, Self::Error>> + Send + '_;
}
