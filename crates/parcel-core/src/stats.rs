//! Dashboard/Statistics Aggregator output types.
//!
//! All views are read-only and reflect stored state at query time.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;

/// How far back a `LOGIN` counts towards "recently active".
pub const ACTIVE_WINDOW_DAYS: i64 = 7;

/// A record field the aggregator can group by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
  PossessionStatus,
  ServiceOfEstate,
  ProofOfPossession,
}

impl GroupField {
  pub fn report_name(self) -> &'static str {
    match self {
      Self::PossessionStatus => "possession-status",
      Self::ServiceOfEstate => "service-of-estate",
      Self::ProofOfPossession => "proof-of-possession",
    }
  }
}

/// One group of a grouped count, ordered by descending `count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
  pub value: String,
  pub count: u64,
}

/// One of the three payment-amount fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountField {
  First,
  Second,
  Third,
}

impl AmountField {
  pub const ALL: [Self; 3] = [Self::First, Self::Second, Self::Third];

  pub fn label(self) -> &'static str {
    match self {
      Self::First => "FirstAmount Paid",
      Self::Second => "SecondAmount Paid",
      Self::Third => "ThirdAmount Paid",
    }
  }
}

/// Number of records with a given amount field greater than zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmountPaidCount {
  pub name:  String,
  pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
  pub total_records:       u64,
  pub registered_users:    u64,
  /// Audit entries tagged `VIEW` or `REPORT_GENERATED`.
  pub reports_generated:   u64,
  /// Attachments uploaded since the start of the current calendar month.
  pub files_uploaded:      u64,
  /// Distinct actors with a `LOGIN` in the trailing window.
  pub recent_active_users: u64,
}

/// Midnight UTC on the first day of `now`'s month.
pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
  NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|dt| dt.and_utc())
    .unwrap_or(now)
}

pub fn active_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
  now - Duration::days(ACTIVE_WINDOW_DAYS)
}
