//! Property records: the land/property entries the whole system revolves
//! around.
//!
//! A record is identified internally by a UUID and externally by its UPIN
//! (Unique Parcel Identification Number), which is unique across the store.
//! Wire-format key names follow the administrative forms the records were
//! digitised from, hence the mixed casing.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::{Error, Result, attachment::Attachment};

/// Dates before this year are rejected for `LastTaxPaymtDate`.
pub const MIN_TAX_PAYMENT_YEAR: i32 = 1900;

/// Amounts carry at most this many digits in total (two of them decimals).
const AMOUNT_MAX_DIGITS: usize = 12;

// ─── Amount ──────────────────────────────────────────────────────────────────

/// A non-negative monetary amount with two decimal places, held as cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Amount(i64);

impl Amount {
  pub fn from_cents(cents: i64) -> Self { Self(cents) }

  pub fn cents(self) -> i64 { self.0 }

  pub fn is_positive(self) -> bool { self.0 > 0 }
}

impl fmt::Display for Amount {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
  }
}

impl FromStr for Amount {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
      Some((w, f)) => (w, f),
      None => (s, ""),
    };
    let valid_part = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if whole.is_empty() || !valid_part(whole) || !valid_part(frac) {
      return Err(format!("{s:?} is not a non-negative decimal amount"));
    }
    if frac.len() > 2 {
      return Err(format!("{s:?} has more than 2 decimal places"));
    }
    let whole = whole.trim_start_matches('0');
    if whole.len() > AMOUNT_MAX_DIGITS - 2 {
      return Err(format!("{s:?} has more than {AMOUNT_MAX_DIGITS} digits"));
    }
    let whole: i64 = if whole.is_empty() {
      0
    } else {
      whole.parse().map_err(|_| format!("{s:?} is out of range"))?
    };
    let frac: i64 = format!("{frac:0<2}").parse().unwrap_or(0);
    Ok(Self(whole * 100 + frac))
  }
}

impl Serialize for Amount {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for Amount {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
    let raw = Scalar::deserialize(deserializer)?;
    raw.to_text().parse().map_err(serde::de::Error::custom)
  }
}

// ─── Raw scalar input ────────────────────────────────────────────────────────

/// A JSON scalar that may arrive either as a number or as text (multipart
/// form fields are always text).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
  Number(serde_json::Number),
  Text(String),
}

impl Scalar {
  pub fn to_text(&self) -> String {
    match self {
      Self::Number(n) => n.to_string(),
      Self::Text(s) => s.trim().to_owned(),
    }
  }
}

// ─── Persisted fields ────────────────────────────────────────────────────────

/// The descriptive and financial fields of a record, already validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
  #[serde(rename = "PropertyOwnerName")]
  pub property_owner_name:    String,
  #[serde(rename = "ExistingArchiveCode")]
  pub existing_archive_code:  String,
  #[serde(rename = "UPIN")]
  pub upin:                   String,
  #[serde(rename = "PhoneNumber")]
  pub phone_number:           Option<String>,
  #[serde(rename = "NationalId")]
  pub national_id:            Option<String>,
  #[serde(rename = "ServiceOfEstate")]
  pub service_of_estate:      String,
  #[serde(rename = "placeLevel")]
  pub place_level:            String,
  #[serde(rename = "possessionStatus")]
  pub possession_status:      String,
  #[serde(rename = "spaceSize")]
  pub space_size:             String,
  pub kebele:                 String,
  #[serde(rename = "proofOfPossession")]
  pub proof_of_possession:    String,
  #[serde(rename = "DebtRestriction")]
  pub debt_restriction:       String,

  // ── Land tax ────────────────────────────────────────────────────────────
  #[serde(rename = "LastTaxPaymtDate")]
  pub last_tax_payment_date:  Option<NaiveDate>,
  #[serde(rename = "unpaidTaxDebt")]
  pub unpaid_tax_debt:        Option<Amount>,
  #[serde(rename = "InvoiceNumber")]
  pub invoice_number:         Option<String>,
  #[serde(rename = "FirstAmount")]
  pub first_amount:           Option<Amount>,

  // ── Property tax ────────────────────────────────────────────────────────
  #[serde(rename = "lastDatePayPropTax")]
  pub last_date_pay_prop_tax: Option<NaiveDate>,
  #[serde(rename = "unpaidPropTaxDebt")]
  pub unpaid_prop_tax_debt:   Option<Amount>,
  #[serde(rename = "InvoiceNumber2")]
  pub invoice_number2:        Option<String>,
  #[serde(rename = "SecondAmount")]
  pub second_amount:          Option<Amount>,
  #[serde(rename = "filePath")]
  pub file_path:              Option<String>,

  // ── Lease ───────────────────────────────────────────────────────────────
  #[serde(rename = "EndLeasePayPeriod")]
  pub end_lease_pay_period:   Option<NaiveDate>,
  #[serde(rename = "unpaidLeaseDebt")]
  pub unpaid_lease_debt:      Option<Amount>,
  #[serde(rename = "InvoiceNumber3")]
  pub invoice_number3:        Option<String>,
  #[serde(rename = "ThirdAmount")]
  pub third_amount:           Option<Amount>,

  // ── Physical archive location ───────────────────────────────────────────
  #[serde(rename = "FolderNumber")]
  pub folder_number:          Option<String>,
  #[serde(rename = "Row")]
  pub row:                    Option<String>,
  #[serde(rename = "ShelfNumber")]
  pub shelf_number:           Option<String>,
  #[serde(rename = "NumberOfPages")]
  pub number_of_pages:        Option<i64>,
  #[serde(rename = "sortingNumber")]
  pub sorting_number:         Option<String>,
}

impl RecordFields {
  /// Check the invariants that hold for every stored record.
  pub fn validate(&self) -> Result<()> {
    let required = [
      ("PropertyOwnerName", &self.property_owner_name),
      ("ExistingArchiveCode", &self.existing_archive_code),
      ("UPIN", &self.upin),
      ("ServiceOfEstate", &self.service_of_estate),
      ("placeLevel", &self.place_level),
      ("possessionStatus", &self.possession_status),
      ("spaceSize", &self.space_size),
      ("kebele", &self.kebele),
      ("proofOfPossession", &self.proof_of_possession),
      ("DebtRestriction", &self.debt_restriction),
    ];
    let missing: Vec<&str> = required
      .iter()
      .filter(|(_, v)| v.trim().is_empty())
      .map(|(k, _)| *k)
      .collect();
    if !missing.is_empty() {
      return Err(Error::Validation(format!(
        "required fields missing or blank: {}",
        missing.join(", ")
      )));
    }

    if let Some(d) = self.last_tax_payment_date
      && d.year() < MIN_TAX_PAYMENT_YEAR
    {
      return Err(Error::Validation(format!(
        "LastTaxPaymtDate must be after {MIN_TAX_PAYMENT_YEAR}"
      )));
    }

    if let Some(n) = self.number_of_pages
      && n < 0
    {
      return Err(Error::Validation("NumberOfPages may not be negative".into()));
    }

    Ok(())
  }
}

// ─── Stored record ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub id:         Uuid,
  #[serde(flatten)]
  pub fields:     RecordFields,
  #[serde(rename = "createdAt")]
  pub created_at: DateTime<Utc>,
  #[serde(rename = "updatedAt")]
  pub updated_at: DateTime<Utc>,
}

/// A record bundled with its attachments, as returned by detail reads.
#[derive(Debug, Clone, Serialize)]
pub struct RecordDetail {
  #[serde(flatten)]
  pub record: Record,
  pub files:  Vec<Attachment>,
}

// ─── Input ───────────────────────────────────────────────────────────────────

/// Raw, unvalidated record input. Every key is optional so the same type
/// serves full writes ([`RecordDraft::into_fields`]) and partial updates
/// ([`RecordDraft::apply_to`]).
///
/// For optional fields an empty string clears the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordDraft {
  #[serde(rename = "PropertyOwnerName")]
  pub property_owner_name:    Option<String>,
  #[serde(rename = "ExistingArchiveCode")]
  pub existing_archive_code:  Option<String>,
  #[serde(rename = "UPIN")]
  pub upin:                   Option<String>,
  #[serde(rename = "PhoneNumber")]
  pub phone_number:           Option<String>,
  #[serde(rename = "NationalId")]
  pub national_id:            Option<String>,
  #[serde(rename = "ServiceOfEstate")]
  pub service_of_estate:      Option<String>,
  #[serde(rename = "placeLevel")]
  pub place_level:            Option<String>,
  #[serde(rename = "possessionStatus")]
  pub possession_status:      Option<String>,
  #[serde(rename = "spaceSize")]
  pub space_size:             Option<String>,
  pub kebele:                 Option<String>,
  #[serde(rename = "proofOfPossession")]
  pub proof_of_possession:    Option<String>,
  #[serde(rename = "DebtRestriction")]
  pub debt_restriction:       Option<String>,
  #[serde(rename = "LastTaxPaymtDate")]
  pub last_tax_payment_date:  Option<String>,
  #[serde(rename = "unpaidTaxDebt")]
  pub unpaid_tax_debt:        Option<Scalar>,
  #[serde(rename = "InvoiceNumber")]
  pub invoice_number:         Option<String>,
  #[serde(rename = "FirstAmount")]
  pub first_amount:           Option<Scalar>,
  #[serde(rename = "lastDatePayPropTax")]
  pub last_date_pay_prop_tax: Option<String>,
  #[serde(rename = "unpaidPropTaxDebt")]
  pub unpaid_prop_tax_debt:   Option<Scalar>,
  #[serde(rename = "InvoiceNumber2")]
  pub invoice_number2:        Option<String>,
  #[serde(rename = "SecondAmount")]
  pub second_amount:          Option<Scalar>,
  #[serde(rename = "filePath")]
  pub file_path:              Option<String>,
  #[serde(rename = "EndLeasePayPeriod")]
  pub end_lease_pay_period:   Option<String>,
  #[serde(rename = "unpaidLeaseDebt")]
  pub unpaid_lease_debt:      Option<Scalar>,
  #[serde(rename = "InvoiceNumber3")]
  pub invoice_number3:        Option<String>,
  #[serde(rename = "ThirdAmount")]
  pub third_amount:           Option<Scalar>,
  #[serde(rename = "FolderNumber")]
  pub folder_number:          Option<String>,
  #[serde(rename = "Row")]
  pub row:                    Option<String>,
  #[serde(rename = "ShelfNumber")]
  pub shelf_number:           Option<String>,
  #[serde(rename = "NumberOfPages")]
  pub number_of_pages:        Option<Scalar>,
  #[serde(rename = "sortingNumber")]
  pub sorting_number:         Option<String>,
}

impl RecordDraft {
  /// Build a draft from flat text fields, e.g. the non-file parts of a
  /// multipart form. Unknown keys are ignored.
  pub fn from_form<'a>(
    fields: impl IntoIterator<Item = (&'a str, &'a str)>,
  ) -> Result<Self> {
    let map: serde_json::Map<String, serde_json::Value> = fields
      .into_iter()
      .map(|(k, v)| (k.to_owned(), serde_json::Value::String(v.to_owned())))
      .collect();
    serde_json::from_value(serde_json::Value::Object(map))
      .map_err(|e| Error::Validation(e.to_string()))
  }

  /// Validate a complete record. Absent optional fields are left empty.
  pub fn into_fields(self) -> Result<RecordFields> {
    self.apply_to(&RecordFields::default())
  }

  /// Overlay the supplied keys onto `current` and validate the result.
  pub fn apply_to(self, current: &RecordFields) -> Result<RecordFields> {
    let mut f = current.clone();

    merge_text(&mut f.property_owner_name, self.property_owner_name);
    merge_text(&mut f.existing_archive_code, self.existing_archive_code);
    merge_text(&mut f.upin, self.upin);
    merge_opt_text(&mut f.phone_number, self.phone_number);
    merge_opt_text(&mut f.national_id, self.national_id);
    merge_text(&mut f.service_of_estate, self.service_of_estate);
    merge_text(&mut f.place_level, self.place_level);
    merge_text(&mut f.possession_status, self.possession_status);
    merge_text(&mut f.space_size, self.space_size);
    merge_text(&mut f.kebele, self.kebele);
    merge_text(&mut f.proof_of_possession, self.proof_of_possession);
    merge_text(&mut f.debt_restriction, self.debt_restriction);

    merge_date("LastTaxPaymtDate", &mut f.last_tax_payment_date, self.last_tax_payment_date)?;
    merge_amount("unpaidTaxDebt", &mut f.unpaid_tax_debt, self.unpaid_tax_debt)?;
    merge_opt_text(&mut f.invoice_number, self.invoice_number);
    merge_amount("FirstAmount", &mut f.first_amount, self.first_amount)?;

    merge_date("lastDatePayPropTax", &mut f.last_date_pay_prop_tax, self.last_date_pay_prop_tax)?;
    merge_amount("unpaidPropTaxDebt", &mut f.unpaid_prop_tax_debt, self.unpaid_prop_tax_debt)?;
    merge_opt_text(&mut f.invoice_number2, self.invoice_number2);
    merge_amount("SecondAmount", &mut f.second_amount, self.second_amount)?;
    merge_opt_text(&mut f.file_path, self.file_path);

    merge_date("EndLeasePayPeriod", &mut f.end_lease_pay_period, self.end_lease_pay_period)?;
    merge_amount("unpaidLeaseDebt", &mut f.unpaid_lease_debt, self.unpaid_lease_debt)?;
    merge_opt_text(&mut f.invoice_number3, self.invoice_number3);
    merge_amount("ThirdAmount", &mut f.third_amount, self.third_amount)?;

    merge_opt_text(&mut f.folder_number, self.folder_number);
    merge_opt_text(&mut f.row, self.row);
    merge_opt_text(&mut f.shelf_number, self.shelf_number);
    if let Some(raw) = self.number_of_pages {
      let text = raw.to_text();
      f.number_of_pages = if text.is_empty() {
        None
      } else {
        Some(text.parse().map_err(|_| {
          Error::Validation(format!("NumberOfPages: {text:?} is not an integer"))
        })?)
      };
    }
    merge_opt_text(&mut f.sorting_number, self.sorting_number);

    f.validate()?;
    Ok(f)
  }
}

fn merge_text(target: &mut String, value: Option<String>) {
  if let Some(v) = value {
    *target = v.trim().to_owned();
  }
}

fn merge_opt_text(target: &mut Option<String>, value: Option<String>) {
  if let Some(v) = value {
    let v = v.trim();
    *target = (!v.is_empty()).then(|| v.to_owned());
  }
}

fn merge_date(
  field: &str,
  target: &mut Option<NaiveDate>,
  value: Option<String>,
) -> Result<()> {
  if let Some(v) = value {
    *target = normalize_date(field, &v)?;
  }
  Ok(())
}

fn merge_amount(
  field: &str,
  target: &mut Option<Amount>,
  value: Option<Scalar>,
) -> Result<()> {
  if let Some(v) = value {
    let text = v.to_text();
    *target = if text.is_empty() {
      None
    } else {
      Some(text.parse().map_err(|e| Error::Validation(format!("{field}: {e}")))?)
    };
  }
  Ok(())
}

/// Parse a date field. A bare four-digit year expands to January 1st of that
/// year; an empty value means "no date".
pub fn normalize_date(field: &str, raw: &str) -> Result<Option<NaiveDate>> {
  let raw = raw.trim();
  if raw.is_empty() {
    return Ok(None);
  }
  let expanded = if raw.len() == 4 && raw.chars().all(|c| c.is_ascii_digit()) {
    format!("{raw}-01-01")
  } else {
    raw.to_owned()
  };
  NaiveDate::parse_from_str(&expanded, "%Y-%m-%d")
    .map(Some)
    .map_err(|_| Error::Validation(format!("{field}: expected YYYY-MM-DD or YYYY, got {raw:?}")))
}

// ─── Filters ─────────────────────────────────────────────────────────────────

/// A single-field exact-match filter. Combined filters are not supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFilter {
  Upin(String),
  ArchiveCode(String),
  ServiceOfEstate(String),
  Kebele(String),
  ProofOfPossession(String),
  PossessionStatus(String),
}

impl RecordFilter {
  pub fn value(&self) -> &str {
    match self {
      Self::Upin(v)
      | Self::ArchiveCode(v)
      | Self::ServiceOfEstate(v)
      | Self::Kebele(v)
      | Self::ProofOfPossession(v)
      | Self::PossessionStatus(v) => v,
    }
  }
}
