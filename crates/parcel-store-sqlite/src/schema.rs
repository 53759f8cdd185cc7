//! SQL schema for the parcel SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS` / `OR IGNORE`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Filterable and aggregated fields are broken out into columns; the full
-- validated field set lives in fields_json.
CREATE TABLE IF NOT EXISTS records (
    record_id             TEXT PRIMARY KEY,
    upin                  TEXT NOT NULL UNIQUE,
    existing_archive_code TEXT NOT NULL,
    service_of_estate     TEXT NOT NULL,
    kebele                TEXT NOT NULL,
    proof_of_possession   TEXT NOT NULL,
    possession_status     TEXT NOT NULL,
    first_amount_cents    INTEGER,
    second_amount_cents   INTEGER,
    third_amount_cents    INTEGER,
    fields_json           TEXT NOT NULL,
    created_at            TEXT NOT NULL,   -- fixed-width RFC 3339 UTC
    updated_at            TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS records_archive_code_idx ON records(existing_archive_code);
CREATE INDEX IF NOT EXISTS records_service_idx      ON records(service_of_estate);
CREATE INDEX IF NOT EXISTS records_kebele_idx       ON records(kebele);
CREATE INDEX IF NOT EXISTS records_proof_idx        ON records(proof_of_possession);
CREATE INDEX IF NOT EXISTS records_possession_idx   ON records(possession_status);
CREATE INDEX IF NOT EXISTS records_created_idx      ON records(created_at);

CREATE TABLE IF NOT EXISTS attachments (
    attachment_id  TEXT PRIMARY KEY,
    record_id      TEXT NOT NULL REFERENCES records(record_id) ON DELETE CASCADE,
    blob_handle    TEXT NOT NULL,
    file_name      TEXT NOT NULL,
    display_name   TEXT NOT NULL,
    category       TEXT NOT NULL,
    content_type   TEXT NOT NULL,
    content_digest TEXT NOT NULL,   -- hex SHA-256
    size_bytes     INTEGER NOT NULL,
    uploaded_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS attachments_digest_idx   ON attachments(record_id, content_digest);
CREATE INDEX IF NOT EXISTS attachments_uploaded_idx ON attachments(uploaded_at);

-- Strictly append-only; user and role are snapshots, not foreign keys.
CREATE TABLE IF NOT EXISTS audit_log (
    entry_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    user       TEXT NOT NULL,
    action     TEXT NOT NULL,
    details    TEXT NOT NULL DEFAULT '',
    ip_address TEXT,
    role       TEXT NOT NULL,
    timestamp  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS audit_log_timestamp_idx ON audit_log(timestamp);
CREATE INDEX IF NOT EXISTS audit_log_action_idx    ON audit_log(action);

CREATE TABLE IF NOT EXISTS users (
    user_id       TEXT PRIMARY KEY,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS roles (
    name TEXT PRIMARY KEY
);

INSERT OR IGNORE INTO roles (name) VALUES ('Administrators'), ('Editors');

CREATE TABLE IF NOT EXISTS user_roles (
    user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    role    TEXT NOT NULL REFERENCES roles(name),
    PRIMARY KEY (user_id, role)
);

PRAGMA user_version = 1;
";
