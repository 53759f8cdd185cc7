//! SQLite backend for the parcel property-records store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. File bytes go to a pluggable
//! [`parcel_core::blob::BlobStore`]; [`FsBlobStore`] keeps them on disk.

mod encode;
mod fs_blob;
mod queries;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use fs_blob::FsBlobStore;
pub use store::SqliteStore;
