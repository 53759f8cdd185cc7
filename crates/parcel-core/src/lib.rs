//! Core types and trait definitions for the parcel property-records backend.
//!
//! This crate is free of HTTP and database dependencies. It owns the rules:
//! attachment dedup and protection, audit attribution, access policies and
//! record validation. Storage and transport crates depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod access;
pub mod account;
pub mod attachment;
pub mod audit;
pub mod blob;
pub mod error;
pub mod hash;
pub mod record;
pub mod stats;
pub mod store;

pub use error::{Error, ErrorKind, Result};
