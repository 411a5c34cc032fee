//! # nickname-store
//!
//! SQLite-backed registry of tracked nicknames.
//!
//! The store keeps one row per trimmed nickname with soft-delete semantics:
//! removing a nickname marks it inactive, and a later add reactivates the
//! same row (keeping its original creation time) instead of inserting a
//! duplicate. A successful existence check stamps the row's detection time.
//!
//! This crate has no network code. Front ends are thin adapters over the
//! operations exposed here.

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{DEFAULT_SOURCE, NicknameRecord, NicknameStore};
