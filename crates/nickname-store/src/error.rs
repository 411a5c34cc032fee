//! Error types for nickname-store.
//!
//! Only opening the store surfaces errors to the caller; record operations
//! absorb storage failures into logged boolean or empty results.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while opening the store or taking a backup.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
