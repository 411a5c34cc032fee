//! Server configuration, read from the environment.

use std::env;
use std::path::PathBuf;

const DEFAULT_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_DB: &str = "nicknames.db";
const DEFAULT_BACKUP_DIR: &str = "backups";

/// Keep backup snapshots for one week unless configured otherwise.
const DEFAULT_BACKUP_DAYS: u64 = 7;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Path of the SQLite store file.
    pub db_path: PathBuf,
    /// Directory backup snapshots are written into.
    pub backup_dir: PathBuf,
    /// Snapshots older than this many days are pruned.
    pub backup_days: u64,
    /// Shared secret for the X-API-KEY header. `None` disables auth.
    pub api_key: Option<String>,
}

impl Config {
    /// Read configuration from `NICKNAME_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("NICKNAME_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string()),
            db_path: env::var("NICKNAME_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB)),
            backup_dir: env::var("NICKNAME_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_BACKUP_DIR)),
            backup_days: env::var("NICKNAME_BACKUP_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_BACKUP_DAYS),
            api_key: env::var("NICKNAME_API_KEY").ok().filter(|k| !k.is_empty()),
        }
    }
}
