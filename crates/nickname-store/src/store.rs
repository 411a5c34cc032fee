//! SQLite persistence for the nickname registry.
//!
//! Uniqueness lives in the schema: a soft-deleted row still holds its
//! nickname's slot, so re-adding reactivates it rather than duplicating it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{error, info, warn};

use crate::error::StoreError;

/// Source tag recorded when the caller does not supply one.
pub const DEFAULT_SOURCE: &str = "manual";

/// A tracked nickname row.
#[derive(Debug, Clone)]
pub struct NicknameRecord {
    pub id: i64,
    pub nickname: String,
    /// Provenance tag, e.g. "manual" or "telegram". Free-form.
    pub source: String,
    /// Unix epoch milliseconds of the first insertion. Survives reactivation.
    pub created_at: i64,
    /// Unix epoch milliseconds of the last successful check, if any.
    pub last_detected: Option<i64>,
    pub is_active: bool,
}

/// Registry store backed by a single SQLite file.
///
/// Every operation opens its own short-lived connection, so no caller holds
/// a shared handle across operations; SQLite's own locking arbitrates
/// concurrent writers.
pub struct NicknameStore {
    db_path: PathBuf,
    backup_dir: PathBuf,
}

impl NicknameStore {
    /// Open or create the registry database and ensure the schema exists.
    ///
    /// This is the one operation that propagates storage errors: a store
    /// that cannot initialize its schema is unusable.
    pub fn open(
        db_path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let store = Self {
            db_path: db_path.into(),
            backup_dir: backup_dir.into(),
        };

        if let Some(dir) = store.db_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = store.connection()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tracked_nicknames (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                nickname      TEXT UNIQUE NOT NULL,
                source        TEXT NOT NULL DEFAULT 'manual',
                created_at    INTEGER NOT NULL,
                last_detected INTEGER,
                is_active     INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_nickname_active
                ON tracked_nicknames(nickname, is_active);",
        )?;

        info!("Nickname store opened: {}", store.db_path.display());
        Ok(store)
    }

    /// Open a connection scoped to a single operation.
    fn connection(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(&self.db_path)?;
        // WAL for concurrent readers; the busy timeout covers competing writers.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Ok(conn)
    }

    /// Insert a nickname, or reactivate it if it was soft-deleted.
    ///
    /// The nickname is trimmed before storage; a blank nickname is rejected.
    /// Adding an already-active nickname is an idempotent success that
    /// refreshes its source. `created_at` is never touched after the first
    /// insertion.
    pub fn add(&self, nickname: &str, source: &str) -> bool {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            warn!("Rejected empty nickname");
            return false;
        }

        match self.try_add(nickname, source) {
            Ok(()) => {
                info!("Added/reactivated nickname: {nickname}");
                true
            }
            Err(e) => {
                error!("Failed to add nickname {nickname}: {e}");
                false
            }
        }
    }

    fn try_add(&self, nickname: &str, source: &str) -> Result<(), rusqlite::Error> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO tracked_nicknames (nickname, source, created_at, is_active)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(nickname)
             DO UPDATE SET is_active = 1, source = excluded.source",
            params![nickname, source, now_millis()],
        )?;
        Ok(())
    }

    /// Deactivate a nickname (`soft = true`) or delete its row outright.
    ///
    /// Returns `true` iff a row was affected. A missing or already-inactive
    /// nickname is a `false` outcome, not an error.
    pub fn remove(&self, nickname: &str, soft: bool) -> bool {
        let nickname = nickname.trim();
        match self.try_remove(nickname, soft) {
            Ok(true) => {
                info!(
                    "{} nickname: {nickname}",
                    if soft { "Deactivated" } else { "Deleted" }
                );
                true
            }
            Ok(false) => {
                warn!("Nickname not found or already inactive: {nickname}");
                false
            }
            Err(e) => {
                error!("Failed to remove nickname {nickname}: {e}");
                false
            }
        }
    }

    fn try_remove(&self, nickname: &str, soft: bool) -> Result<bool, rusqlite::Error> {
        let conn = self.connection()?;
        let affected = if soft {
            conn.execute(
                "UPDATE tracked_nicknames SET is_active = 0
                 WHERE nickname = ?1 AND is_active = 1",
                params![nickname],
            )?
        } else {
            conn.execute(
                "DELETE FROM tracked_nicknames WHERE nickname = ?1",
                params![nickname],
            )?
        };
        Ok(affected > 0)
    }

    /// Check whether an active record with this nickname exists.
    ///
    /// On a hit the row's `last_detected` is stamped with the current time;
    /// failing to stamp it never fails the check itself.
    pub fn check(&self, nickname: &str) -> bool {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return false;
        }

        match self.try_check(nickname) {
            Ok(exists) => exists,
            Err(e) => {
                error!("Failed to check nickname {nickname}: {e}");
                false
            }
        }
    }

    fn try_check(&self, nickname: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.connection()?;
        let exists = conn
            .query_row(
                "SELECT 1 FROM tracked_nicknames
                 WHERE nickname = ?1 AND is_active = 1",
                params![nickname],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        if exists {
            // Best-effort telemetry, not part of the existence contract.
            if let Err(e) = conn.execute(
                "UPDATE tracked_nicknames SET last_detected = ?1 WHERE nickname = ?2",
                params![now_millis(), nickname],
            ) {
                warn!("Could not stamp detection time for {nickname}: {e}");
            }
        }

        Ok(exists)
    }

    /// List records, most recently created first (ties broken by id).
    ///
    /// With `active_only` set, soft-deleted records are filtered out.
    /// Storage errors degrade to an empty list.
    pub fn list(&self, active_only: bool) -> Vec<NicknameRecord> {
        match self.try_list(active_only) {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to list nicknames: {e}");
                Vec::new()
            }
        }
    }

    fn try_list(&self, active_only: bool) -> Result<Vec<NicknameRecord>, rusqlite::Error> {
        let conn = self.connection()?;
        let sql = if active_only {
            "SELECT id, nickname, source, created_at, last_detected, is_active
             FROM tracked_nicknames
             WHERE is_active = 1
             ORDER BY created_at DESC, id DESC"
        } else {
            "SELECT id, nickname, source, created_at, last_detected, is_active
             FROM tracked_nicknames
             ORDER BY created_at DESC, id DESC"
        };

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(NicknameRecord {
                id: row.get(0)?,
                nickname: row.get(1)?,
                source: row.get(2)?,
                created_at: row.get(3)?,
                last_detected: row.get(4)?,
                is_active: row.get::<_, i64>(5)? != 0,
            })
        })?;

        rows.collect()
    }

    /// Snapshot the database into the backup directory.
    ///
    /// Uses SQLite's online backup API, so the copy is consistent even with
    /// writes in flight. Returns the snapshot path, or `None` after logging
    /// the failure.
    pub fn backup(&self) -> Option<PathBuf> {
        match self.try_backup() {
            Ok(path) => {
                info!("Created backup: {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!("Backup failed: {e}");
                None
            }
        }
    }

    fn try_backup(&self) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.backup_dir).map_err(|source| StoreError::CreateDir {
            path: self.backup_dir.clone(),
            source,
        })?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = self.backup_dir.join(format!("nicknames_backup_{stamp}.db"));

        let src = self.connection()?;
        let mut dst = Connection::open(&path)?;
        let backup = rusqlite::backup::Backup::new(&src, &mut dst)?;
        backup.run_to_completion(100, Duration::from_millis(250), None)?;

        Ok(path)
    }

    /// Directory backups are written into.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> NicknameStore {
        NicknameStore::open(dir.path().join("nicknames.db"), dir.path().join("backups"))
            .expect("open store")
    }

    /// Raw connection for poking at rows the public API keeps fixed.
    fn raw_conn(dir: &TempDir) -> Connection {
        Connection::open(dir.path().join("nicknames.db")).expect("open raw connection")
    }

    #[test]
    fn add_then_check_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(store.add("Vex", DEFAULT_SOURCE));
        assert!(store.check("Vex"));
    }

    #[test]
    fn blank_nicknames_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(!store.add("", DEFAULT_SOURCE));
        assert!(!store.add("   ", DEFAULT_SOURCE));
        assert!(store.list(false).is_empty());
    }

    #[test]
    fn nicknames_are_trimmed_before_storage_and_lookup() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(store.add("  Vex  ", DEFAULT_SOURCE));
        assert!(store.check("Vex"));
        assert!(store.check(" Vex "));

        let records = store.list(true);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].nickname, "Vex");
    }

    #[test]
    fn nicknames_are_case_sensitive() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(store.add("Alice", DEFAULT_SOURCE));
        assert!(store.add("alice", DEFAULT_SOURCE));

        let records = store.list(true);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn readd_while_active_is_idempotent_and_refreshes_source() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(store.add("Vex", "manual"));
        assert!(store.add("Vex", "telegram"));

        let records = store.list(true);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "telegram");
    }

    #[test]
    fn soft_remove_then_readd_reactivates_same_record() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(store.add("Vex", "manual"));
        let original = store.list(true).remove(0);

        assert!(store.remove("Vex", true));
        assert!(!store.check("Vex"));

        assert!(store.add("Vex", "telegram"));
        let records = store.list(true);
        assert_eq!(records.len(), 1);

        let reactivated = &records[0];
        assert_eq!(reactivated.id, original.id);
        assert_eq!(reactivated.created_at, original.created_at);
        assert_eq!(reactivated.source, "telegram");
        assert!(reactivated.is_active);
    }

    #[test]
    fn remove_of_unknown_nickname_is_false_not_an_error() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(!store.remove("ghost", true));
        assert!(!store.remove("ghost", false));
    }

    #[test]
    fn second_soft_remove_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.add("Vex", DEFAULT_SOURCE);
        assert!(store.remove("Vex", true));
        assert!(!store.remove("Vex", true));
    }

    #[test]
    fn hard_remove_frees_the_row() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.add("Vex", DEFAULT_SOURCE);
        let old_id = store.list(true)[0].id;

        assert!(store.remove("Vex", false));
        assert!(store.list(false).is_empty());

        // A fresh insert gets a fresh id; AUTOINCREMENT never reuses one.
        assert!(store.add("Vex", DEFAULT_SOURCE));
        assert!(store.list(true)[0].id > old_id);
    }

    #[test]
    fn list_filters_soft_deleted_records() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.add("keep", DEFAULT_SOURCE);
        store.add("drop", DEFAULT_SOURCE);
        store.remove("drop", true);

        let active = store.list(true);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].nickname, "keep");

        let all = store.list(false);
        assert_eq!(all.len(), 2);
        let dropped = all.iter().find(|r| r.nickname == "drop").unwrap();
        assert!(!dropped.is_active);
    }

    #[test]
    fn list_orders_by_creation_time_descending() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.add("first", DEFAULT_SOURCE);
        store.add("second", DEFAULT_SOURCE);
        store.add("third", DEFAULT_SOURCE);

        // Spread the creation times so ordering is about created_at, not
        // insertion order.
        let conn = raw_conn(&dir);
        for (nickname, ts) in [("first", 1_000), ("second", 2_000), ("third", 3_000)] {
            conn.execute(
                "UPDATE tracked_nicknames SET created_at = ?1 WHERE nickname = ?2",
                params![ts, nickname],
            )
            .unwrap();
        }

        let names: Vec<_> = store.list(true).into_iter().map(|r| r.nickname).collect();
        assert_eq!(names, ["third", "second", "first"]);
    }

    #[test]
    fn list_breaks_creation_time_ties_by_id_descending() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.add("a", DEFAULT_SOURCE);
        store.add("b", DEFAULT_SOURCE);
        store.add("c", DEFAULT_SOURCE);

        let conn = raw_conn(&dir);
        conn.execute("UPDATE tracked_nicknames SET created_at = 5000", [])
            .unwrap();

        let names: Vec<_> = store.list(true).into_iter().map(|r| r.nickname).collect();
        assert_eq!(names, ["c", "b", "a"]);
    }

    #[test]
    fn check_stamps_last_detected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.add("Vex", DEFAULT_SOURCE);
        assert!(store.list(true)[0].last_detected.is_none());

        assert!(store.check("Vex"));
        let record = store.list(true).remove(0);
        let first = record.last_detected.expect("detection time set");
        assert!(first >= record.created_at);

        assert!(store.check("Vex"));
        let second = store.list(true)[0].last_detected.unwrap();
        assert!(second >= first);
    }

    #[test]
    fn check_on_inactive_record_is_false_and_does_not_stamp() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.add("Vex", DEFAULT_SOURCE);
        store.remove("Vex", true);

        assert!(!store.check("Vex"));
        assert!(store.list(false)[0].last_detected.is_none());
    }

    #[test]
    fn check_on_unknown_nickname_is_false() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(!store.check("ghost"));
        assert!(!store.check(""));
    }

    #[test]
    fn backup_snapshot_matches_live_store() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.add("one", DEFAULT_SOURCE);
        store.add("two", DEFAULT_SOURCE);
        store.remove("two", true);

        let snapshot_path = store.backup().expect("backup created");
        assert!(snapshot_path.starts_with(dir.path().join("backups")));

        // Mutate the live store after the snapshot.
        store.add("three", DEFAULT_SOURCE);

        let snapshot =
            NicknameStore::open(&snapshot_path, dir.path().join("unused")).expect("open snapshot");
        let names: Vec<_> = snapshot
            .list(false)
            .into_iter()
            .map(|r| r.nickname)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"one".to_string()));
        assert!(names.contains(&"two".to_string()));
        assert!(!names.contains(&"three".to_string()));
    }

    #[test]
    fn reopening_the_store_is_idempotent() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            store.add("Vex", DEFAULT_SOURCE);
        }
        let store = open_store(&dir);
        assert!(store.check("Vex"));
    }

    #[test]
    fn tracked_lifecycle_end_to_end() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(store.add("Alice", "manual"));
        assert!(store.add("alice", "manual"));
        assert!(store.check("Alice"));
        assert!(
            store
                .list(true)
                .iter()
                .find(|r| r.nickname == "Alice")
                .unwrap()
                .last_detected
                .is_some()
        );

        assert!(store.remove("Alice", true));
        assert!(!store.check("Alice"));

        assert!(store.add("Alice", "telegram"));
        let records = store.list(true);
        let alice: Vec<_> = records.iter().filter(|r| r.nickname == "Alice").collect();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].source, "telegram");
    }
}
