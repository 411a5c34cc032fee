//! Nickname registry HTTP server.
//!
//! A thin transport adapter over the nickname store: JSON routes map onto
//! the store's five operations, with API-key authentication and a daily
//! backup/retention task. The store is built once here and handed to the
//! handlers through shared state.

mod api;
mod config;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nickname_store::NicknameStore;

use crate::config::Config;

/// Shared state handed to every handler.
pub struct AppState {
    pub store: NicknameStore,
    /// Shared secret for the X-API-KEY header. `None` disables auth.
    pub api_key: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let store = match NicknameStore::open(&config.db_path, &config.backup_dir) {
        Ok(store) => store,
        Err(e) => {
            error!("Cannot initialize nickname store: {e}");
            std::process::exit(1);
        }
    };

    if config.api_key.is_none() {
        warn!("NICKNAME_API_KEY is not set; API authentication is disabled");
    }

    let state = Arc::new(AppState {
        store,
        api_key: config.api_key.clone(),
    });

    spawn_backup_task(state.clone(), config.backup_days);

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/add", post(api::add_nickname))
        .route("/api/check", post(api::check_nickname))
        .route("/api/remove", post(api::remove_nickname))
        .route("/api/list", get(api::list_nicknames))
        .route("/api/backup", post(api::backup_now))
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("Nickname registry listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn health() -> &'static str {
    "ok"
}

/// Snapshot the store once a day and prune snapshots past the retention
/// window. The first tick fires immediately, so startup takes a snapshot.
fn spawn_backup_task(state: Arc<AppState>, retention_days: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if state.store.backup().is_some() {
                prune_old_backups(state.store.backup_dir(), retention_days);
            }
        }
    });
}

/// Delete backup snapshots older than `retention_days`, by file mtime.
fn prune_old_backups(backup_dir: &Path, retention_days: u64) {
    let cutoff = Duration::from_secs(retention_days * 24 * 60 * 60);

    let entries = match std::fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read backup directory {}: {e}", backup_dir.display());
            return;
        }
    };

    let mut pruned = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let is_snapshot = name
            .to_str()
            .is_some_and(|n| n.starts_with("nicknames_backup_") && n.ends_with(".db"));
        if !is_snapshot {
            continue;
        }

        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| mtime.elapsed().ok())
            .is_some_and(|age| age > cutoff);

        if expired {
            match std::fs::remove_file(&path) {
                Ok(()) => pruned += 1,
                Err(e) => warn!("Cannot prune backup {}: {e}", path.display()),
            }
        }
    }

    if pruned > 0 {
        info!("Pruned {pruned} expired backup(s)");
    }
}
