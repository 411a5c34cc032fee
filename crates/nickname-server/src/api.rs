//! HTTP API handlers.
//!
//! Each handler translates a JSON request into one store operation and the
//! boolean/empty result back into JSON. Absent nicknames and no-op removals
//! are normal outcomes here, not errors.
//!
//! Endpoints:
//! - POST /api/add     — insert or reactivate a nickname
//! - POST /api/check   — existence check (stamps detection time on a hit)
//! - POST /api/remove  — deactivate (or hard-delete) a nickname
//! - GET  /api/list    — list records, newest first
//! - POST /api/backup  — snapshot the database

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use nickname_store::{DEFAULT_SOURCE, NicknameRecord};

use crate::AppState;

/// Request body for POST /api/add.
#[derive(Debug, Deserialize)]
pub struct AddRequest {
    pub nickname: String,
    /// Provenance tag; defaults to "manual".
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

/// Request body for POST /api/check.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub nickname: String,
}

/// Request body for POST /api/remove.
#[derive(Debug, Deserialize)]
pub struct RemoveRequest {
    pub nickname: String,
    /// When false, the row is deleted outright instead of deactivated.
    #[serde(default = "default_soft")]
    pub soft: bool,
}

fn default_soft() -> bool {
    true
}

/// Query params for GET /api/list.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Include soft-deleted records.
    #[serde(default)]
    pub include_inactive: bool,
}

/// A nickname record as serialized in /api/list.
#[derive(Debug, Serialize)]
pub struct NicknameEntry {
    pub id: i64,
    pub nickname: String,
    pub source: String,
    pub created_at: i64,
    pub last_detected: Option<i64>,
    pub is_active: bool,
}

impl From<NicknameRecord> for NicknameEntry {
    fn from(r: NicknameRecord) -> Self {
        Self {
            id: r.id,
            nickname: r.nickname,
            source: r.source,
            created_at: r.created_at,
            last_detected: r.last_detected,
            is_active: r.is_active,
        }
    }
}

/// Check the X-API-KEY header against the configured key, if any.
fn authorized(api_key: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = api_key else {
        return true;
    };
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|key| key == expected)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "invalid API key" })),
    )
        .into_response()
}

fn nickname_required() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "nickname is required" })),
    )
        .into_response()
}

fn database_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "database error" })),
    )
        .into_response()
}

/// POST /api/add — insert or reactivate a nickname.
pub async fn add_nickname(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AddRequest>,
) -> Response {
    if !authorized(state.api_key.as_deref(), &headers) {
        return unauthorized();
    }

    let nickname = req.nickname.trim().to_string();
    if nickname.is_empty() {
        return nickname_required();
    }

    if state.store.add(&nickname, &req.source) {
        (
            StatusCode::CREATED,
            Json(json!({
                "status": "success",
                "nickname": nickname,
                "source": req.source,
            })),
        )
            .into_response()
    } else {
        database_error()
    }
}

/// POST /api/check — check for an active nickname.
pub async fn check_nickname(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CheckRequest>,
) -> Response {
    if !authorized(state.api_key.as_deref(), &headers) {
        return unauthorized();
    }

    let nickname = req.nickname.trim().to_string();
    if nickname.is_empty() {
        return nickname_required();
    }

    let exists = state.store.check(&nickname);
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    Json(json!({
        "exists": exists,
        "nickname": nickname,
        "timestamp": timestamp,
    }))
    .into_response()
}

/// POST /api/remove — deactivate or delete a nickname.
pub async fn remove_nickname(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RemoveRequest>,
) -> Response {
    if !authorized(state.api_key.as_deref(), &headers) {
        return unauthorized();
    }

    let nickname = req.nickname.trim().to_string();
    if nickname.is_empty() {
        return nickname_required();
    }

    let removed = state.store.remove(&nickname, req.soft);
    Json(json!({
        "removed": removed,
        "nickname": nickname,
    }))
    .into_response()
}

/// GET /api/list — list tracked nicknames, newest first.
pub async fn list_nicknames(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListQuery>,
) -> Response {
    if !authorized(state.api_key.as_deref(), &headers) {
        return unauthorized();
    }

    let nicknames: Vec<NicknameEntry> = state
        .store
        .list(!params.include_inactive)
        .into_iter()
        .map(Into::into)
        .collect();

    Json(json!({ "nicknames": nicknames })).into_response()
}

/// POST /api/backup — take a snapshot of the database.
pub async fn backup_now(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(state.api_key.as_deref(), &headers) {
        return unauthorized();
    }

    match state.store.backup() {
        Some(path) => Json(json!({ "path": path.display().to_string() })).into_response(),
        None => database_error(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_passes_when_no_key_is_configured() {
        let headers = HeaderMap::new();
        assert!(authorized(None, &headers));
    }

    #[test]
    fn auth_requires_matching_header() {
        let mut headers = HeaderMap::new();
        assert!(!authorized(Some("secret"), &headers));

        headers.insert("x-api-key", "wrong".parse().unwrap());
        assert!(!authorized(Some("secret"), &headers));

        headers.insert("x-api-key", "secret".parse().unwrap());
        assert!(authorized(Some("secret"), &headers));
    }

    #[test]
    fn remove_request_defaults_to_soft() {
        let req: RemoveRequest = serde_json::from_str(r#"{"nickname": "Vex"}"#).unwrap();
        assert!(req.soft);

        let req: RemoveRequest =
            serde_json::from_str(r#"{"nickname": "Vex", "soft": false}"#).unwrap();
        assert!(!req.soft);
    }

    #[test]
    fn add_request_defaults_source_to_manual() {
        let req: AddRequest = serde_json::from_str(r#"{"nickname": "Vex"}"#).unwrap();
        assert_eq!(req.source, DEFAULT_SOURCE);
    }
}
