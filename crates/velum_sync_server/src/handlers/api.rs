use crate::room::RoomRegistry;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use velum_core::VelumError;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<RoomRegistry>,
}

/// Server status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub active_connections: usize,
    pub active_rooms: usize,
}

#[derive(Debug, Deserialize)]
pub struct VersionsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub room: String,
    pub version_id: Option<i64>,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub version_id: i64,
}

/// Response for operations that rewound history to a new version
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub new_version_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
    pub version_id: i64,
    pub created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSnapshotRequest {
    pub name: String,
    pub created_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotCreatedResponse {
    pub snapshot_id: i64,
}

/// Create API routes
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/rooms/{room}/content", get(get_content))
        .route("/rooms/{room}/versions", get(list_versions))
        .route("/rooms/{room}/versions/{version_id}", get(get_version))
        .route("/rooms/{room}/rollback", post(rollback))
        .route("/rooms/{room}/tags", get(list_tags).post(create_tag))
        .route("/rooms/{room}/tags/{tag_id}", delete(delete_tag))
        .route(
            "/rooms/{room}/snapshots",
            get(list_snapshots).post(create_snapshot),
        )
        .route(
            "/rooms/{room}/snapshots/{snapshot_id}/restore",
            post(restore_snapshot),
        )
        .with_state(state)
}

fn error_response(context: &str, e: VelumError) -> axum::response::Response {
    let status = if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        warn!("{}: {}", context, e);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, e.to_string()).into_response()
}

/// GET /api/status - Get server status (public endpoint)
async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    let stats = state.registry.stats().await;

    Json(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_connections: stats.active_connections,
        active_rooms: stats.active_rooms,
    })
}

/// GET /api/rooms/:room/content - Current document text
async fn get_content(
    State(state): State<ApiState>,
    Path(room): Path<String>,
) -> impl IntoResponse {
    // Prefer the live document; fall back to reconstructing from the log.
    let content = match state.registry.get(&room).await {
        Some(live) => live.content(),
        None => match state.registry.store().load_at(&room, None) {
            Ok(doc) => doc.plain_text(),
            Err(e) => return error_response("Failed to load room", e),
        },
    };

    Json(ContentResponse {
        room,
        version_id: None,
        content,
    })
    .into_response()
}

/// GET /api/rooms/:room/versions - Version history, newest first
async fn list_versions(
    State(state): State<ApiState>,
    Path(room): Path<String>,
    Query(query): Query<VersionsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50).clamp(1, 1000);
    match state.registry.store().list_versions(&room, limit) {
        Ok(versions) => Json(versions).into_response(),
        Err(e) => error_response("Failed to list versions", e),
    }
}

/// GET /api/rooms/:room/versions/:version_id - Document text at a version
async fn get_version(
    State(state): State<ApiState>,
    Path((room, version_id)): Path<(String, i64)>,
) -> impl IntoResponse {
    let store = state.registry.store();

    match store.has_version(&room, version_id) {
        Ok(false) => {
            return error_response(
                "Version lookup failed",
                VelumError::VersionNotFound {
                    room,
                    version: version_id,
                },
            );
        }
        Err(e) => return error_response("Version lookup failed", e),
        Ok(true) => {}
    }

    match store.load_at(&room, Some(version_id)) {
        Ok(doc) => Json(ContentResponse {
            room,
            version_id: Some(version_id),
            content: doc.plain_text(),
        })
        .into_response(),
        Err(e) => error_response("Failed to reconstruct version", e),
    }
}

/// POST /api/rooms/:room/rollback - Rewind the room to an older version
async fn rollback(
    State(state): State<ApiState>,
    Path(room): Path<String>,
    Json(req): Json<RollbackRequest>,
) -> impl IntoResponse {
    // Pending edits must land in the log before the rollback snapshot so
    // they stay part of history.
    if let Err(e) = state.registry.flush_room(&room).await {
        return error_response("Failed to flush room before rollback", e);
    }

    match state.registry.store().rollback(&room, req.version_id) {
        Ok(new_version_id) => {
            state.registry.evict_for_reset(&room, new_version_id).await;
            Json(ResetResponse { new_version_id }).into_response()
        }
        Err(e) => error_response("Rollback failed", e),
    }
}

/// GET /api/rooms/:room/tags - List tags, newest first
async fn list_tags(State(state): State<ApiState>, Path(room): Path<String>) -> impl IntoResponse {
    match state.registry.store().list_tags(&room) {
        Ok(tags) => Json(tags).into_response(),
        Err(e) => error_response("Failed to list tags", e),
    }
}

/// POST /api/rooms/:room/tags - Tag a version
async fn create_tag(
    State(state): State<ApiState>,
    Path(room): Path<String>,
    Json(req): Json<CreateTagRequest>,
) -> impl IntoResponse {
    let created_by = req.created_by.as_deref().unwrap_or("anonymous");
    match state
        .registry
        .store()
        .create_tag(&room, &req.name, req.version_id, created_by)
    {
        Ok(tag) => (StatusCode::CREATED, Json(tag)).into_response(),
        Err(e) => error_response("Failed to create tag", e),
    }
}

/// DELETE /api/rooms/:room/tags/:tag_id - Remove a tag
async fn delete_tag(
    State(state): State<ApiState>,
    Path((room, tag_id)): Path<(String, i64)>,
) -> impl IntoResponse {
    match state.registry.store().delete_tag(&room, tag_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response("Failed to delete tag", e),
    }
}

/// GET /api/rooms/:room/snapshots - List named snapshots
async fn list_snapshots(
    State(state): State<ApiState>,
    Path(room): Path<String>,
) -> impl IntoResponse {
    match state.registry.store().list_named_snapshots(&room) {
        Ok(snapshots) => Json(snapshots).into_response(),
        Err(e) => error_response("Failed to list snapshots", e),
    }
}

/// POST /api/rooms/:room/snapshots - Save the current state under a name
async fn create_snapshot(
    State(state): State<ApiState>,
    Path(room): Path<String>,
    Json(req): Json<CreateSnapshotRequest>,
) -> impl IntoResponse {
    let store = state.registry.store();

    let snapshot_state = match state.registry.get(&room).await {
        Some(live) => {
            if let Err(e) = live.flush(true) {
                return error_response("Failed to flush room before snapshot", e);
            }
            live.full_state()
        }
        None => match store.load_at(&room, None) {
            Ok(doc) => doc.encode_state_as_update(),
            Err(e) => return error_response("Failed to load room", e),
        },
    };

    let created_by = req.created_by.as_deref().unwrap_or("anonymous");
    match store.create_named_snapshot(&room, &req.name, &snapshot_state, created_by) {
        Ok(snapshot_id) => {
            (StatusCode::CREATED, Json(SnapshotCreatedResponse { snapshot_id })).into_response()
        }
        Err(e) => error_response("Failed to create snapshot", e),
    }
}

/// POST /api/rooms/:room/snapshots/:snapshot_id/restore - Reset the room to
/// a named snapshot
async fn restore_snapshot(
    State(state): State<ApiState>,
    Path((room, snapshot_id)): Path<(String, i64)>,
) -> impl IntoResponse {
    if let Err(e) = state.registry.flush_room(&room).await {
        return error_response("Failed to flush room before restore", e);
    }

    match state.registry.store().restore_named_snapshot(&room, snapshot_id) {
        Ok(new_version_id) => {
            state.registry.evict_for_reset(&room, new_version_id).await;
            Json(ResetResponse { new_version_id }).into_response()
        }
        Err(e) => error_response("Restore failed", e),
    }
}
