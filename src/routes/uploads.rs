//! Video blob endpoints (/uploads)

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::AuthUser;
use crate::AppState;
use crate::services::error::PublishError;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/uploads", post(upload_video).delete(delete_video))
}

#[derive(Serialize)]
struct UploadResponse {
    blob_path: String,
    bytes: usize,
}

#[derive(Deserialize)]
struct DeleteQuery {
    path: String,
}

/// POST /uploads - Store the raw request body as a video blob
async fn upload_video(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), PublishError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");

    let bytes = body.len();
    let blob_path = state.publisher.upload_to_storage(user_id, content_type, body).await?;

    Ok((StatusCode::CREATED, Json(UploadResponse { blob_path, bytes })))
}

/// DELETE /uploads?path= - Discard a stored video
async fn delete_video(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, PublishError> {
    if state.publisher.delete_blob(user_id, &query.path).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(PublishError::NotFound("Video not found".to_string()))
    }
}
