//! Scheduled post endpoints (/posts/*)

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::AuthUser;
use crate::AppState;
use crate::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::models::{Platform, PostStatus};
use crate::platforms::PlatformOptions;
use crate::services::error::PublishError;
use crate::services::publisher::{
    CreatePost, EditReport, MetadataEdit, PostDetails, PublishReport, ScheduleReport,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/posts", post(create_post).get(list_posts))
        .route("/posts/{id}", get(get_post))
        .route("/posts/{id}/publish", post(publish))
        .route("/posts/{id}/platforms/{platform}/process", post(process_upload))
        .route("/posts/{id}/platforms/{platform}/retry", post(retry))
        .route("/posts/{id}/metadata", put(update_metadata))
        .route("/posts/{id}/schedule", put(update_schedule))
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Serialize)]
struct CreatePostResponse {
    post_id: i64,
    scheduled_at: DateTime<Utc>,
    status: PostStatus,
    platforms: Vec<Platform>,
}

#[derive(Deserialize)]
struct PaginationQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize)]
struct PostListResponse {
    posts: Vec<PostDetails>,
    total: i64,
    limit: i64,
    offset: i64,
}

#[derive(Deserialize)]
struct PublishBody {
    blob_path: String,
    #[serde(default)]
    options: PlatformOptions,
}

#[derive(Deserialize)]
struct RetryBody {
    /// A freshly uploaded blob; the post's retained video is used otherwise
    #[serde(default)]
    blob_path: Option<String>,
    #[serde(default)]
    options: PlatformOptions,
}

#[derive(Deserialize)]
struct ScheduleBody {
    scheduled_at: String,
    timezone: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /posts - Create a scheduled post with one pending row per platform
async fn create_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<CreatePost>,
) -> Result<(StatusCode, Json<CreatePostResponse>), PublishError> {
    let details = state.publisher.create_post(user_id, req).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatePostResponse {
            post_id: details.post.id,
            scheduled_at: details.post.scheduled_at,
            status: details.post.status,
            platforms: details.platforms.iter().map(|p| p.platform).collect(),
        }),
    ))
}

/// GET /posts - List posts, newest schedule first
async fn list_posts(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PostListResponse>, PublishError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let (posts, total) = state.publisher.list_posts(user_id, limit, offset).await?;

    Ok(Json(PostListResponse {
        posts,
        total,
        limit,
        offset,
    }))
}

/// GET /posts/:id
async fn get_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(post_id): Path<i64>,
) -> Result<Json<PostDetails>, PublishError> {
    Ok(Json(state.publisher.get_post(user_id, post_id).await?))
}

/// POST /posts/:id/publish - Upload the stored video to every pending platform
async fn publish(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(post_id): Path<i64>,
    Json(body): Json<PublishBody>,
) -> Result<Json<PublishReport>, PublishError> {
    let report = state
        .publisher
        .publish_to_all(user_id, post_id, &body.blob_path, &body.options)
        .await?;
    Ok(Json(report))
}

/// POST /posts/:id/platforms/:platform/process - Upload the stored video to one platform
async fn process_upload(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((post_id, platform)): Path<(i64, Platform)>,
    Json(body): Json<PublishBody>,
) -> Result<Json<PublishReport>, PublishError> {
    let report = state
        .publisher
        .process_upload(user_id, post_id, platform, &body.blob_path, &body.options)
        .await?;
    Ok(Json(report))
}

/// POST /posts/:id/platforms/:platform/retry
async fn retry(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((post_id, platform)): Path<(i64, Platform)>,
    Json(body): Json<RetryBody>,
) -> Result<Json<PublishReport>, PublishError> {
    let report = state
        .publisher
        .retry(user_id, post_id, platform, body.blob_path.as_deref(), &body.options)
        .await?;
    Ok(Json(report))
}

/// PUT /posts/:id/metadata - Edit title/description/tags here and on the platforms
async fn update_metadata(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(post_id): Path<i64>,
    Json(edit): Json<MetadataEdit>,
) -> Result<Json<EditReport>, PublishError> {
    Ok(Json(state.publisher.update_metadata(user_id, post_id, edit).await?))
}

/// PUT /posts/:id/schedule
async fn update_schedule(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(post_id): Path<i64>,
    Json(body): Json<ScheduleBody>,
) -> Result<Json<ScheduleReport>, PublishError> {
    let report = state
        .publisher
        .update_schedule(user_id, post_id, &body.scheduled_at, &body.timezone)
        .await?;
    Ok(Json(report))
}
