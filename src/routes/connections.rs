//! Platform account connections (/connections/*)

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor};
use tracing::info;

use super::auth::AuthUser;
use crate::AppState;
use crate::models::Platform;
use crate::services::error::{LogErr, PublishError};

pub fn routes() -> Router<Arc<AppState>> {
    // Code exchange hits vendor token endpoints; keep it to a trickle per IP
    let rate_limit_config = GovernorConfigBuilder::default()
        .per_second(6)
        .burst_size(10)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("Failed to build rate limit config");

    let rate_limit_layer = GovernorLayer {
        config: rate_limit_config.into(),
    };

    Router::new()
        .route("/connections", get(list_connections))
        .route(
            "/connections/{platform}",
            post(connect_platform)
                .layer(rate_limit_layer)
                .delete(disconnect_platform),
        )
}

#[derive(Serialize)]
struct ConnectionSummary {
    platform: Platform,
    platform_user_id: Option<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ConnectRequest {
    code: String,
    redirect_uri: String,
}

/// GET /connections - Connected platforms, without credentials
async fn list_connections(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<ConnectionSummary>>, StatusCode> {
    let connections = state
        .connections
        .list_connections(user_id)
        .await
        .log_500("List connections error")?;

    Ok(Json(
        connections
            .into_iter()
            .map(|c| ConnectionSummary {
                platform: c.platform,
                platform_user_id: c.platform_user_id,
                expires_at: c.expires_at,
            })
            .collect(),
    ))
}

/// POST /connections/:platform - Exchange an OAuth authorization code and store the tokens
async fn connect_platform(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(platform): Path<Platform>,
    Json(req): Json<ConnectRequest>,
) -> Result<(StatusCode, Json<ConnectionSummary>), PublishError> {
    let connection = state
        .oauth
        .exchange_code(user_id, platform, &req.code, &req.redirect_uri)
        .await?;
    state.connections.upsert_connection(&connection).await?;

    info!(user_id, platform = %platform, "Connected platform account");
    Ok((
        StatusCode::CREATED,
        Json(ConnectionSummary {
            platform,
            platform_user_id: connection.platform_user_id,
            expires_at: connection.expires_at,
        }),
    ))
}

/// DELETE /connections/:platform
async fn disconnect_platform(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(platform): Path<Platform>,
) -> Result<StatusCode, StatusCode> {
    let deleted = state
        .connections
        .delete_connection(user_id, platform)
        .await
        .log_500("Delete connection error")?;

    if deleted {
        info!(user_id, platform = %platform, "Disconnected platform account");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
