pub mod config;
pub mod constants;
pub mod domain;
pub mod models;
pub mod platforms;
pub mod routes;
pub mod services;
pub mod storage;

#[cfg(test)]
mod test_support;

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::constants::MAX_VIDEO_UPLOAD_SIZE;
use crate::domain::ConnectionRepository;
use crate::platforms::oauth::OAuthClient;
use crate::services::publisher::Publisher;

pub struct AppState {
    pub jwt_secret: Vec<u8>,
    pub connections: Arc<dyn ConnectionRepository>,
    pub oauth: Arc<OAuthClient>,
    pub publisher: Arc<Publisher>,
}

/// The full HTTP application with shared middleware applied
pub fn build_app(state: Arc<AppState>) -> Router {
    routes::build_routes()
        .layer(DefaultBodyLimit::max(MAX_VIDEO_UPLOAD_SIZE))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
