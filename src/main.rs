use google_cloud_storage::client::Storage;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crosspost::config::AppConfig;
use crosspost::constants::SWEEP_INTERVAL_SECS;
use crosspost::domain::{
    ConnectionRepository, MemoryConnectionRepository, MemoryPostRepository, PgConnectionRepository,
    PgPostRepository, PostRepository,
};
use crosspost::platforms::AdapterRegistry;
use crosspost::platforms::facebook::FacebookAdapter;
use crosspost::platforms::instagram::InstagramAdapter;
use crosspost::platforms::oauth::OAuthClient;
use crosspost::platforms::tiktok::TikTokAdapter;
use crosspost::platforms::youtube::YouTubeAdapter;
use crosspost::services::publisher::Publisher;
use crosspost::services::sweeper::run_status_sweeper;
use crosspost::services::tokens::TokenManager;
use crosspost::storage::{BlobStore, GcsBlobStore, LocalBlobStore};
use crosspost::{AppState, build_app};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "crosspost=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    let (connections, posts): (Arc<dyn ConnectionRepository>, Arc<dyn PostRepository>) =
        match &config.database_url {
            Some(database_url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(database_url)
                    .await
                    .expect("Failed to connect to database");

                sqlx::migrate!()
                    .run(&pool)
                    .await
                    .expect("Failed to run database migrations");

                (
                    Arc::new(PgConnectionRepository::new(pool.clone())),
                    Arc::new(PgPostRepository::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory repositories");
                (
                    Arc::new(MemoryConnectionRepository::new()),
                    Arc::new(MemoryPostRepository::new()),
                )
            }
        };

    let blobs: Arc<dyn BlobStore> = match &config.local_storage_path {
        Some(root) => {
            tracing::info!(path = %root.display(), "Using local video storage");
            Arc::new(LocalBlobStore::new(root.clone()))
        }
        None => {
            // GCS client uses GOOGLE_APPLICATION_CREDENTIALS env var
            let gcs = Storage::builder()
                .build()
                .await
                .expect("Failed to create GCS client");
            Arc::new(GcsBlobStore::new(gcs, config.bucket_name.clone()))
        }
    };

    let oauth = Arc::new(OAuthClient::new(config.youtube(), config.facebook(), config.tiktok()));
    let tokens = Arc::new(TokenManager::new(connections.clone(), oauth.clone()));

    let adapters = AdapterRegistry::new()
        .register(Arc::new(YouTubeAdapter::new(config.youtube(), tokens.clone())))
        .register(Arc::new(FacebookAdapter::new(config.facebook(), tokens.clone())))
        .register(Arc::new(InstagramAdapter::new(config.facebook(), tokens.clone())))
        .register(Arc::new(TikTokAdapter::new(config.tiktok(), tokens)));

    let publisher = Arc::new(Publisher::new(posts.clone(), blobs, adapters));

    let state = Arc::new(AppState {
        jwt_secret: config.jwt_secret.clone().into_bytes(),
        connections,
        oauth,
        publisher,
    });

    tokio::spawn(run_status_sweeper(posts, SWEEP_INTERVAL_SECS));

    let app = build_app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {}: {}", addr, e));

    tracing::info!("Listening on http://{}", addr);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("Server failed");
}
