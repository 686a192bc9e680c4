//! Topic Voting Backend
//!
//! Users register, log in, post short topics and vote on them. SQLite holds
//! users, topics, vote edges and sessions.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod models;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Topic Voting Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!("Session lifetime: {}h", config.session_ttl.num_hours());

    if !config.secure_cookies {
        tracing::warn!("Session cookies are not marked Secure (TOPICS_SECURE_COOKIES)");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let purged = repo.purge_expired_sessions().await?;
    if purged > 0 {
        tracing::info!("Purged {} expired sessions", purged);
    }

    let state = AppState {
        repo,
        config: Arc::new(config.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app_routes = Router::new()
        // Accounts
        .route("/register", post(api::register))
        .route("/login", post(api::login))
        .route("/logout", get(api::logout))
        // Topics
        .route("/", get(api::list_topics))
        .route("/topics", get(api::list_my_topics))
        .route("/topics/{id}", get(api::get_topic))
        .route("/users/{id}/topics", get(api::list_user_topics))
        .route("/add_topic", post(api::add_topic))
        // Votes
        .route("/upvote/{topic_id}", get(api::upvote))
        .route("/downvote/{topic_id}", get(api::downvote));

    // Health check (no session involved)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(app_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
