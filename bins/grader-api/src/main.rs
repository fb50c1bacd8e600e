mod error;
mod handlers;
mod language_config;
mod queue;
mod routes;

use anyhow::Context;
use axum::Router;
use grader_common::config::{self, env_or};
use grader_common::redis::RedisStore;
use grader_common::store::SubmissionStore;
use language_config::LanguageRegistry;
use queue::{JobQueue, RedisQueue};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub struct AppState {
    pub store: Arc<dyn SubmissionStore>,
    pub queue: Arc<dyn JobQueue>,
    pub languages: LanguageRegistry,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Grader API booting...");

    let languages_file = env_or("LANGUAGES_FILE", "config/languages.json".to_string())?;
    let languages = LanguageRegistry::load_from_file(&languages_file)
        .with_context(|| format!("Failed to load language registry from {}", languages_file))?;
    info!("Enabled languages: {:?}", languages.enabled_languages());

    // Connect to Redis
    let redis_url = config::redis_url();
    let store = RedisStore::connect(&redis_url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis: {}", redis_url);

    let state = Arc::new(AppState {
        queue: Arc::new(RedisQueue::new(store.connection())),
        store: Arc::new(store),
        languages,
    });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let addr = env_or("API_ADDR", "0.0.0.0:3000".to_string())?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
