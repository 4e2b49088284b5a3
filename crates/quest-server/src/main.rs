mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use quest_api::{ApiSettings, AppStateInner};
use quest_core::ids::IdAllocator;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quest=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(quest_db::Database::open(&config.db_path)?);
    let ids = Arc::new(IdAllocator::new(config.node_id)?);

    let state = AppStateInner::new(
        db,
        ids,
        ApiSettings {
            jwt_secret: config.jwt_secret.clone(),
            storage_timeout: config.storage_timeout,
            upload_dir: config.upload_dir.clone(),
        },
    );

    let app = quest_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Quest server listening on {} (node {})", addr, config.node_id);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
