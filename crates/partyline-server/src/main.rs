mod config;
mod routes;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use partyline_core::MentionParser;
use partyline_db::Database;
use partyline_gateway::ChannelHub;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "partyline=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let parser = MentionParser::with_blacklist(&config.blacklist)?;

    // Init database
    let db = Database::open(&config.db_path)?;
    let hub = ChannelHub::new(Arc::new(db), parser);

    let app = routes::router(hub)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Partyline server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
