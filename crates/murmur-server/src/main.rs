use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use murmur_server::{api, AppState, ServerConfig, SqliteStore};
use murmur_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,murmur_server=debug")),
        )
        .init();

    info!("Starting Murmur server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // Losing the store is fatal, so fail at startup rather than per request.
    let db = match config.database_path {
        Some(ref path) => {
            info!(path = %path.display(), "opening database");
            Database::open_at(path)?
        }
        None => Database::new()?,
    };
    let store = Arc::new(SqliteStore::new(db));

    let http_addr = config.http_addr;
    let state = AppState::new(config, store.clone(), store);

    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
