use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use kagra_api::audit::AuditSink;
use kagra_api::config::{AppConfig, StoreBackend};
use kagra_api::logging::init_tracing;
use kagra_api::store::{EntityStore, MemoryStore, PgStore};
use kagra_api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config.server);
    tracing::info!(
        environment = config.environment.as_str(),
        backend = ?config.database.backend,
        "Starting KAGRA API"
    );

    let (store, sink): (Arc<dyn EntityStore>, Arc<dyn AuditSink>) = match config.database.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store)
        }
        StoreBackend::Postgres => {
            let store = Arc::new(
                PgStore::connect(&config.database)
                    .await
                    .context("failed to connect to database")?,
            );
            (store.clone(), store)
        }
    };

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::build(config, store, sink).context("failed to configure authentication")?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("KAGRA API listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("server error")?;

    Ok(())
}
