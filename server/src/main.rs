// Pagesmith server
// HTTP entry point: wires the workspace store, generation backend,
// preview bridges, and publish service behind the axum router.

mod routes;
mod state;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use pagesmith_lib::services::generation::stream::StreamManager;
use pagesmith_lib::services::generation::usage::TokenUsageRecorder;
use pagesmith_lib::services::generation::GeminiClient;
use pagesmith_lib::services::{GenerationBackend, PublishService, WorkspaceStore};
use pagesmith_lib::utils::database;

use state::AppState;

const DEFAULT_PORT: u16 = 4173;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pagesmith_lib=debug")),
        )
        .init();

    let db = match database::open_default_database() {
        Ok(db) => db,
        Err(e) => {
            log::error!("[server] failed to open database: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("[server] database at {}", db.path().display());

    let generator: Option<Arc<dyn GenerationBackend>> = match GeminiClient::from_env() {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            log::warn!("[server] generation disabled: {}", e);
            None
        }
    };

    let app_state = Arc::new(AppState {
        store: WorkspaceStore::new(db.clone()),
        publisher: PublishService::new(db.clone()),
        generator,
        token_sink: Arc::new(TokenUsageRecorder::new(db)),
        streams: StreamManager::new(),
        bridges: Mutex::new(HashMap::new()),
        progress: RwLock::new(HashMap::new()),
    });

    let router = routes::router(app_state);

    let port = std::env::var("PAGESMITH_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("[server] failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    log::info!("[server] listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        log::error!("[server] server error: {}", e);
    }

    log::info!("[server] stopped");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    log::info!("[server] shutdown requested");
}
