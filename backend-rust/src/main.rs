mod config;
mod filter;
mod handlers;
mod ingest;
mod parser_client;
mod state;

use std::sync::Arc;

use anyhow::Context;
use otdr_simulator::PhysicsConfig;
use rand::rngs::StdRng;
use rand::SeedableRng;
use socketioxide::SocketIo;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use config::BackendConfig;
use handlers::{on_connect, AppState};
use ingest::{Ingestor, SharedStore};
use parser_client::ParserClient;
use state::StoreState;

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "otdr_backend=info,socketioxide=warn".into()),
        )
        .init();

    info!("OTDR trace backend starting...");

    let cfg = BackendConfig::default();
    let physics = PhysicsConfig::default();

    // Store, pre-populated with sample traces
    let store: SharedStore = Arc::new(RwLock::new(StoreState::with_samples(
        &physics,
        &mut StdRng::from_entropy(),
    )));

    let parser = match &cfg.parser_url {
        Some(url) => {
            info!("Uploads go to parser service at {url}");
            Some(ParserClient::new(url, cfg.parser_timeout).context("building parser client")?)
        }
        None => {
            info!("PARSER_URL not set, uploads are synthesized locally");
            None
        }
    };
    let ingestor = Arc::new(Ingestor::new(parser, physics, cfg.synth_delay));

    // Build Socket.IO layer
    let (socket_layer, io) = SocketIo::builder().build_layer();

    let store_sock = store.clone();
    io.ns("/", move |socket: socketioxide::extract::SocketRef| {
        let store = store_sock.clone();
        async move {
            on_connect(socket, store).await;
        }
    });

    // CORS: the viewer UI is served from a different origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = handlers::router(AppState { store, ingestor, io }, cfg.max_upload_bytes)
        .layer(socket_layer)
        .layer(cors);

    let addr = format!("0.0.0.0:{}", cfg.port);
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
