use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use escalada::{api, broadcast, config::AppConfig, sink::HttpRankingSink, state::AppState};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "escalada=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Escalada...");

    let config = AppConfig::from_env();
    let port = config.port;
    let snapshot_path = config.snapshot_path.clone();

    let mut state = AppState::with_config(config.clone());
    match &config.ranking_url {
        Some(url) => match HttpRankingSink::new(url.clone(), config.ranking_timeout) {
            Ok(sink) => {
                tracing::info!("Rankings will be saved to {}", url);
                state = state.with_ranking_sink(Arc::new(sink));
            }
            Err(e) => tracing::warn!(
                "Failed to initialize ranking service: {}. Rankings will not be saved.",
                e
            ),
        },
        None => tracing::warn!("ESCALADA_RANKING_URL not set, rankings will not be saved"),
    }
    let state = Arc::new(state);

    if let Some(path) = &snapshot_path {
        match state.load_snapshot(path).await {
            Ok(count) => tracing::info!("Restored {} boxes from {}", count, path.display()),
            Err(e) => tracing::error!("Failed to restore {}: {}", path.display(), e),
        }
    }

    // Spawn background task for stopping expired box timers
    broadcast::spawn_timer_watcher(state.clone());

    let app = api::router(state.clone())
        .fallback_service(ServeDir::new("static"))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await;
    if let Err(e) = served {
        tracing::error!("Server error: {}", e);
    }

    if let Some(path) = &snapshot_path {
        match state.save_snapshot(path).await {
            Ok(()) => tracing::info!("Saved boxes to {}", path.display()),
            Err(e) => tracing::error!("Failed to save {}: {}", path.display(), e),
        }
    }
}
