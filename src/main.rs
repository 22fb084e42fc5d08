//! # Kani TTS Server - Main Application Entry Point
//!
//! Sets up the actix-web server that hosts the WebSocket TTS endpoint.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: The entire server is asynchronous; generation runs on blocking threads
//! - **Result<T, E>**: Startup errors propagate with `?` and end the process with a message
//! - **Arc**: The engine, config and metrics are shared by every worker and connection
//!
//! ## Startup Sequence:
//! 1. Load `.env`, set up logging, load and validate configuration
//! 2. Build the TTS engine for the configured backend
//! 3. Optionally warm the engine up so the first request does not pay for loading
//! 4. Serve until SIGINT/SIGTERM, then stop gracefully and shut the engine down

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use kani_tts_server::config::AppConfig;
use kani_tts_server::state::AppState;
use kani_tts_server::synthesis::{engine::TtsEngine, loader_from_config};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // .ok() means "ignore errors" - it's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting kani-tts-server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} (backend: {}, {} Hz)",
        config.server.host, config.server.port, config.generator.backend, config.audio.sample_rate
    );

    let engine = Arc::new(TtsEngine::new(loader_from_config(&config)?));

    if config.server.warm_up {
        // A failed warm-up is not fatal: the first request retries initialization
        if let Err(err) = engine.ensure_initialized().await {
            warn!("TTS warm-up failed: {}", err);
        }
    }

    let app_state = AppState::new(config.clone(), engine.clone());
    let bind_addr = config.bind_addr();

    info!("Starting HTTP server on {}", bind_addr);
    info!("WebSocket endpoint: ws://{}/ws", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(kani_tts_server::configure_routes)
    })
    .bind(&bind_addr)?
    // Signals are handled below so the engine can be shut down first
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            // Refuse new connections and requests, then let open ones finish
            engine.shutdown();
            server_handle.stop(true).await;
        }
    }

    engine.shutdown();
    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "kani_tts_server=trace")
/// - If not set, defaults to "kani_tts_server=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kani_tts_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve when SIGINT or SIGTERM arrives.
///
/// If the handlers cannot be installed the error is logged and plain Ctrl+C is used.
#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let sigterm = signal(SignalKind::terminate());
    let sigint = signal(SignalKind::interrupt());

    match (sigterm, sigint) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }
        (Err(err), _) | (_, Err(err)) => {
            error!("Failed to install signal handlers: {}", err);
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C"),
                Err(_) => std::future::pending::<()>().await,
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C");
    } else {
        std::future::pending::<()>().await;
    }
}
