//! # Kani TTS Server
//!
//! A WebSocket text-to-speech service. Clients send text over `/ws` and receive either a
//! complete WAV file or a stream of PCM16 chunks as the audio is generated.
//!
//! ## Application Architecture:
//! - **protocol**: JSON envelope codec for the WebSocket messages
//! - **session**: Per-connection request state machine
//! - **bridge**: Blocking generation worker and its chunk channel
//! - **audio**: Chunk batching, PCM16 and WAV framing
//! - **synthesis**: Generator traits, the shared engine and the built-in backend
//! - **websocket**: actix actor that moves frames between the socket and the session
//! - **client**: Async client for the WebSocket protocol
//! - **config**, **error**, **state**, **health**: The usual service plumbing

pub mod audio;       // Audio chunks and framing (audio/ directory)
pub mod bridge;      // Worker-to-session generation bridge (bridge.rs)
pub mod client;      // WebSocket client (client.rs)
pub mod config;      // Configuration management (config.rs)
pub mod error;       // Error handling types (error.rs)
pub mod health;      // Health check endpoints (health.rs)
pub mod protocol;    // Wire codec (protocol.rs)
pub mod session;     // Request state machine (session.rs)
pub mod state;       // Application state management (state.rs)
pub mod synthesis;   // Speech generation (synthesis/ directory)
pub mod websocket;   // WebSocket endpoint (websocket.rs)

use actix_web::web;

/// Register every route of the service.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(websocket::tts_websocket))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics)),
        )
        // Also provide health check at root level for convenience
        .route("/health", web::get().to(health::health_check));
}
