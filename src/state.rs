//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket connection.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Lets every connection hold the same engine, config and metrics
//! - **Cloning**: Cloning an `Arc` copies a pointer, not the data
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Many readers OR one writer at a time
//! - **Why needed**: Every connection updates the counters; health checks read them
//! - **Poisoning**: A thread that panics while holding the lock "poisons" it. Counters
//!   are still meaningful after such a panic, so we recover the guard instead of failing
//!
//! ## What Is Shared:
//! - **config**: Immutable after startup, so a plain `Arc<AppConfig>`
//! - **engine**: The one TTS engine, initialized at most once per process
//! - **metrics**: Counters behind an `RwLock`

use crate::config::AppConfig;
use crate::synthesis::engine::TtsEngine;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The state shared across all handlers.
///
/// ## Thread Safety Pattern:
/// Every field is either immutable (`config`, `start_time`) or internally synchronized
/// (`engine`, `metrics`), so `AppState` itself needs no lock and can be cloned freely
/// into each actix worker.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    pub engine: Arc<TtsEngine>,

    /// Service counters, updated by every connection
    pub metrics: Arc<ServiceMetrics>,

    /// When the server started (never changes)
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, engine: Arc<TtsEngine>) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            metrics: Arc::new(ServiceMetrics::default()),
            start_time: Instant::now(),
        }
    }

    /// Seconds since the server started.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// A point-in-time copy of the service counters.
///
/// ## Why these metrics matter:
/// - **active_connections**: Current load
/// - **requests / stream_requests**: Traffic split between full and streaming requests
/// - **errors_by_kind**: Which failure modes clients actually hit
/// - **audio_seconds**: Total audio delivered, the unit the service is really paid in
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub active_connections: u32,
    pub requests_total: u64,
    pub stream_requests_total: u64,
    pub completed_total: u64,
    /// Every error envelope, including ones for messages that never became a request
    pub errors_total: u64,
    /// Errors reported while handling a `tts_request` or `tts_stream_request`
    pub request_errors_total: u64,
    pub chunks_sent: u64,
    pub audio_seconds: f64,
    pub errors_by_kind: HashMap<String, u64>,
}

impl MetricsSnapshot {
    /// Fraction of requests that ended in an error report, always within [0, 1].
    pub fn error_rate(&self) -> f64 {
        let requests = self.requests_total + self.stream_requests_total;
        if requests == 0 {
            0.0
        } else {
            self.request_errors_total as f64 / requests as f64
        }
    }
}

/// Thread-safe service counters.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    inner: RwLock<MetricsSnapshot>,
}

impl ServiceMetrics {
    fn write(&self) -> RwLockWriteGuard<'_, MetricsSnapshot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, MetricsSnapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connection_opened(&self) {
        let mut metrics = self.write();
        metrics.connections_total += 1;
        metrics.active_connections += 1;
    }

    pub fn connection_closed(&self) {
        let mut metrics = self.write();
        metrics.active_connections = metrics.active_connections.saturating_sub(1);
    }

    pub fn request_received(&self, streaming: bool) {
        let mut metrics = self.write();
        if streaming {
            metrics.stream_requests_total += 1;
        } else {
            metrics.requests_total += 1;
        }
    }

    /// Record a request that delivered `audio_seconds` of audio.
    pub fn request_completed(&self, audio_seconds: f64) {
        let mut metrics = self.write();
        metrics.completed_total += 1;
        metrics.audio_seconds += audio_seconds;
    }

    pub fn chunk_sent(&self) {
        self.write().chunks_sent += 1;
    }

    /// Record one error report, keyed by `ServiceError::kind`.
    ///
    /// `during_request` is false for protocol errors on messages that were never requests.
    pub fn error_reported(&self, kind: &str, during_request: bool) {
        let mut metrics = self.write();
        metrics.errors_total += 1;
        if during_request {
            metrics.request_errors_total += 1;
        }
        *metrics.errors_by_kind.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.read().clone()
    }
}
