use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics.snapshot();
    let config = &state.config;
    let engine = &state.engine;

    let status = if engine.is_shutting_down() {
        "shutting_down"
    } else {
        "healthy"
    };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "kani-tts-server",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "tts": {
            "initialized": engine.is_initialized(),
            "backend": engine.backend_name().unwrap_or_else(|| config.generator.backend.clone()),
            "sample_rate": config.audio.sample_rate,
            "channels": config.audio.channels
        },
        "metrics": {
            "active_connections": metrics.active_connections,
            "total_requests": metrics.requests_total + metrics.stream_requests_total,
            "total_errors": metrics.errors_total,
            "error_rate": metrics.error_rate()
        },
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics.snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "connections": {
            "total": metrics.connections_total,
            "active": metrics.active_connections
        },
        "requests": {
            "full": metrics.requests_total,
            "streaming": metrics.stream_requests_total,
            "completed": metrics.completed_total,
            "errors": metrics.errors_total,
            "request_errors": metrics.request_errors_total,
            "error_rate": metrics.error_rate(),
            "errors_by_kind": metrics.errors_by_kind
        },
        "audio": {
            "chunks_sent": metrics.chunks_sent,
            "seconds_generated": metrics.audio_seconds,
            "realtime_factor": if uptime_seconds > 0 {
                metrics.audio_seconds / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "memory": get_memory_info()
    }))
}

#[cfg(target_os = "linux")]
fn get_memory_info() -> serde_json::Value {
    let pid = std::process::id();

    let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) else {
        return json!({ "available": false });
    };

    let mut vm_rss = 0;
    let mut vm_size = 0;
    for line in status.lines() {
        let kb = || {
            line.split_whitespace()
                .nth(1)
                .and_then(|kb| kb.parse::<u64>().ok())
                .unwrap_or(0)
                * 1024
        };
        if line.starts_with("VmRSS:") {
            vm_rss = kb();
        } else if line.starts_with("VmSize:") {
            vm_size = kb();
        }
    }

    json!({
        "resident_memory_bytes": vm_rss,
        "virtual_memory_bytes": vm_size,
        "available": true
    })
}

#[cfg(not(target_os = "linux"))]
fn get_memory_info() -> serde_json::Value {
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::synthesis::engine::TtsEngine;
    use crate::synthesis::tone::ToneLoader;
    use actix_web::{test, App};
    use std::sync::Arc;

    fn test_state() -> AppState {
        let config = AppConfig::default();
        let engine = Arc::new(TtsEngine::new(Arc::new(ToneLoader::from_config(&config))));
        AppState::new(config, engine)
    }

    #[actix_web::test]
    async fn test_health_reports_engine_state() {
        let state = test_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(crate::configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["tts"]["initialized"], false);
        assert_eq!(body["tts"]["backend"], "tone");

        state.engine.ensure_initialized().await.unwrap();
        state.metrics.connection_opened();

        let req = test::TestRequest::get().uri("/api/v1/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["tts"]["initialized"], true);
        assert_eq!(body["metrics"]["active_connections"], 1);
    }

    #[actix_web::test]
    async fn test_metrics_endpoint() {
        let state = test_state();
        state.metrics.request_received(true);
        state.metrics.error_reported("timeout_error", true);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(crate::configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["requests"]["streaming"], 1);
        assert_eq!(body["requests"]["errors_by_kind"]["timeout_error"], 1);
    }
}
