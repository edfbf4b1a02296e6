use axum::{Json, extract::State, http::StatusCode, response::Response};
use serde::Serialize;
use serde_json::json;

use super::{SERVICE_NAME, envelope::Envelope, webhook::ProcessingType};
use crate::app::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
pub(crate) struct HealthReport {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "healthy",
        service: SERVICE_NAME,
        version: VERSION,
        uptime_seconds: state.uptime_seconds(),
    })
}

pub(crate) async fn status(State(state): State<AppState>) -> Response {
    let processing_types: Vec<&str> = ProcessingType::ALL.iter().map(|t| t.as_str()).collect();
    Envelope::ok("Webhook service status")
        .with_data(json!({
            "service": SERVICE_NAME,
            "version": VERSION,
            "supported_processing_types": processing_types,
            "pending_sweep_available": state.scheduler().can_sweep(),
            "endpoints": [
                "/webhook/process - POST - Process a URL",
                "/webhook/pending - POST - Start a pending URL sweep",
                "/webhook/health - GET - Health check",
                "/webhook/status - GET - Service status",
                "/metrics - GET - Prometheus metrics"
            ]
        }))
        .respond(StatusCode::OK)
}
