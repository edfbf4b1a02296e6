pub(crate) mod envelope;
pub(crate) mod health;
pub(crate) mod metrics;
pub(crate) mod webhook;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::app::AppState;

pub(crate) const SERVICE_NAME: &str = "wandr-webhook-service";

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/process", post(webhook::process))
        .route("/webhook/pending", post(webhook::trigger_pending))
        .route("/webhook/health", get(health::health))
        .route("/webhook/status", get(health::status))
        .route("/metrics", get(metrics::exporter))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
