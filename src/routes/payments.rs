use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::handlers::payment_handlers;
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        // Health
        .route("/health", get(payments_health))
        // Checkout flow
        .route("/initiate", post(payment_handlers::initiate_payment))
        .route("/status", post(payment_handlers::check_payment_status))
        .route("/status/gateway", post(payment_handlers::gateway_status))
        // Gateway-facing webhook
        .route("/webhook", post(payment_handlers::payment_webhook))
}

async fn payments_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "payments",
        "timestamp": Utc::now().to_rfc3339(),
        "features": ["stk-push", "status-poll", "webhook"]
    }))
}
