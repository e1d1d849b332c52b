use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::Method, response::Json, routing::get, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod config;
mod database;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::AppConfig;
use database::postgres::PgTransactionStore;
use services::pesaflux::PesaFluxService;
use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let store = match PgTransactionStore::connect(&config.database_url).await {
        Ok(store) => {
            tracing::info!("connected to transaction store");
            store
        }
        Err(e) => {
            tracing::error!("failed to connect to transaction store: {}", e);
            std::process::exit(1);
        }
    };

    let gateway = match PesaFluxService::new(&config) {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!("failed to initialize gateway client: {}", e);
            std::process::exit(1);
        }
    };

    let app_state = AppState::new(Arc::new(store), Arc::new(gateway));
    let app = build_router(app_state);
    start_server(app, &config).await;
}

fn build_router(app_state: AppState) -> Router {
    // The checkout form is served from another origin; preflights are
    // answered by the CORS layer.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .nest("/api/payments", routes::payments::payment_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router, config: &AppConfig) {
    let addr = SocketAddr::new(config.host, config.port);

    tracing::info!("server starting on {}", addr);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("server error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!("failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}

async fn root_handler() -> &'static str {
    "PesaFlux checkout API"
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
