mod handlers;
mod state;

use axum::http::{header, HeaderValue};
use axum::routing::get;
use axum::Router;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::policy::CountryPolicyTable;

pub fn build_router(config: Config) -> Router {
    let state = Arc::new(AppState {
        config,
        policies: CountryPolicyTable::builtin(),
    });

    Router::new()
        .route("/api/resolve", get(handlers::resolve))
        .route("/api/policy/{code}", get(handlers::policy))
        .route("/api/policies", get(handlers::policy_list))
        .route("/api/distance", get(handlers::distance))
        .layer(CorsLayer::permissive())
        // Location answers are per-caller and must not be shared by caches.
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

pub async fn start(host: &str, port: u16, config: Config) {
    let app = build_router(config);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!("Cannot bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    info!("Discovery locator listening on http://{}", addr);
    eprintln!("  Press Ctrl+C to stop.");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .unwrap_or_else(|e| {
            error!("Server error: {}", e);
            std::process::exit(1);
        });
}
