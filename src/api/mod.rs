//! Read-only HTTP API over the rate store.
//!
//! Lookup problems (unknown action, unknown currency, bad date) come back as
//! HTTP 200 with an error body, so thin clients can switch on one shape.
//! Only the heartbeat uses the HTTP status line to signal trouble.

pub mod handlers;

use crate::config::Config;
use crate::errors::Result;
use crate::store::RateStore;
use axum::routing::get;
use axum::Router;
use log::info;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Shared state for API handlers.
pub struct ApiState {
    pub store: RateStore,
    pub config: Config,
}

/// Build the API router. Documented paths carry a trailing slash; the bare
/// forms are registered as aliases.
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/info", get(handlers::info))
        .route("/info/", get(handlers::info))
        .route("/currencies", get(handlers::currencies))
        .route("/currencies/", get(handlers::currencies))
        .route("/rates", get(handlers::rates_index))
        .route("/rates/", get(handlers::rates_index))
        .route("/rates/:currency_code", get(handlers::rates))
        .route("/rates/:currency_code/", get(handlers::rates))
        .route("/rates/:currency_code/:import_date", get(handlers::rates_after))
        .route("/rates/:currency_code/:import_date/", get(handlers::rates_after))
        .route(
            "/rates/:currency_code/:import_date/:start_date",
            get(handlers::rates_from),
        )
        .route(
            "/rates/:currency_code/:import_date/:start_date/",
            get(handlers::rates_from),
        )
        .route(
            "/rates/:currency_code/:import_date/:start_date/:end_date",
            get(handlers::rates_between),
        )
        .route(
            "/rates/:currency_code/:import_date/:start_date/:end_date/",
            get(handlers::rates_between),
        )
        .route("/heartbeat", get(handlers::heartbeat))
        .route("/heartbeat/", get(handlers::heartbeat))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until the process is stopped.
pub async fn serve(state: Arc<ApiState>) -> Result<()> {
    let address = format!("{}:{}", state.config.server_host, state.config.server_port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!("Serving the rates API on {}", address);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
