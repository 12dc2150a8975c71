//! # phyx-server: HTTP Service for Physical Plan Enumeration
//!
//! Exposes the enumerator and the physical search over JSON so a planner
//! front end, or a developer with `curl`, can ask what physical alternatives a
//! logical plan has and which one the search settles on.
//!
//! ## Endpoints
//!
//! - `GET  /health`    - Health check
//! - `POST /enumerate` - Candidate set of one node under one physical request
//! - `POST /optimize`  - Cheapest attached physical plan for the whole tree
//!
//! ## Configuration
//!
//! - `PHYX_ADDR`: listen address, `0.0.0.0:3000` by default.
//! - `PHYX_CONFIG`: optional JSON file with base session variables and driver
//!   knobs, see [`state::ServerConfig`].
//! - `RUST_LOG`: log filter, `phyx=debug` is always added.

mod error;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

fn router(state: Arc<state::AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/enumerate", post(routes::enumerate))
        .route("/optimize", post(routes::optimize))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let directive: Directive = "phyx=debug".parse()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .init();

    let config = state::ServerConfig::from_env()?;
    tracing::debug!(?config, "loaded configuration");
    let state = Arc::new(state::AppState::new(config));

    let addr = std::env::var("PHYX_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("phyx-server listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
