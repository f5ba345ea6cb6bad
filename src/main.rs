//! Suprema Gateway: authenticated HTTP gateway in front of a read-only tabular data
//! store, guarded by a hierarchical rate-limit and manual-block engine.

use axum::{middleware, routing::{get, post}, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod cell;
mod config;
mod counter_store;
mod data_store;
mod decision;
mod error;
mod gate;
mod handlers;
mod models;
mod policy_cache;
mod policy_store;
mod resolver;
mod state;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let bind_addr = config.bind_addr.clone();
    let http_timeout = config.http_timeout;

    let state = AppState::new(config).await?;

    let app = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/login", post(handlers::login))
        .route("/:dataset", get(handlers::dataset))
        .layer(middleware::from_fn_with_state(state.clone(), gate::gate))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(http_timeout))
        .with_state(state);

    tracing::info!(addr = %bind_addr, "suprema-gateway listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
