pub mod error;
pub mod routes;
pub mod scheduler;
pub mod state;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use renewal_core::config::{Config, WarnLevel};
use renewal_core::runtime::WorkflowRuntime;
use std::path::Path;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health::health))
        .route(
            "/api/v1/workflows/subscription/reminder",
            post(routes::workflows::trigger_reminder),
        )
        .route("/api/v1/workflows", get(routes::workflows::list_workflows))
        .route(
            "/api/v1/workflows/{subscription_id}",
            get(routes::workflows::get_workflow).delete(routes::workflows::cancel_workflow),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Open the runtime for `root`, recover interrupted runs and start the
/// scheduler. The returned state is ready to hand to `build_router`.
pub fn start(root: &Path) -> anyhow::Result<(AppState, Duration)> {
    let config = Config::load(root).context("loading config")?;
    for w in config.validate() {
        match w.level {
            WarnLevel::Error => tracing::error!("config: {}", w.message),
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
        }
    }

    let runtime = WorkflowRuntime::open(root, &config).context("opening run store")?;
    // The run store is held exclusively by this process, so any record still
    // marked running was left behind by a previous one.
    runtime.startup_recovery(Duration::ZERO, Utc::now())?;
    Ok((AppState::new(runtime), config.tick_interval()))
}

/// Start the reminder server on `port`.
pub async fn serve(root: &Path, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(root, listener).await
}

/// Start the reminder server on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when `port = 0` and
/// the OS picks a free port).
pub async fn serve_on(root: &Path, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let (app_state, interval) = start(root)?;
    let scheduler = scheduler::spawn(app_state.clone(), interval);
    // Drain anything already due before the first interval elapses.
    app_state.wake.notify_one();

    tracing::info!(
        tick_secs = interval.as_secs(),
        "renewal server listening on http://localhost:{actual_port}"
    );

    let result = axum::serve(listener, build_router(app_state)).await;
    scheduler.abort();
    result?;
    Ok(())
}
