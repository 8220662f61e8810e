//! `api` crate — HTTP surface of the engine.
//!
//! Exposes:
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows
//!   GET    /api/v1/workflows/:id
//!   POST   /api/v1/workflows/:id/execute
//!   POST   /api/v1/events/:name
//!   GET    /api/v1/executions
//!   GET    /api/v1/executions/:id
//!   GET    /api/v1/executions/:id/logs
//!   POST   /api/v1/executions/:id/pause
//!   POST   /api/v1/executions/:id/resume
//!   POST   /api/v1/executions/:id/cancel
//!   POST   /api/v1/approvals/:token
//!
//! Triggers respond `202 Accepted` as soon as the execution exists; the run
//! itself proceeds on the worker pool.

pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use engine::WorkflowExecutor;
use scheduler::WorkerPool;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<WorkflowExecutor>,
    pub workers: WorkerPool,
}

impl AppState {
    pub fn new(workers: WorkerPool) -> Self {
        Self { executor: workers.executor().clone(), workers }
    }
}

pub fn router(state: AppState) -> Router {
    use handlers::{approvals, events, executions, workflows};

    let api = Router::new()
        .route("/workflows", post(workflows::create).get(workflows::list))
        .route("/workflows/:id", get(workflows::get))
        .route("/workflows/:id/execute", post(executions::execute))
        .route("/events/:name", post(events::fire))
        .route("/executions", get(executions::list))
        .route("/executions/:id", get(executions::get))
        .route("/executions/:id/logs", get(executions::logs))
        .route("/executions/:id/pause", post(executions::pause))
        .route("/executions/:id/resume", post(executions::resume))
        .route("/executions/:id/cancel", post(executions::cancel))
        .route("/approvals/:token", post(approvals::decide));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(bind: SocketAddr, state: AppState, shutdown: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "HTTP API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests;
