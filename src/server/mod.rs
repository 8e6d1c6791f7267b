//! Model Service
//!
//! HTTP front of the inference dispatcher: `POST /transfer` and
//! `POST /examples`, both gated by the user allow-list.

pub mod auth;
pub mod handlers;
pub mod types;

use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;
use std::future::Future;
use tokio::net::TcpListener;

pub use handlers::{AppState, ServiceError, SharedState};

pub fn router(state: SharedState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/transfer", post(handlers::transfer))
        .route("/examples", post(handlers::examples))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

pub async fn serve<F>(
    listener: TcpListener,
    state: SharedState,
    max_body_bytes: usize,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!("Model service listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state, max_body_bytes))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("Model service stopped");
    Ok(())
}
