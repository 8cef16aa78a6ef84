//! HTTP surface
//!
//! A thin axum adapter over [`polyrun::Runner`]: it parses requests, hands
//! them to the pipeline and serializes the outcome. No execution logic
//! lives here.

use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use polyrun::Runner;
use tokio::net::TcpListener;
use tracing::info;

use crate::server::request_log::RequestLogger;

mod error;
mod request_log;
mod routes;

#[derive(Debug, Clone)]
pub struct AppState {
    runner: Runner,
}

/// Build the router with its body limit and request logging
pub fn router(runner: Runner, logger: RequestLogger) -> Router {
    let max_upload = runner.config().server.max_upload_bytes;
    Router::new()
        .route("/compile", post(routes::compile))
        .route("/install", post(routes::install))
        .route("/languages", get(routes::languages))
        .route("/healthz", get(routes::health))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(middleware::from_fn_with_state(
            logger,
            request_log::log_requests,
        ))
        .with_state(AppState { runner })
}

/// Serve until Ctrl-C
pub async fn serve(runner: Runner, bind_addr: SocketAddr) -> anyhow::Result<()> {
    runner
        .store()
        .prepare()
        .await
        .context("failed to prepare staging directory")?;

    let app = router(runner, RequestLogger::default());
    let listener = TcpListener::bind(bind_addr)
        .await
        .context("failed to bind listener")?;

    info!(addr = %bind_addr, "polyrun listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
