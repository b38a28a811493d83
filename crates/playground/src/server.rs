// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP server for the management API.

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Result;
use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{self, SharedState};

/// Build the router: the UI page at `/` and the `/_app` API.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/_app", get(handlers::list_apps).post(handlers::create_app))
        .route("/_app/health", get(handlers::health))
        .route("/_app/logs", get(handlers::host_logs))
        .route(
            "/_app/{id}",
            get(handlers::get_app)
                .put(handlers::update_app)
                .delete(handlers::delete_app),
        )
        .route("/_app/{id}/start", post(handlers::start_app))
        .route("/_app/{id}/stop", post(handlers::stop_app))
        .route("/_app/{id}/logs", get(handlers::app_logs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: SharedState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr: SocketAddr = listener.local_addr()?;
    info!(addr = %local_addr, "Playground HTTP server starting");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(addr = %local_addr, "Playground HTTP server stopped");
    Ok(())
}
