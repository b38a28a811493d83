// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Playground - App Lifecycle Control Plane
//!
//! Declares containerized apps, builds them as devcontainers and publishes
//! each one under `/<app_name>` through a Caddy reverse proxy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      HTTP clients (/_app API)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       playground (This Crate)                           │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐                 │
//! │  │   Handlers   │──▶│ Orchestrator │──▶│    Build     │                 │
//! │  │   (axum)     │   │              │   │ Coordinator  │                 │
//! │  └──────────────┘   └──────┬───────┘   └──────────────┘                 │
//! │                            │            ┌──────────────┐                │
//! │                            │            │  Reconciler  │ (startup)      │
//! │                            │            └──────┬───────┘                │
//! └────────────────────────────┼───────────────────┼────────────────────────┘
//!          ┌───────────────────┼───────────────────┼───────┐
//!          ▼                   ▼                   ▼       ▼
//! ┌────────────────┐  ┌────────────────┐  ┌─────────────────────────┐
//! │   AppStore     │  │ RuntimeDriver  │  │    RouteDirectory       │
//! │  (PostgreSQL)  │  │ (docker +      │  │  (Caddy admin API)      │
//! │                │  │  devcontainer) │  │                         │
//! └────────────────┘  └────────────────┘  └─────────────────────────┘
//! ```
//!
//! # HTTP API
//!
//! | Method & Path | Description |
//! |---------------|-------------|
//! | `POST /_app` | Create an app (201, status `pending`) |
//! | `GET /_app` | List apps with live container status |
//! | `GET /_app/{id}` | Get an app with live container status |
//! | `PUT /_app/{id}` | Update an app and rebuild it |
//! | `DELETE /_app/{id}` | Tear down and delete an app (204) |
//! | `POST /_app/{id}/start` | Start, or recreate a missing container (202) |
//! | `POST /_app/{id}/stop` | Stop the container |
//! | `GET /_app/{id}/logs?tail=N` | Container logs |
//! | `GET /_app/logs?tail=N` | Host service logs |
//! | `GET /_app/health` | State store liveness |
//! | `GET /` | Management UI page |
//!
//! # App Status State Machine
//!
//! ```text
//!                 create / update / start-on-missing
//!                              │
//!                              ▼
//!                        ┌─────────┐
//!            ┌───────────│ PENDING │───────────┐
//!            │           └─────────┘           │
//!   build+route ok              ▲        build or route
//!            │                  │            failed
//!            ▼                  │              ▼
//!       ┌────────┐     update   │         ┌────────┐
//!       │ ACTIVE │──────────────┴─────────│ FAILED │
//!       └────────┘                        └────────┘
//! ```
//!
//! `status` is orchestration success only. Container liveness is reported
//! separately as `container_status` on read paths.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PORT` | `8080` | HTTP port |
//! | `DATABASE_URL` | - | PostgreSQL URL; assembled from `DB_*` when unset |
//! | `CADDY_HOST` / `CADDY_PORT` | `app` / `2019` | Caddy admin endpoint |
//! | `APPS_BASE_DIR` | `/workspace/apps` | Build context root |
//! | `PLAYGROUND_CONTAINER` | `playground` | Host container name |
//! | `PLAYGROUND_NETWORK` | `playground_playground-apps` | App network |
//! | `BUILD_TIMEOUT_SECS` | `1800` | Upper bound for one build |
//!
//! See [`config::Config::from_env`] for the full list.

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for playground operations.
pub mod error;

/// App model and request validation.
pub mod app;

/// Template rendering for build recipes and routes.
pub mod template;

/// Persistent app state.
pub mod store;

/// Container runtime drivers.
pub mod driver;

/// Reverse proxy route directories.
pub mod routes;

/// At-most-one in-flight build per app.
pub mod build_coordinator;

/// App lifecycle orchestration.
pub mod orchestrator;

/// Startup route reconciliation.
pub mod reconciler;

/// HTTP handlers.
pub mod handlers;

/// HTTP server.
pub mod server;

/// Embeddable runtime.
pub mod runtime;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{BuildOutcome, Orchestrator, StartOutcome};
pub use runtime::PlaygroundRuntime;
