// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Route directory - the reverse proxy's route table.
//!
//! Each app owns one route matching `/<app_name>*`, whose handler is the
//! app's rendered routing template. The proxy's table is volatile, so the
//! [`Reconciler`](crate::reconciler::Reconciler) rebuilds it at startup.

pub mod caddy;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::app::{App, AppId};
use crate::template::{self, TemplateError, TemplateVars};

pub use caddy::{CaddyConfig, CaddyRouteDirectory};
pub use memory::MemoryRouteDirectory;

/// Errors from route directory operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RouteError {
    /// Routing template could not be rendered.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The proxy rejected the routing template.
    #[error("Proxy rejected config for '{app_name}': {message}")]
    Adapt {
        /// App whose config was rejected
        app_name: String,
        /// Proxy message
        message: String,
    },

    /// The proxy admin API returned an error status.
    #[error("Proxy admin API {method} {path} returned {status}: {body}")]
    Api {
        method: &'static str,
        path: String,
        status: u16,
        body: String,
    },

    /// The proxy could not be reached.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The proxy returned something unexpected.
    #[error("Unexpected proxy response: {0}")]
    Unexpected(String),

    /// The directory is unavailable.
    #[error("Route directory unavailable: {0}")]
    Unavailable(String),
}

/// Result type for route operations.
pub type Result<T> = std::result::Result<T, RouteError>;

/// What to install for one app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    /// Owning app
    pub app_id: AppId,
    /// Template variables
    pub vars: TemplateVars,
    /// Routing template source
    pub template: String,
}

impl RouteSpec {
    /// Route spec for an app's current record.
    pub fn for_app(app: &App) -> Self {
        Self {
            app_id: app.id,
            vars: app.template_vars(),
            template: app.caddy_config.clone(),
        }
    }

    /// App name.
    pub fn app_name(&self) -> &str {
        &self.vars.app_name
    }

    /// Path pattern the route matches.
    pub fn path(&self) -> String {
        route_path(&self.vars.app_name)
    }

    /// Render the routing template.
    pub fn render(&self) -> std::result::Result<String, TemplateError> {
        template::render("caddy_config", &self.template, &self.vars)
    }
}

/// Path pattern for an app name.
pub fn route_path(app_name: &str) -> String {
    format!("/{}*", app_name)
}

/// An installed route as reported by the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    /// Matched paths
    pub paths: Vec<String>,
    /// Upstream dial addresses
    pub upstreams: Vec<String>,
}

/// Trait for reverse-proxy route tables.
#[async_trait]
pub trait RouteDirectory: Send + Sync {
    /// Directory type identifier (e.g., "caddy", "memory")
    fn directory_type(&self) -> &'static str;

    /// Install or replace the route for `spec`'s app.
    ///
    /// Replacement is in place: either the old or the new route is current at
    /// every moment.
    async fn add_route(&self, spec: &RouteSpec) -> Result<()>;

    /// Remove the route for an app name. Removing a missing route succeeds.
    async fn remove_route(&self, app_name: &str) -> Result<()>;

    /// Drop every app route, keeping only the system routes.
    async fn reset_to_default(&self) -> Result<()>;

    /// The route for an app name, if installed.
    async fn find_route(&self, app_name: &str) -> Result<Option<Route>>;

    /// Check that the proxy is reachable.
    async fn health_check(&self) -> Result<()>;
}
