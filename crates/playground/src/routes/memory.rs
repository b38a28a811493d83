// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory route directory for testing.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{Result, Route, RouteDirectory, RouteError, RouteSpec};

#[derive(Debug, Clone)]
struct Installed {
    route: Route,
    rendered: String,
}

/// Route directory kept in memory.
///
/// Upstreams are read from `reverse_proxy` directives in the rendered template.
#[derive(Default)]
pub struct MemoryRouteDirectory {
    routes: Mutex<BTreeMap<String, Installed>>,
    failing_apps: Mutex<HashSet<String>>,
    add_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    reset_calls: AtomicUsize,
    /// If true, every operation fails
    pub fail_all: AtomicBool,
}

impl MemoryRouteDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory where every operation fails.
    pub fn always_failing() -> Self {
        let routes = Self::new();
        routes.fail_all.store(true, Ordering::SeqCst);
        routes
    }

    /// Make `add_route` fail for one app name.
    pub fn fail_app(&self, app_name: &str) {
        self.lock_failing().insert(app_name.to_string());
    }

    /// Number of `add_route` calls.
    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    /// Number of `remove_route` calls.
    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    /// Number of `reset_to_default` calls.
    pub fn reset_calls(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }

    /// Installed app names, sorted.
    pub fn app_names(&self) -> Vec<String> {
        self.lock_routes().keys().cloned().collect()
    }

    /// Rendered template installed for an app name.
    pub fn rendered(&self, app_name: &str) -> Option<String> {
        self.lock_routes().get(app_name).map(|r| r.rendered.clone())
    }

    fn lock_routes(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Installed>> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_failing(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.failing_apps.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(RouteError::Unavailable("memory directory failing".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RouteDirectory for MemoryRouteDirectory {
    fn directory_type(&self) -> &'static str {
        "memory"
    }

    async fn add_route(&self, spec: &RouteSpec) -> Result<()> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.lock_failing().contains(spec.app_name()) {
            return Err(RouteError::Unavailable(format!(
                "route for '{}' rejected",
                spec.app_name()
            )));
        }

        let rendered = spec.render()?;
        let route = Route {
            paths: vec![spec.path()],
            upstreams: reverse_proxy_upstreams(&rendered),
        };
        self.lock_routes()
            .insert(spec.app_name().to_string(), Installed { route, rendered });
        Ok(())
    }

    async fn remove_route(&self, app_name: &str) -> Result<()> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.lock_routes().remove(app_name);
        Ok(())
    }

    async fn reset_to_default(&self) -> Result<()> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.lock_routes().clear();
        Ok(())
    }

    async fn find_route(&self, app_name: &str) -> Result<Option<Route>> {
        self.check_available()?;
        Ok(self.lock_routes().get(app_name).map(|r| r.route.clone()))
    }

    async fn health_check(&self) -> Result<()> {
        self.check_available()
    }
}

/// Arguments of every `reverse_proxy` directive.
fn reverse_proxy_upstreams(rendered: &str) -> Vec<String> {
    rendered
        .lines()
        .filter_map(|line| line.trim().strip_prefix("reverse_proxy"))
        .flat_map(|rest| {
            rest.split_whitespace()
                .take_while(|token| *token != "{")
                .filter(|token| !token.starts_with('/') && !token.starts_with('@'))
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateVars;

    fn spec(name: &str, template: &str) -> RouteSpec {
        RouteSpec {
            app_id: 1,
            vars: TemplateVars {
                app_name: name.to_string(),
                container_name: "app-1".to_string(),
                port: 8080,
            },
            template: template.to_string(),
        }
    }

    #[tokio::test]
    async fn test_add_and_find_route() {
        let routes = MemoryRouteDirectory::new();
        routes
            .add_route(&spec("demo", "reverse_proxy {{.ContainerName}}:{{.Port}}"))
            .await
            .unwrap();

        let route = routes.find_route("demo").await.unwrap().unwrap();
        assert_eq!(route.paths, vec!["/demo*"]);
        assert_eq!(route.upstreams, vec!["app-1:8080"]);
    }

    #[tokio::test]
    async fn test_add_replaces_existing_route() {
        let routes = MemoryRouteDirectory::new();
        routes.add_route(&spec("demo", "reverse_proxy a:1")).await.unwrap();
        routes.add_route(&spec("demo", "reverse_proxy b:2")).await.unwrap();

        assert_eq!(routes.app_names(), vec!["demo"]);
        let route = routes.find_route("demo").await.unwrap().unwrap();
        assert_eq!(route.upstreams, vec!["b:2"]);
    }

    #[tokio::test]
    async fn test_remove_missing_route_succeeds() {
        let routes = MemoryRouteDirectory::new();
        routes.remove_route("nothing").await.unwrap();
        assert_eq!(routes.remove_calls(), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_routes() {
        let routes = MemoryRouteDirectory::new();
        routes.add_route(&spec("a", "reverse_proxy x:1")).await.unwrap();
        routes.reset_to_default().await.unwrap();
        assert!(routes.app_names().is_empty());
    }

    #[tokio::test]
    async fn test_failing_app() {
        let routes = MemoryRouteDirectory::new();
        routes.fail_app("bad");
        assert!(routes.add_route(&spec("bad", "reverse_proxy x:1")).await.is_err());
        routes.add_route(&spec("good", "reverse_proxy x:1")).await.unwrap();
        assert_eq!(routes.app_names(), vec!["good"]);
    }

    #[test]
    fn test_reverse_proxy_upstreams() {
        let rendered = "handle_path /x/* {\n  reverse_proxy app-2:3000 app-3:3000 {\n    lb_policy first\n  }\n}";
        assert_eq!(
            reverse_proxy_upstreams(rendered),
            vec!["app-2:3000", "app-3:3000"]
        );
        assert_eq!(
            reverse_proxy_upstreams("reverse_proxy /api/* app-4:80"),
            vec!["app-4:80"]
        );
    }
}
