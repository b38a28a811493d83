// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Caddy route directory.
//!
//! Talks to the Caddy admin API. Routing templates are Caddyfile snippets,
//! adapted to JSON with `POST /adapt` and wrapped in a route that matches the
//! app's path. App routes live in a subroute list ahead of the system
//! catch-all route, so new routes are inserted at index 0.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{Result, Route, RouteDirectory, RouteError, RouteSpec, route_path};

/// Caddy admin configuration
#[derive(Debug, Clone)]
pub struct CaddyConfig {
    /// Admin API base URL, e.g. `http://app:2019`
    pub admin_url: String,
    /// Config path of the app routes list
    pub routes_path: String,
    /// Host serving the shell and UI system routes
    pub host_upstream: String,
    /// Shell (ttyd) port on the host
    pub shell_port: u16,
    /// UI port on the host
    pub ui_port: u16,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for CaddyConfig {
    fn default() -> Self {
        Self {
            admin_url: "http://app:2019".to_string(),
            routes_path: "/config/apps/http/servers/srv0/routes/0/handle/0/routes".to_string(),
            host_upstream: "playground".to_string(),
            shell_port: 7681,
            ui_port: 8080,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AdaptResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<Value>,
}

/// Route directory backed by the Caddy admin API.
pub struct CaddyRouteDirectory {
    client: Client,
    config: CaddyConfig,
}

impl CaddyRouteDirectory {
    /// Create a new Caddy route directory.
    pub fn new(config: CaddyConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    /// Route `@id` for an app name.
    pub fn route_id(app_name: &str) -> String {
        format!("app-route-{}", app_name)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.admin_url.trim_end_matches('/'), path)
    }

    fn route_url(&self, index: usize) -> String {
        self.url(&format!("{}/{}", self.config.routes_path, index))
    }

    /// Send a request, failing on non-2xx responses.
    async fn send(
        &self,
        method: Method,
        method_name: &'static str,
        url: String,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        debug!(method = method_name, url = %url, "Caddy admin request");
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RouteError::Api {
            method: method_name,
            path: url,
            status: status.as_u16(),
            body,
        })
    }

    /// Adapt a rendered Caddyfile snippet into a JSON route.
    async fn adapt(&self, app_name: &str, rendered: &str) -> Result<Value> {
        let caddyfile = format!(":80 {{\n{}\n}}\n", rendered);
        let response = self
            .client
            .post(self.url("/adapt"))
            .header(reqwest::header::CONTENT_TYPE, "text/caddyfile")
            .body(caddyfile)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let adapted: AdaptResponse = serde_json::from_str(&text).map_err(|_| RouteError::Adapt {
            app_name: app_name.to_string(),
            message: format!("status {}: {}", status, text),
        })?;

        if let Some(message) = adapted.error {
            return Err(RouteError::Adapt {
                app_name: app_name.to_string(),
                message,
            });
        }
        if !status.is_success() {
            return Err(RouteError::Adapt {
                app_name: app_name.to_string(),
                message: format!("status {}", status),
            });
        }
        for warning in &adapted.warnings {
            warn!(app_name = %app_name, warning = %warning, "Caddyfile adapt warning");
        }

        adapted
            .result
            .as_ref()
            .and_then(|r| r.pointer("/apps/http/servers/srv0/routes/0"))
            .cloned()
            .ok_or_else(|| RouteError::Adapt {
                app_name: app_name.to_string(),
                message: "config produced no routes".to_string(),
            })
    }

    /// Current app routes.
    async fn list_routes(&self) -> Result<Vec<Value>> {
        let response = self
            .send(Method::GET, "GET", self.url(&self.config.routes_path), None)
            .await?;
        let value: Value = response.json().await?;
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(routes) => Ok(routes),
            other => Err(RouteError::Unexpected(format!(
                "routes list is not an array: {}",
                other
            ))),
        }
    }

    fn system_routes(&self) -> Value {
        let host = &self.config.host_upstream;
        json!([
            {
                "match": [{ "path": ["/_shell", "/_shell/*"] }],
                "handle": [{
                    "handler": "reverse_proxy",
                    "upstreams": [{ "dial": format!("{}:{}", host, self.config.shell_port) }]
                }]
            },
            {
                "handle": [{
                    "handler": "reverse_proxy",
                    "upstreams": [{ "dial": format!("{}:{}", host, self.config.ui_port) }]
                }]
            }
        ])
    }
}

/// Index of the route owned by `app_name`.
///
/// Matches on `@id`, or on a first path of `/<name>` or `/<name>*`.
fn find_index(routes: &[Value], app_name: &str) -> Option<usize> {
    let id = CaddyRouteDirectory::route_id(app_name);
    let bare = format!("/{}", app_name);
    let pattern = route_path(app_name);

    routes.iter().position(|route| {
        if route.get("@id").and_then(Value::as_str) == Some(id.as_str()) {
            return true;
        }
        route
            .pointer("/match/0/path/0")
            .and_then(Value::as_str)
            .is_some_and(|p| p == bare || p == pattern)
    })
}

/// Wrap an adapted handler route in a route matching the app's path.
fn app_route(spec: &RouteSpec, adapted: Value) -> Value {
    json!({
        "@id": CaddyRouteDirectory::route_id(spec.app_name()),
        "match": [{ "path": [spec.path()] }],
        "handle": [{ "handler": "subroute", "routes": [adapted] }],
        "terminal": true
    })
}

fn collect_upstreams(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(upstreams)) = map.get("upstreams") {
                out.extend(
                    upstreams
                        .iter()
                        .filter_map(|u| u.get("dial").and_then(Value::as_str))
                        .map(str::to_string),
                );
            }
            for (key, child) in map {
                if key != "upstreams" {
                    collect_upstreams(child, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_upstreams(item, out)),
        _ => {}
    }
}

fn to_route(value: &Value) -> Route {
    let paths = value
        .pointer("/match/0/path")
        .and_then(Value::as_array)
        .map(|paths| {
            paths
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let mut upstreams = Vec::new();
    collect_upstreams(value, &mut upstreams);
    Route { paths, upstreams }
}

#[async_trait]
impl RouteDirectory for CaddyRouteDirectory {
    fn directory_type(&self) -> &'static str {
        "caddy"
    }

    async fn add_route(&self, spec: &RouteSpec) -> Result<()> {
        let rendered = spec.render()?;
        let adapted = self.adapt(spec.app_name(), &rendered).await?;
        let route = app_route(spec, adapted);

        let routes = self.list_routes().await?;
        match find_index(&routes, spec.app_name()) {
            Some(index) => {
                self.send(Method::PATCH, "PATCH", self.route_url(index), Some(&route))
                    .await?;
                info!(app_name = %spec.app_name(), index, "Replaced proxy route");
            }
            None => {
                self.send(Method::PUT, "PUT", self.route_url(0), Some(&route))
                    .await?;
                info!(app_name = %spec.app_name(), "Added proxy route");
            }
        }
        Ok(())
    }

    async fn remove_route(&self, app_name: &str) -> Result<()> {
        let routes = self.list_routes().await?;
        let Some(index) = find_index(&routes, app_name) else {
            debug!(app_name = %app_name, "No proxy route to remove");
            return Ok(());
        };

        match self
            .send(Method::DELETE, "DELETE", self.route_url(index), None)
            .await
        {
            Ok(_) => {
                info!(app_name = %app_name, "Removed proxy route");
                Ok(())
            }
            Err(RouteError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn reset_to_default(&self) -> Result<()> {
        let routes = self.system_routes();
        self.send(
            Method::PATCH,
            "PATCH",
            self.url(&self.config.routes_path),
            Some(&routes),
        )
        .await?;
        info!("Proxy routes reset to defaults");
        Ok(())
    }

    async fn find_route(&self, app_name: &str) -> Result<Option<Route>> {
        let routes = self.list_routes().await?;
        Ok(find_index(&routes, app_name).map(|index| to_route(&routes[index])))
    }

    async fn health_check(&self) -> Result<()> {
        self.send(Method::GET, "GET", self.url("/config/"), None)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateVars;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ROUTES: &str = "/config/apps/http/servers/srv0/routes/0/handle/0/routes";

    fn directory(server: &MockServer) -> CaddyRouteDirectory {
        CaddyRouteDirectory::new(CaddyConfig {
            admin_url: server.uri(),
            ..Default::default()
        })
        .unwrap()
    }

    fn spec(name: &str) -> RouteSpec {
        RouteSpec {
            app_id: 4,
            vars: TemplateVars {
                app_name: name.to_string(),
                container_name: "app-4".to_string(),
                port: 8080,
            },
            template: "reverse_proxy {{.ContainerName}}:{{.Port}}".to_string(),
        }
    }

    fn adapted_handler() -> Value {
        json!({
            "handle": [{ "handler": "reverse_proxy", "upstreams": [{ "dial": "app-4:8080" }] }]
        })
    }

    async fn mount_adapt(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/adapt"))
            .and(header("content-type", "text/caddyfile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "apps": { "http": { "servers": { "srv0": {
                    "routes": [adapted_handler()]
                } } } } }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_add_route_inserts_at_front() {
        let server = MockServer::start().await;
        mount_adapt(&server).await;

        Mock::given(method("GET"))
            .and(path(ROUTES))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let expected = json!({
            "@id": "app-route-demo",
            "match": [{ "path": ["/demo*"] }],
            "handle": [{ "handler": "subroute", "routes": [adapted_handler()] }],
            "terminal": true
        });
        Mock::given(method("PUT"))
            .and(path(format!("{}/0", ROUTES)))
            .and(body_json(&expected))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        directory(&server).add_route(&spec("demo")).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_route_replaces_in_place() {
        let server = MockServer::start().await;
        mount_adapt(&server).await;

        Mock::given(method("GET"))
            .and(path(ROUTES))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "@id": "app-route-other", "match": [{ "path": ["/other*"] }] },
                { "match": [{ "path": ["/demo"] }] }
            ])))
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path(format!("{}/1", ROUTES)))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        directory(&server).add_route(&spec("demo")).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_route_adapt_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/adapt"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "error": "unrecognized directive: revers_proxy" })),
            )
            .mount(&server)
            .await;

        let err = directory(&server).add_route(&spec("demo")).await.unwrap_err();
        match err {
            RouteError::Adapt { app_name, message } => {
                assert_eq!(app_name, "demo");
                assert!(message.contains("unrecognized directive"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remove_missing_route_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ROUTES))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Null))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        directory(&server).remove_route("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_route_deletes_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ROUTES))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "@id": "app-route-a" },
                { "@id": "app-route-b" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/1", ROUTES)))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        directory(&server).remove_route("b").await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_to_default_patches_system_routes() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(ROUTES))
            .and(body_json(json!([
                {
                    "match": [{ "path": ["/_shell", "/_shell/*"] }],
                    "handle": [{ "handler": "reverse_proxy", "upstreams": [{ "dial": "playground:7681" }] }]
                },
                {
                    "handle": [{ "handler": "reverse_proxy", "upstreams": [{ "dial": "playground:8080" }] }]
                }
            ])))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        directory(&server).reset_to_default().await.unwrap();
    }

    #[tokio::test]
    async fn test_find_route_reports_upstreams() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ROUTES))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "@id": "app-route-demo",
                "match": [{ "path": ["/demo*"] }],
                "handle": [{ "handler": "subroute", "routes": [adapted_handler()] }]
            }])))
            .mount(&server)
            .await;

        let dir = directory(&server);
        let route = dir.find_route("demo").await.unwrap().unwrap();
        assert_eq!(route.paths, vec!["/demo*"]);
        assert_eq!(route.upstreams, vec!["app-4:8080"]);
        assert!(dir.find_route("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/config/"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = directory(&server).health_check().await.unwrap_err();
        assert!(matches!(err, RouteError::Api { status: 500, .. }));
    }

    #[test]
    fn test_find_index_matches_legacy_paths() {
        let routes = vec![
            json!({ "match": [{ "path": ["/demo-2*"] }] }),
            json!({ "match": [{ "path": ["/demo"] }] }),
        ];
        assert_eq!(find_index(&routes, "demo"), Some(1));
        assert_eq!(find_index(&routes, "demo-2"), Some(0));
        assert_eq!(find_index(&routes, "dem"), None);
    }
}
