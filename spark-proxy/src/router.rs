use crate::backend::AppResource;
use crate::config::Config;
use crate::errors::ProxyError;
use crate::handler::ProxyState;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT, UPSTREAM_ERRORS};
use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::{Method, Request, Response, StatusCode};
use shared::http::error_json_response;
use shared::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::Instant;

/// Largest accepted inbound body (cluster creation settings).
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteKind {
    PageConfig,
    ClusterStatus,
    ClusterCreate,
    ClusterDelete,
    ClusterSummary,
    App(AppResource),
}

impl RouteKind {
    pub fn name(&self) -> &'static str {
        match self {
            RouteKind::PageConfig => "page_config",
            RouteKind::ClusterStatus => "cluster_status",
            RouteKind::ClusterCreate => "cluster_create",
            RouteKind::ClusterDelete => "cluster_delete",
            RouteKind::ClusterSummary => "cluster_summary",
            RouteKind::App(AppResource::Executors) => "app_executors",
            RouteKind::App(AppResource::Stages) => "app_stages",
        }
    }
}

#[derive(Debug)]
struct Route {
    method: Method,
    path: String,
    kind: RouteKind,
}

enum RouteMatch {
    Found(RouteKind),
    MethodNotAllowed,
    NotFound,
}

/// Fixed route table of the monitor. A route family is only present when the
/// state has the backend it forwards to; requests for absent routes get a 404.
#[derive(Clone)]
pub struct Router {
    routes: Arc<Vec<Route>>,
    state: Arc<ProxyState>,
}

impl Router {
    pub fn new(config: &Config, state: Arc<ProxyState>) -> Self {
        let route = |method: Method, path: &str, kind: RouteKind| Route {
            method,
            path: config.route_path(path),
            kind,
        };

        let mut routes = vec![route(Method::GET, "config", RouteKind::PageConfig)];

        if state.has_cluster_manager() {
            routes.extend([
                route(Method::GET, "status", RouteKind::ClusterStatus),
                route(Method::POST, "cluster/create", RouteKind::ClusterCreate),
                route(Method::DELETE, "cluster/delete", RouteKind::ClusterDelete),
            ]);
        }

        if state.has_backend() {
            routes.extend([
                route(Method::GET, "cluster", RouteKind::ClusterSummary),
                route(
                    Method::GET,
                    "app/executors",
                    RouteKind::App(AppResource::Executors),
                ),
                route(Method::GET, "app/stages", RouteKind::App(AppResource::Stages)),
            ]);
        }

        Router {
            routes: Arc::new(routes),
            state,
        }
    }

    /// Registered paths, in registration order.
    pub fn paths(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.path.as_str()).collect()
    }

    /// Answers one inbound request. Every failure is rendered as a JSON
    /// error envelope, so this never fails.
    pub async fn route<B>(&self, req: Request<B>) -> Response<Bytes>
    where
        B: hyper::body::Body + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let kind = match self.find_route(req.method(), req.uri().path()) {
            RouteMatch::Found(kind) => kind,
            RouteMatch::MethodNotAllowed => {
                return error_json_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
            }
            RouteMatch::NotFound => {
                tracing::warn!(
                    method = %req.method(),
                    path = %req.uri().path(),
                    "No route matched"
                );
                return error_json_response(StatusCode::NOT_FOUND, "Not Found");
            }
        };

        tracing::debug!(route = kind.name(), "Matched route");
        let inflight = InflightGuard::new();
        let start = Instant::now();

        let response = match self.handle(kind, req).await {
            Ok(response) => response,
            Err(e) => render_error(kind, e),
        };

        drop(inflight);
        histogram!(
            REQUEST_DURATION,
            "route" => kind.name(),
            "status" => response.status().as_u16().to_string(),
        )
        .record(start.elapsed().as_secs_f64());

        response
    }

    fn find_route(&self, method: &Method, path: &str) -> RouteMatch {
        let path = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };

        let mut path_known = false;
        for route in self.routes.iter().filter(|r| r.path == path) {
            if route.method == method {
                return RouteMatch::Found(route.kind);
            }
            path_known = true;
        }

        if path_known {
            RouteMatch::MethodNotAllowed
        } else {
            RouteMatch::NotFound
        }
    }

    async fn handle<B>(&self, kind: RouteKind, req: Request<B>) -> Result<Response<Bytes>, ProxyError>
    where
        B: hyper::body::Body + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let headers = &parts.headers;

        match kind {
            RouteKind::PageConfig => self.state.page_config(),
            RouteKind::ClusterStatus => self.state.cluster_status(headers).await,
            RouteKind::ClusterCreate => {
                let body = Limited::new(body, MAX_REQUEST_BODY_BYTES)
                    .collect()
                    .await
                    .map_err(|e| ProxyError::RequestBody(e.to_string()))?
                    .to_bytes();
                self.state.cluster_create(headers, body).await
            }
            RouteKind::ClusterDelete => self.state.cluster_delete(headers).await,
            RouteKind::ClusterSummary => self.state.cluster_summary(headers).await,
            RouteKind::App(resource) => self.state.app_resource(headers, resource).await,
        }
    }
}

/// One slot of the in-flight gauge, released on drop so a request abandoned
/// by its client is still counted out.
struct InflightGuard(metrics::Gauge);

impl InflightGuard {
    fn new() -> Self {
        let gauge = gauge!(REQUESTS_INFLIGHT);
        gauge.increment(1.0);
        InflightGuard(gauge)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.decrement(1.0);
    }
}

fn render_error(kind: RouteKind, err: ProxyError) -> Response<Bytes> {
    let status = err.status_code();
    if status.is_server_error() {
        counter!(UPSTREAM_ERRORS, "route" => kind.name()).increment(1);
        tracing::error!(route = kind.name(), error = %err, "Error proxying request");
    } else if matches!(
        err,
        ProxyError::AuthRejected { .. } | ProxyError::UpstreamStatus { .. }
    ) {
        tracing::warn!(route = kind.name(), %status, error = %err, "Upstream rejected request");
    } else {
        tracing::debug!(route = kind.name(), %status, error = %err, "Request rejected");
    }
    error_json_response(status, &err.to_string())
}
