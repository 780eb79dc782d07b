use crate::backend::{AppResource, BackendResolver};
use crate::cache::Clock;
use crate::cluster_manager::ClusterManager;
use crate::config::Config;
use crate::egress::{EgressClient, UpstreamResponse};
use crate::errors::ProxyError;
use crate::identity::{IdentityResolver, SessionToken};
use bytes::Bytes;
use http::HeaderMap;
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use shared::http::{json_response, serialize_json_response};
use std::sync::Arc;

pub const NO_ACTIVE_SESSION: &str = "No active Spark session";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageConfig {
    spark_monitor_enabled: bool,
    spark_monitor_mock_mode: bool,
}

/// Everything a request needs: the resolvers, their caches and the shared
/// egress client. Built once at startup and shared by every request task.
///
/// A backend family is `None` when its configuration is missing or mock mode
/// is on.
pub struct ProxyState {
    identity: IdentityResolver,
    backend: Option<BackendResolver>,
    cluster_manager: Option<ClusterManager>,
    enabled: bool,
    mock_mode: bool,
}

impl ProxyState {
    pub fn new(config: &Config, client: EgressClient, clock: Arc<dyn Clock>) -> Self {
        let live = !config.mock_mode;

        let backend = config.namespace.clone().filter(|_| live).map(|namespace| {
            BackendResolver::new(client.clone(), namespace, config.master_port, clock.clone())
        });
        let cluster_manager = config
            .cluster_manager_base()
            .filter(|_| live)
            .map(|base_url| ClusterManager::new(client.clone(), &base_url));

        ProxyState {
            identity: IdentityResolver::new(client, config.identity_url(), clock),
            backend,
            cluster_manager,
            enabled: config.monitor_enabled(),
            mock_mode: config.mock_mode,
        }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    pub fn has_cluster_manager(&self) -> bool {
        self.cluster_manager.is_some()
    }

    fn backend(&self) -> Result<&BackendResolver, ProxyError> {
        self.backend
            .as_ref()
            .ok_or(ProxyError::NotConfigured("Namespace"))
    }

    fn cluster_manager(&self) -> Result<&ClusterManager, ProxyError> {
        self.cluster_manager
            .as_ref()
            .ok_or(ProxyError::NotConfigured("Cluster manager"))
    }

    /// Whether the monitor UI should show up, and whether it should use canned data.
    /// Answered without a session token.
    pub fn page_config(&self) -> Result<Response<Bytes>, ProxyError> {
        Ok(serialize_json_response(
            StatusCode::OK,
            &PageConfig {
                spark_monitor_enabled: self.enabled,
                spark_monitor_mock_mode: self.mock_mode,
            },
        ))
    }

    pub async fn cluster_status(&self, headers: &HeaderMap) -> Result<Response<Bytes>, ProxyError> {
        let manager = self.cluster_manager()?;
        let token = require_token(headers)?;
        Ok(relay(manager.status(&token).await?))
    }

    pub async fn cluster_create(
        &self,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<Bytes>, ProxyError> {
        let manager = self.cluster_manager()?;
        let token = require_token(headers)?;
        let config = if body.iter().all(u8::is_ascii_whitespace) {
            Bytes::from_static(b"{}")
        } else {
            body
        };
        Ok(relay(manager.create(&token, config).await?))
    }

    pub async fn cluster_delete(&self, headers: &HeaderMap) -> Result<Response<Bytes>, ProxyError> {
        let manager = self.cluster_manager()?;
        let token = require_token(headers)?;
        Ok(relay(manager.delete(&token).await?))
    }

    /// Landing JSON of the user's Spark master.
    pub async fn cluster_summary(&self, headers: &HeaderMap) -> Result<Response<Bytes>, ProxyError> {
        let backend = self.backend()?;
        let token = require_token(headers)?;
        let username = self.identity.resolve_username(&token).await?;
        let base_url = backend.base_url(&username);
        Ok(relay(backend.master_status(&base_url).await?))
    }

    /// Executors or stages of the user's active Spark application.
    ///
    /// No active application, or a 404 from the master, answers 200 with an
    /// empty list rather than an error.
    pub async fn app_resource(
        &self,
        headers: &HeaderMap,
        resource: AppResource,
    ) -> Result<Response<Bytes>, ProxyError> {
        let backend = self.backend()?;
        let token = require_token(headers)?;
        let username = self.identity.resolve_username(&token).await?;
        let base_url = backend.base_url(&username);

        let upstream = match backend.resolve_active_job(&base_url).await {
            Ok(Some(app_id)) => backend.app_resource(&base_url, &app_id, resource).await,
            Ok(None) => return Ok(no_active_session(resource)),
            Err(e) => Err(e),
        };

        match upstream {
            Ok(response) => Ok(relay(response)),
            Err(e) if e.is_not_found() => {
                tracing::debug!(resource = resource.as_str(), "Spark master answered 404");
                Ok(no_active_session(resource))
            }
            Err(e) => Err(e),
        }
    }
}

fn require_token(headers: &HeaderMap) -> Result<SessionToken, ProxyError> {
    SessionToken::from_headers(headers).ok_or(ProxyError::MissingToken)
}

/// Passes the upstream status and body through untouched.
fn relay(response: UpstreamResponse) -> Response<Bytes> {
    json_response(response.status, response.body)
}

fn no_active_session(resource: AppResource) -> Response<Bytes> {
    let mut body = Map::new();
    body.insert(resource.as_str().to_string(), Value::Array(Vec::new()));
    body.insert("message".to_string(), Value::from(NO_ACTIVE_SESSION));
    serialize_json_response(StatusCode::OK, &body)
}
