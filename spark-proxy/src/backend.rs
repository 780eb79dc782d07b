use crate::cache::{Clock, TtlCache};
use crate::egress::{EgressClient, UpstreamResponse};
use crate::errors::ProxyError;
use crate::metrics_defs::{SESSION_CACHE_HIT, SESSION_CACHE_MISS};
use crate::sanitize::sanitize_k8s_name;
use serde::Deserialize;
use shared::counter;
use std::sync::Arc;
use std::time::Duration;

pub const SESSION_CACHE_TTL: Duration = Duration::from_secs(60);

/// Landing JSON of a Spark master, listing its running applications.
pub const MASTER_STATUS_PATH: &str = "/json/";

const MASTER_SERVICE_PREFIX: &str = "spark-master";

/// Per-application Spark REST resources the monitor proxies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppResource {
    Executors,
    Stages,
}

impl AppResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppResource::Executors => "executors",
            AppResource::Stages => "stages",
        }
    }
}

#[derive(Deserialize)]
struct MasterStatus {
    #[serde(default)]
    activeapps: Vec<ActiveApp>,
}

#[derive(Deserialize)]
struct ActiveApp {
    id: String,
}

/// Addresses the Spark master of a user and tracks its active application.
///
/// Only exists when a namespace is configured.
pub struct BackendResolver {
    client: EgressClient,
    namespace: String,
    port: u16,
    sessions: TtlCache<String>,
}

impl BackendResolver {
    pub fn new(client: EgressClient, namespace: String, port: u16, clock: Arc<dyn Clock>) -> Self {
        BackendResolver {
            client,
            namespace,
            port,
            sessions: TtlCache::new(SESSION_CACHE_TTL, clock),
        }
    }

    /// `http://spark-master-<sanitized user>.<namespace>:<port>`
    pub fn base_url(&self, username: &str) -> String {
        format!(
            "http://{MASTER_SERVICE_PREFIX}-{}.{}:{}",
            sanitize_k8s_name(username),
            self.namespace,
            self.port
        )
    }

    pub async fn master_status(&self, base_url: &str) -> Result<UpstreamResponse, ProxyError> {
        self.client
            .get(&format!("{base_url}{MASTER_STATUS_PATH}"), None)
            .await
    }

    /// The id of the first active application on the master, if any.
    ///
    /// Found ids are cached for [`SESSION_CACHE_TTL`]. An idle master is
    /// queried again on every call so a freshly started application shows up
    /// on the next request.
    pub async fn resolve_active_job(&self, base_url: &str) -> Result<Option<String>, ProxyError> {
        if let Some(app_id) = self.sessions.get(base_url) {
            counter!(SESSION_CACHE_HIT).increment(1);
            return Ok(Some(app_id));
        }
        counter!(SESSION_CACHE_MISS).increment(1);

        let response = self.master_status(base_url).await?;
        let status: MasterStatus = serde_json::from_slice(&response.body).map_err(|e| {
            ProxyError::InvalidUpstreamResponse(format!("Spark master status: {e}"))
        })?;

        let Some(app) = status.activeapps.into_iter().next() else {
            tracing::debug!(base_url, "no active Spark application");
            return Ok(None);
        };

        self.sessions.insert(base_url.to_string(), app.id.clone());
        Ok(Some(app.id))
    }

    pub async fn app_resource(
        &self,
        base_url: &str,
        app_id: &str,
        resource: AppResource,
    ) -> Result<UpstreamResponse, ProxyError> {
        let url = format!(
            "{base_url}/api/v1/applications/{app_id}/{}",
            resource.as_str()
        );
        self.client.get(&url, None).await
    }
}
