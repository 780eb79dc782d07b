use crate::egress::{EgressClient, UpstreamResponse};
use crate::errors::ProxyError;
use crate::identity::SessionToken;
use bytes::Bytes;
use reqwest::Method;

/// Calls to the Spark cluster manager API, authenticated with the user's own token.
pub struct ClusterManager {
    client: EgressClient,
    clusters_url: String,
}

impl ClusterManager {
    /// `base_url` must not end with a slash.
    pub fn new(client: EgressClient, base_url: &str) -> Self {
        ClusterManager {
            client,
            clusters_url: format!("{base_url}/clusters"),
        }
    }

    pub async fn status(&self, token: &SessionToken) -> Result<UpstreamResponse, ProxyError> {
        self.client
            .get(&self.clusters_url, Some(token.bearer()?))
            .await
    }

    pub async fn create(
        &self,
        token: &SessionToken,
        config: Bytes,
    ) -> Result<UpstreamResponse, ProxyError> {
        self.client
            .send(Method::POST, &self.clusters_url, Some(token.bearer()?), Some(config))
            .await
    }

    pub async fn delete(&self, token: &SessionToken) -> Result<UpstreamResponse, ProxyError> {
        self.client
            .send(Method::DELETE, &self.clusters_url, Some(token.bearer()?), None)
            .await
    }
}
