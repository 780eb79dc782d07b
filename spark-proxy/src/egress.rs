use crate::errors::ProxyError;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Every outbound call is bounded by this, connect and body included.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// A successful (2xx) upstream response with its body fully read.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// The single pooled HTTP client shared by every backend call.
///
/// Cloning is cheap and shares the connection pool.
#[derive(Clone)]
pub struct EgressClient {
    client: reqwest::Client,
}

impl EgressClient {
    pub fn new(resolve: &HashMap<String, SocketAddr>) -> Result<Self, ProxyError> {
        Self::with_timeout(resolve, UPSTREAM_TIMEOUT)
    }

    pub fn with_timeout(
        resolve: &HashMap<String, SocketAddr>,
        timeout: Duration,
    ) -> Result<Self, ProxyError> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("spark-monitor/", env!("CARGO_PKG_VERSION")));

        for (host, addr) in resolve {
            builder = builder.resolve(host, *addr);
        }

        Ok(EgressClient {
            client: builder.build()?,
        })
    }

    pub async fn get(
        &self,
        url: &str,
        authorization: Option<HeaderValue>,
    ) -> Result<UpstreamResponse, ProxyError> {
        self.send(Method::GET, url, authorization, None).await
    }

    /// Sends one request and reads the whole body. Non-2xx statuses become
    /// [`ProxyError::UpstreamStatus`].
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        authorization: Option<HeaderValue>,
        json_body: Option<Bytes>,
    ) -> Result<UpstreamResponse, ProxyError> {
        let mut request = self.client.request(method.clone(), url);
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        if let Some(body) = json_body {
            request = request
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            tracing::debug!(%method, url, %status, "upstream returned an error status");
            return Err(ProxyError::UpstreamStatus {
                status,
                url: url.to_string(),
                body,
            });
        }

        Ok(UpstreamResponse { status, body })
    }
}
