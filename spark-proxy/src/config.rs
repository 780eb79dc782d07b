use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

pub const DEFAULT_AUTH_URL: &str = "https://ci.kbase.us/services/auth/";
pub const DEFAULT_MASTER_PORT: u16 = 8090;

/// Path segment under `base_path` that hosts every monitor route.
const ROUTE_NAMESPACE: &str = "berdl/api/spark-monitor";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Namespace cannot be empty")]
    EmptyNamespace,

    #[error("Base path must start with '/': {0}")]
    InvalidBasePath(String),

    #[error("Unsupported URL scheme for {0}")]
    UnsupportedScheme(Url),
}

/// Proxy configuration. Built once at startup and never mutated.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for the monitor routes
    pub listener: Listener,
    /// Optional listener for health and readiness probes
    #[serde(default)]
    pub admin_listener: Option<Listener>,
    /// Root path the monitor routes are mounted under
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Base URL of the Spark cluster manager API.
    ///
    /// The cluster routes are only registered when this is set.
    #[serde(default)]
    pub cluster_manager_url: Option<Url>,
    /// Kubernetes namespace the per-user Spark masters run in.
    ///
    /// The summary, executors and stages routes are only registered when this is set.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Base URL of the KBase auth service
    #[serde(default = "default_auth_url")]
    pub auth_url: Url,
    /// Port of every Spark master REST API
    #[serde(default = "default_master_port")]
    pub master_port: u16,
    /// Serve only the enabled signal and never contact a backend
    #[serde(default)]
    pub mock_mode: bool,
    /// Static DNS overrides applied by the egress client, hostname to address.
    /// A port of 0 keeps the port from the request URL.
    #[serde(default)]
    pub resolve: HashMap<String, SocketAddr>,
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_auth_url() -> Url {
    Url::parse(DEFAULT_AUTH_URL).expect("DEFAULT_AUTH_URL is a valid URL")
}

fn default_master_port() -> u16 {
    DEFAULT_MASTER_PORT
}

impl Config {
    /// A configuration with every optional setting left at its default.
    pub fn new(listener: Listener) -> Self {
        Config {
            listener,
            admin_listener: None,
            base_path: default_base_path(),
            cluster_manager_url: None,
            namespace: None,
            auth_url: default_auth_url(),
            master_port: default_master_port(),
            mock_mode: false,
            resolve: HashMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        if let Some(admin) = &self.admin_listener {
            admin.validate()?;
        }

        if self.master_port == 0 {
            return Err(ValidationError::InvalidPort);
        }

        if !self.base_path.starts_with('/') {
            return Err(ValidationError::InvalidBasePath(self.base_path.clone()));
        }

        if let Some(namespace) = &self.namespace
            && namespace.trim().is_empty()
        {
            return Err(ValidationError::EmptyNamespace);
        }

        for url in self.cluster_manager_url.iter().chain([&self.auth_url]) {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ValidationError::UnsupportedScheme(url.clone()));
            }
        }

        Ok(())
    }

    /// Whether any backend-facing route family is available.
    pub fn monitor_enabled(&self) -> bool {
        self.mock_mode || self.cluster_manager_url.is_some() || self.namespace.is_some()
    }

    /// The identity endpoint, `{auth_url}api/V2/me`.
    pub fn identity_url(&self) -> String {
        let base = self.auth_url.as_str();
        if base.ends_with('/') {
            format!("{base}api/V2/me")
        } else {
            format!("{base}/api/V2/me")
        }
    }

    /// The cluster manager base URL without a trailing slash.
    pub fn cluster_manager_base(&self) -> Option<String> {
        self.cluster_manager_url
            .as_ref()
            .map(|url| url.as_str().trim_end_matches('/').to_string())
    }

    /// Absolute path of a monitor route, e.g. `route_path("app/stages")`.
    pub fn route_path(&self, route: &str) -> String {
        join_path(&[&self.base_path, ROUTE_NAMESPACE, route])
    }
}

/// Joins path segments with exactly one `/` between them and a leading `/`.
fn join_path(segments: &[&str]) -> String {
    let mut path = String::new();
    for segment in segments {
        let segment = segment.trim_matches('/');
        if !segment.is_empty() {
            path.push('/');
            path.push_str(segment);
        }
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}
