use serde::Deserialize;
use spark_proxy::config::{Config as ProxyConfig, Listener};
use std::fs::File;
use std::str::FromStr;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8888;

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Debug, Default, PartialEq)]
pub struct CommonConfig {
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub proxy: ProxyConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Reads the deployment environment variables through `lookup`. Unset or
    /// empty variables fall back to their defaults.
    pub fn from_env<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let mut proxy = ProxyConfig::new(Listener {
            host: var("SPARK_MONITOR_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_var(&var, "SPARK_MONITOR_PORT")?.unwrap_or(DEFAULT_PORT),
        });
        proxy.cluster_manager_url = parse_var(&var, "SPARK_CLUSTER_MANAGER_API_URL")?;
        proxy.namespace = var("BERDL_JUPYTERHUB_NAMESPACE");
        if let Some(auth_url) = parse_var(&var, "KBASE_AUTH_URL")? {
            proxy.auth_url = auth_url;
        }
        if let Some(port) = parse_var(&var, "SPARK_MASTER_PORT")? {
            proxy.master_port = port;
        }
        if let Some(base_path) = var("SPARK_MONITOR_BASE_PATH") {
            proxy.base_path = base_path;
        }
        proxy.mock_mode = var("SPARK_MONITOR_MOCK_MODE")
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"));

        let metrics = match (var("STATSD_HOST"), parse_var(&var, "STATSD_PORT")?) {
            (Some(statsd_host), port) => Some(MetricsConfig {
                statsd_host,
                statsd_port: port.unwrap_or(8125),
            }),
            (None, _) => None,
        };
        let logging = var("SENTRY_DSN").map(|sentry_dsn| LoggingConfig { sentry_dsn });

        Ok(Config {
            common: CommonConfig { metrics, logging },
            proxy,
        })
    }
}

fn parse_var<T, F>(var: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name,
                value: value.clone(),
            })
        })
        .transpose()
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn proxy_config_from_file() {
        let yaml = r#"
            logging:
                sentry_dsn: "https://public@sentry.example.com/1"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            proxy:
                listener:
                    host: 0.0.0.0
                    port: 8888
                admin_listener:
                    host: 127.0.0.1
                    port: 8889
                namespace: ns1
                cluster_manager_url: http://spark-cluster-manager:8000
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(
            config.common.metrics,
            Some(MetricsConfig {
                statsd_host: "127.0.0.1".into(),
                statsd_port: 8125
            })
        );
        assert!(config.common.logging.is_some());
        assert_eq!(config.proxy.namespace.as_deref(), Some("ns1"));
        assert_eq!(config.proxy.admin_listener.as_ref().map(|l| l.port), Some(8889));
        assert!(config.proxy.validate().is_ok());
    }

    #[test]
    fn proxy_section_is_required() {
        let tmp = write_tmp_file("metrics:\n    statsd_host: localhost\n    statsd_port: 8125\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            Config::from_file(std::path::Path::new("/nonexistent/spark-monitor.yaml")),
            Err(ConfigError::LoadError(_))
        ));
    }

    #[test]
    fn config_from_env() {
        let config = Config::from_env(env(&[
            ("SPARK_CLUSTER_MANAGER_API_URL", "http://cm:8000/"),
            ("BERDL_JUPYTERHUB_NAMESPACE", "jupyterhub-prod"),
            ("KBASE_AUTH_URL", "https://kbase.us/services/auth/"),
            ("SPARK_MASTER_PORT", "7077"),
            ("SPARK_MONITOR_PORT", "9000"),
            ("SPARK_MONITOR_BASE_PATH", "/user/alice/"),
            ("SPARK_MONITOR_MOCK_MODE", "Yes"),
            ("STATSD_HOST", "statsd"),
        ]))
        .expect("config from env");

        let proxy = &config.proxy;
        assert_eq!(proxy.listener.host, "0.0.0.0");
        assert_eq!(proxy.listener.port, 9000);
        assert_eq!(proxy.cluster_manager_base().as_deref(), Some("http://cm:8000"));
        assert_eq!(proxy.namespace.as_deref(), Some("jupyterhub-prod"));
        assert_eq!(proxy.identity_url(), "https://kbase.us/services/auth/api/V2/me");
        assert_eq!(proxy.master_port, 7077);
        assert_eq!(proxy.base_path, "/user/alice/");
        assert!(proxy.mock_mode);
        assert_eq!(config.common.metrics.map(|m| m.statsd_port), Some(8125));
        assert!(config.common.logging.is_none());
    }

    #[test]
    fn config_from_empty_env() {
        let config = Config::from_env(env(&[("BERDL_JUPYTERHUB_NAMESPACE", "")])).unwrap();
        assert_eq!(config.proxy.listener.port, 8888);
        assert_eq!(config.proxy.master_port, 8090);
        assert_eq!(config.proxy.namespace, None);
        assert!(!config.proxy.mock_mode);
        assert!(!config.proxy.monitor_enabled());
        assert_eq!(config.common, CommonConfig::default());

        let config = Config::from_env(env(&[("SPARK_MONITOR_MOCK_MODE", "off")])).unwrap();
        assert!(!config.proxy.mock_mode);
    }

    #[test]
    fn invalid_env_values() {
        let err = Config::from_env(env(&[("SPARK_MASTER_PORT", "spark")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                name: "SPARK_MASTER_PORT",
                ..
            }
        ));

        let err = Config::from_env(env(&[("SPARK_CLUSTER_MANAGER_API_URL", "not a url")]))
            .unwrap_err();
        assert!(err.to_string().contains("SPARK_CLUSTER_MANAGER_API_URL"));
    }
}
