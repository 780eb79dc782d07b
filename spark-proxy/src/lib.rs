pub mod backend;
pub mod cache;
pub mod cluster_manager;
pub mod config;
pub mod egress;
pub mod errors;
pub mod handler;
pub mod identity;
pub mod metrics_defs;
pub mod router;
pub mod sanitize;
mod service;

#[cfg(test)]
mod testutils;

use crate::cache::SystemClock;
use crate::config::Config;
use crate::egress::EgressClient;
use crate::errors::ProxyError;
use crate::handler::ProxyState;
use crate::router::Router;
use service::MonitorService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Builds the route table for `config`, backed by a fresh egress client and
/// empty caches.
pub fn build_router(config: &Config) -> Result<Router, ProxyError> {
    let client = EgressClient::new(&config.resolve)?;
    let state = ProxyState::new(config, client, Arc::new(SystemClock));
    Ok(Router::new(config, Arc::new(state)))
}

/// Serves the monitor (and the admin probes, if configured) until `shutdown`
/// resolves.
pub async fn run<F>(config: Config, shutdown: F) -> Result<(), ProxyError>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;
    shared::metrics_defs::describe_all(metrics_defs::ALL_METRICS);

    let router = build_router(&config)?;
    if config.mock_mode {
        tracing::info!("Spark monitor running in mock mode");
    } else if !config.monitor_enabled() {
        tracing::info!("Spark monitor disabled: no cluster manager URL or namespace configured");
    }
    for path in router.paths() {
        tracing::info!(path, "registered route");
    }

    let ready = Arc::new(AtomicBool::new(true));
    let (stop_tx, stop_rx) = watch::channel(false);
    {
        let ready = ready.clone();
        tokio::spawn(async move {
            shutdown.await;
            tracing::info!("shutting down");
            ready.store(false, Ordering::SeqCst);
            let _ = stop_tx.send(true);
        });
    }

    let monitor_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        MonitorService::new(router),
        stopped(stop_rx.clone()),
    );

    let admin_task = async {
        match &config.admin_listener {
            Some(admin) => {
                run_http_service(
                    &admin.host,
                    admin.port,
                    AdminService::new(move || ready.load(Ordering::SeqCst)),
                    stopped(stop_rx),
                )
                .await
            }
            None => Ok(()),
        }
    };

    tokio::try_join!(monitor_task, admin_task)?;
    tracing::info!("listeners stopped, releasing egress client");
    Ok(())
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}
