//! Network Controller
//!
//! Reconciles `ElasticIP` and `NetworkInterface` CRDs against the cloud
//! provider's network API: allocation and assignment of floating public
//! addresses, and lifecycle plus attachment of network interfaces.

mod backoff;
mod config;
mod controller;
mod error;
mod locator;
mod metrics;
mod reconcile_helpers;
mod reconciler;
mod store;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube and reqwest both pull rustls; pick the provider explicitly
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_provider| ControllerError::InvalidConfig("failed to install rustls crypto provider".to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Network Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Cloud API URL: {}", config.cloud_api_url);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Probe address: {}", config.probe_addr);
    info!("  Concurrency: {}", config.concurrency);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
