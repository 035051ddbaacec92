//! Tenant Cluster Controller
//!
//! Reconciles TenantCluster CRs in the seed cluster: provisions
//! credentials and control-plane sub-resources for new clusters,
//! watches their health, and rolls master components to new versions.

mod config;
mod controller;
mod credentials;
mod error;
mod health;
mod queue;
mod resources;
mod store;
mod sync;
mod templates;
mod update;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use tracing::info;

use control_client::KubeControlPlane;
use crate::config::Config;
use crate::controller::Controller;
use crate::credentials::RcgenCredentialFactory;
use crate::store::Stores;
use crate::sync::Reconciler;
use crate::templates::FileTemplates;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    info!("starting cluster controller");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Datacenter: {}", config.datacenter);
    info!(
        "  Worker name: {}",
        if config.worker_name.is_empty() {
            "(default shard)"
        } else {
            &config.worker_name
        }
    );
    info!("  External URL: {}", config.external_url);
    info!("  Master resources: {}", config.master_resources_path.display());

    let versions = versions::load_versions(&config.versions_file)?;
    let updates = versions::load_updates(&config.updates_file)?;
    let default_version = versions::default_master_version(&versions)?.clone();
    info!(
        versions = versions.len(),
        updates = updates.len(),
        default = %default_version.id,
        "version catalogue loaded"
    );

    let client = kube::Client::try_default().await?;
    let control = Arc::new(KubeControlPlane::new(client));
    let templates = Arc::new(FileTemplates::new(config.master_resources_path.clone()));

    let reconciler = Reconciler::new(
        control,
        Stores::new(),
        cloud_provider::default_registry(),
        templates,
        Arc::new(RcgenCredentialFactory),
        versions,
        updates,
        default_version,
        config,
    );

    Controller::new(reconciler).run().await
}
