//! Environment-driven controller configuration.

use std::env;
use std::path::PathBuf;

use crate::error::ControllerError;

/// Runtime configuration of the cluster controller.
#[derive(Debug, Clone)]
pub struct Config {
    /// Seed datacenter this controller instance serves.
    pub datacenter: String,
    /// Shard label: only clusters carrying this worker-name label are
    /// reconciled. Empty for the default production instance.
    pub worker_name: String,
    /// DNS suffix under which tenant apiservers are exposed.
    pub external_url: String,
    /// NodePort the apiserver service is pinned to; the fronting load
    /// balancer maps external names onto it.
    pub apiserver_external_port: u16,
    /// Directory holding the per-version control plane manifests.
    pub master_resources_path: PathBuf,
    /// YAML file listing the known master versions.
    pub versions_file: PathBuf,
    /// YAML file listing the declared update edges.
    pub updates_file: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ControllerError> {
        let master_resources_path = env::var("MASTER_RESOURCES_PATH").map_err(|_| {
            ControllerError::InvalidConfig(
                "MASTER_RESOURCES_PATH environment variable is required".to_string(),
            )
        })?;
        let versions_file = env::var("VERSIONS_FILE").map_err(|_| {
            ControllerError::InvalidConfig(
                "VERSIONS_FILE environment variable is required".to_string(),
            )
        })?;
        let updates_file = env::var("UPDATES_FILE").map_err(|_| {
            ControllerError::InvalidConfig(
                "UPDATES_FILE environment variable is required".to_string(),
            )
        })?;
        let apiserver_external_port = env::var("APISERVER_EXTERNAL_PORT")
            .unwrap_or_else(|_| "8443".to_string())
            .parse::<u16>()
            .map_err(|e| {
                ControllerError::InvalidConfig(format!("APISERVER_EXTERNAL_PORT: {e}"))
            })?;

        Ok(Self {
            datacenter: env::var("DC").unwrap_or_else(|_| "master".to_string()),
            worker_name: env::var("WORKER_NAME").unwrap_or_default(),
            external_url: env::var("EXTERNAL_URL")
                .unwrap_or_else(|_| "localhost".to_string()),
            apiserver_external_port,
            master_resources_path: PathBuf::from(master_resources_path),
            versions_file: PathBuf::from(versions_file),
            updates_file: PathBuf::from(updates_file),
        })
    }
}
