//! Controller-specific error types.

use thiserror::Error;

use cloud_provider::CloudProviderError;
use control_client::ControlError;
use crds::ClusterPhase;
use versions::VersionError;

/// Errors that can occur in the cluster controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Seed cluster API error
    #[error("control plane error: {0}")]
    Control(#[from] ControlError),

    /// Cloud provider or annotation codec error
    #[error("cloud provider error: {0}")]
    CloudProvider(#[from] CloudProviderError),

    /// Version or update configuration error
    #[error("version error: {0}")]
    Version(#[from] VersionError),

    /// Credential material could not be generated
    #[error("credential generation failed: {0}")]
    Credentials(#[from] rcgen::Error),

    /// A manifest file could not be read or decoded
    #[error("failed to load manifest {path}: {reason}")]
    Template { path: String, reason: String },

    /// The desired master version is not in the version list
    #[error("unknown master version {0}")]
    UnknownMasterVersion(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Persisting a cluster kept conflicting past the retry bound
    #[error("updating cluster {0} failed after {1} retries")]
    RetriesExhausted(String, u32),

    /// A phase handler failed; carries cluster and phase context
    #[error("error in phase {phase} of cluster {cluster}: {source}")]
    Phase {
        cluster: String,
        phase: ClusterPhase,
        #[source]
        source: Box<ControllerError>,
    },
}

impl ControllerError {
    /// Wraps the error with the cluster and phase it occurred in.
    pub fn in_phase(self, cluster: &str, phase: ClusterPhase) -> Self {
        ControllerError::Phase {
            cluster: cluster.to_string(),
            phase,
            source: Box::new(self),
        }
    }
}
