//! Master component manifest loading.
//!
//! Each `MasterVersion` names one YAML file per component; the
//! templates collaborator turns a file name into a typed object.
//! Value substitution is out of scope: the manifests are plain YAML.

use std::fs;
use std::path::PathBuf;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use serde::de::DeserializeOwned;

use crds::EtcdCluster;

use crate::error::ControllerError;

/// Loads typed control-plane manifests by file name.
pub trait MasterTemplates: Send + Sync {
    fn deployment(&self, file: &str) -> Result<Deployment, ControllerError>;
    fn service_account(&self, file: &str) -> Result<ServiceAccount, ControllerError>;
    fn cluster_role_binding(&self, file: &str) -> Result<ClusterRoleBinding, ControllerError>;
    fn etcd_cluster(&self, file: &str) -> Result<EtcdCluster, ControllerError>;
}

/// Manifests read from the master resources directory.
#[derive(Debug, Clone)]
pub struct FileTemplates {
    root: PathBuf,
}

impl FileTemplates {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn load<T: DeserializeOwned>(&self, file: &str) -> Result<T, ControllerError> {
        let path = self.root.join(file);
        let display = path.display().to_string();
        let raw = fs::read_to_string(&path).map_err(|e| ControllerError::Template {
            path: display.clone(),
            reason: e.to_string(),
        })?;
        serde_yaml::from_str(&raw).map_err(|e| ControllerError::Template {
            path: display,
            reason: e.to_string(),
        })
    }
}

impl MasterTemplates for FileTemplates {
    fn deployment(&self, file: &str) -> Result<Deployment, ControllerError> {
        self.load(file)
    }

    fn service_account(&self, file: &str) -> Result<ServiceAccount, ControllerError> {
        self.load(file)
    }

    fn cluster_role_binding(&self, file: &str) -> Result<ClusterRoleBinding, ControllerError> {
        self.load(file)
    }

    fn etcd_cluster(&self, file: &str) -> Result<EtcdCluster, ControllerError> {
        self.load(file)
    }
}
