//! Pending phase: provision credentials and sub-resources, then
//! hand over to Launching.

use chrono::Utc;
use tracing::{debug, info};

use cloud_provider::provider_for;
use crds::{Cluster, ClusterAddress, ClusterPhase};

use crate::error::ControllerError;
use crate::sync::{launch_timeout, Reconciler};

impl Reconciler {
    /// Runs the Pending checklist. Each step that changes the cluster
    /// returns immediately so the change is persisted and re-observed
    /// before the next step runs; a full pass without changes means
    /// the checklist is done and the cluster moves to Launching.
    pub(crate) async fn sync_pending_cluster(
        &self,
        cluster: &Cluster,
    ) -> Result<Option<Cluster>, ControllerError> {
        if let Some(failed) = self.check_timeout(cluster, launch_timeout()) {
            return Ok(Some(failed));
        }

        let mut c = cluster.clone();
        if self.assign_default_version(&mut c) {
            return Ok(Some(c));
        }
        if self.initialize_cloud_provider(&mut c)? {
            return Ok(Some(c));
        }
        if self.assign_address(&mut c) {
            return Ok(Some(c));
        }
        if self.assign_tokens(&mut c) {
            return Ok(Some(c));
        }
        if self.assign_root_ca(&mut c)? {
            return Ok(Some(c));
        }
        if self.assign_apiserver_cert(&mut c)? {
            return Ok(Some(c));
        }
        if self.assign_kubelet_cert(&mut c)? {
            return Ok(Some(c));
        }
        if self.assign_service_account_key(&mut c)? {
            return Ok(Some(c));
        }
        if self.assign_ssh_key(&mut c)? {
            return Ok(Some(c));
        }

        if !self.ensure_sub_resources(&c).await? {
            // Something was just created; wait for the stores to see
            // it before judging the checklist complete.
            debug!(cluster = %c.name, "sub-resources still materializing");
            return Ok(None);
        }

        info!(cluster = %c.name, "cluster provisioned, launching");
        c.status.phase = ClusterPhase::Launching;
        c.status.last_transition_time = Utc::now();
        Ok(Some(c))
    }

    fn assign_default_version(&self, c: &mut Cluster) -> bool {
        if c.spec.master_version.is_none() {
            info!(
                cluster = %c.name,
                version = %self.default_version.id,
                "assigning default master version"
            );
            c.spec.master_version = Some(self.default_version.id.clone());
            return true;
        }
        false
    }

    /// Lets the cloud provider allocate whatever it needs (tokens,
    /// networks) and fold the result back into the cloud spec.
    fn initialize_cloud_provider(&self, c: &mut Cluster) -> Result<bool, ControllerError> {
        let Some(cloud) = c.spec.cloud.clone() else {
            return Ok(false);
        };
        let provider = provider_for(&self.providers, &cloud)?;
        let initialized = provider.initialize(cloud.clone(), &c.name)?;
        if initialized != cloud {
            info!(cluster = %c.name, provider = provider.name(), "cloud provider initialized");
            c.spec.cloud = Some(initialized);
            return Ok(true);
        }
        Ok(false)
    }

    fn assign_address(&self, c: &mut Cluster) -> bool {
        if c.address.is_some() {
            return false;
        }
        let external_name = format!("{}.{}", c.name, self.config.external_url);
        let port = self.config.apiserver_external_port;
        info!(cluster = %c.name, %external_name, port, "assigning external address");
        c.address = Some(ClusterAddress {
            url: format!("https://{external_name}:{port}"),
            external_name,
            external_port: port,
            admin_token: String::new(),
            kubelet_token: String::new(),
        });
        true
    }

    fn assign_tokens(&self, c: &mut Cluster) -> bool {
        let Some(address) = c.address.as_mut() else {
            return false;
        };
        if address.admin_token.is_empty() {
            info!(cluster = %c.name, "generating admin token");
            address.admin_token = self.credentials.bearer_token();
            return true;
        }
        if address.kubelet_token.is_empty() {
            info!(cluster = %c.name, "generating kubelet token");
            address.kubelet_token = self.credentials.bearer_token();
            return true;
        }
        false
    }

    fn assign_root_ca(&self, c: &mut Cluster) -> Result<bool, ControllerError> {
        if c.status.credentials.root_ca.is_some() {
            return Ok(false);
        }
        info!(cluster = %c.name, "generating root CA");
        c.status.credentials.root_ca = Some(self.credentials.root_ca(&c.name)?);
        Ok(true)
    }

    fn assign_apiserver_cert(&self, c: &mut Cluster) -> Result<bool, ControllerError> {
        if c.status.credentials.apiserver_cert.is_some() {
            return Ok(false);
        }
        let Some(ca) = c.status.credentials.root_ca.clone() else {
            return Ok(false);
        };
        let common_name = c
            .address
            .as_ref()
            .map(|a| a.external_name.clone())
            .unwrap_or_else(|| c.name.clone());
        info!(cluster = %c.name, %common_name, "generating apiserver certificate");
        c.status.credentials.apiserver_cert =
            Some(self.credentials.signed_cert(&common_name, &ca)?);
        Ok(true)
    }

    fn assign_kubelet_cert(&self, c: &mut Cluster) -> Result<bool, ControllerError> {
        if c.status.credentials.kubelet_cert.is_some() {
            return Ok(false);
        }
        let Some(ca) = c.status.credentials.root_ca.clone() else {
            return Ok(false);
        };
        info!(cluster = %c.name, "generating kubelet certificate");
        c.status.credentials.kubelet_cert = Some(self.credentials.signed_cert("kubelet", &ca)?);
        Ok(true)
    }

    fn assign_service_account_key(&self, c: &mut Cluster) -> Result<bool, ControllerError> {
        if c.status.credentials.service_account_key.is_some() {
            return Ok(false);
        }
        info!(cluster = %c.name, "generating service account key");
        c.status.credentials.service_account_key = Some(self.credentials.service_account_key()?);
        Ok(true)
    }

    fn assign_ssh_key(&self, c: &mut Cluster) -> Result<bool, ControllerError> {
        if c.status.credentials.apiserver_ssh_key.is_some() {
            return Ok(false);
        }
        info!(cluster = %c.name, "generating apiserver ssh key");
        c.status.credentials.apiserver_ssh_key = Some(self.credentials.ssh_key_pair()?);
        Ok(true)
    }
}
