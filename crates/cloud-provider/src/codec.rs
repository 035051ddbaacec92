//! Cluster annotation codec
//!
//! Translates between the `TenantCluster` CR and the cluster domain
//! value. Generated credentials, bearer tokens, the address block and
//! cloud access data live in controller-owned annotations under the
//! `clusterops.io/` prefix; annotations outside that prefix pass
//! through untouched. The underlying provider marshal/unmarshal is not
//! self-concurrency-safe, callers serialize codec access.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use crds::{
    Cluster, ClusterAddress, ClusterSpec, ClusterStatus, KeyCert, KeyPairData, TenantCluster,
    TenantClusterStatus, CLUSTER_ROLE_LABEL, ROLE_LABEL_KEY, WORKER_NAME_LABEL_KEY,
};

use crate::error::CloudProviderError;
use crate::{provider_for, CloudRegistry};

/// Prefix of every controller-owned annotation.
pub const ANNOTATION_PREFIX: &str = "clusterops.io/";

const URL_ANNOTATION: &str = "clusterops.io/url";
const EXTERNAL_NAME_ANNOTATION: &str = "clusterops.io/external-name";
const EXTERNAL_PORT_ANNOTATION: &str = "clusterops.io/external-port";
const ADMIN_TOKEN_ANNOTATION: &str = "clusterops.io/token";
const KUBELET_TOKEN_ANNOTATION: &str = "clusterops.io/kubelet-token";

const PROVIDER_ANNOTATION: &str = "clusterops.io/cloud-provider";
const CLOUD_DC_ANNOTATION: &str = "clusterops.io/cloud-dc";
const CLOUD_ANNOTATION_PREFIX: &str = "clusterops.io/cloud-provider-";

const ROOT_CA_KEY_ANNOTATION: &str = "clusterops.io/root-ca-key";
const ROOT_CA_CERT_ANNOTATION: &str = "clusterops.io/root-ca-cert";
const APISERVER_CERT_ANNOTATION: &str = "clusterops.io/apiserver-cert";
const APISERVER_CERT_KEY_ANNOTATION: &str = "clusterops.io/apiserver-cert-key";
const KUBELET_CERT_ANNOTATION: &str = "clusterops.io/kubelet-cert";
const KUBELET_CERT_KEY_ANNOTATION: &str = "clusterops.io/kubelet-cert-key";
const SSH_PRIV_KEY_ANNOTATION: &str = "clusterops.io/apiserver-ssh-priv-key";
const SSH_PUB_KEY_ANNOTATION: &str = "clusterops.io/apiserver-ssh-pub-key";
const SERVICE_ACCOUNT_KEY_ANNOTATION: &str = "clusterops.io/service-account-key";

fn cloud_annotation_prefix(provider: &str) -> String {
    format!("{CLOUD_ANNOTATION_PREFIX}{provider}-")
}

fn get_b64(
    annotations: &BTreeMap<String, String>,
    key: &str,
) -> Result<Option<Vec<u8>>, CloudProviderError> {
    match annotations.get(key) {
        None => Ok(None),
        Some(raw) => BASE64
            .decode(raw)
            .map(Some)
            .map_err(|e| CloudProviderError::InvalidAnnotation {
                key: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

fn put_b64(annotations: &mut BTreeMap<String, String>, key: &str, value: &[u8]) {
    annotations.insert(key.to_string(), BASE64.encode(value));
}

/// Decodes a `TenantCluster` CR into the cluster domain value.
pub fn unmarshal_cluster(
    registry: &CloudRegistry,
    tc: &TenantCluster,
) -> Result<Cluster, CloudProviderError> {
    let name = tc
        .metadata
        .name
        .clone()
        .ok_or_else(|| CloudProviderError::MalformedResource("missing name".to_string()))?;
    let annotations = tc.metadata.annotations.clone().unwrap_or_default();
    let labels = tc.metadata.labels.clone().unwrap_or_default();

    let mut cluster = Cluster {
        name,
        resource_version: tc.metadata.resource_version.clone(),
        annotations: annotations
            .iter()
            .filter(|(k, _)| !k.starts_with(ANNOTATION_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        spec: ClusterSpec {
            human_readable_name: tc.spec.human_readable_name.clone(),
            master_version: tc.spec.master_version.clone(),
            worker_name: labels.get(WORKER_NAME_LABEL_KEY).cloned().unwrap_or_default(),
            cloud: None,
        },
        address: None,
        status: ClusterStatus::default(),
    };

    // Status block; a CR that has never been reconciled starts Pending
    // with its creation time as the last transition.
    match &tc.status {
        Some(status) => {
            cluster.status.phase = status.phase;
            cluster.status.health = status.health.clone();
            cluster.status.last_deployed_master_version =
                status.last_deployed_master_version.clone();
            cluster.status.master_update_phase = status.master_update_phase;
            cluster.status.last_transition_time = status
                .last_transition_time
                .or_else(|| tc.metadata.creation_timestamp.as_ref().map(|t| t.0))
                .unwrap_or_else(Utc::now);
        }
        None => {
            cluster.status.last_transition_time = tc
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0)
                .unwrap_or_else(Utc::now);
        }
    }

    // Address block.
    if let Some(url) = annotations.get(URL_ANNOTATION) {
        let external_port = match annotations.get(EXTERNAL_PORT_ANNOTATION) {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| CloudProviderError::InvalidAnnotation {
                    key: EXTERNAL_PORT_ANNOTATION.to_string(),
                    reason: e.to_string(),
                })?,
            None => 0,
        };
        cluster.address = Some(ClusterAddress {
            url: url.clone(),
            external_name: annotations
                .get(EXTERNAL_NAME_ANNOTATION)
                .cloned()
                .unwrap_or_default(),
            external_port,
            admin_token: annotations
                .get(ADMIN_TOKEN_ANNOTATION)
                .cloned()
                .unwrap_or_default(),
            kubelet_token: annotations
                .get(KUBELET_TOKEN_ANNOTATION)
                .cloned()
                .unwrap_or_default(),
        });
    }

    // Generated credentials.
    let creds = &mut cluster.status.credentials;
    if let (Some(key), Some(cert)) = (
        get_b64(&annotations, ROOT_CA_KEY_ANNOTATION)?,
        get_b64(&annotations, ROOT_CA_CERT_ANNOTATION)?,
    ) {
        creds.root_ca = Some(KeyCert { key, cert });
    }
    if let (Some(key), Some(cert)) = (
        get_b64(&annotations, APISERVER_CERT_KEY_ANNOTATION)?,
        get_b64(&annotations, APISERVER_CERT_ANNOTATION)?,
    ) {
        creds.apiserver_cert = Some(KeyCert { key, cert });
    }
    if let (Some(key), Some(cert)) = (
        get_b64(&annotations, KUBELET_CERT_KEY_ANNOTATION)?,
        get_b64(&annotations, KUBELET_CERT_ANNOTATION)?,
    ) {
        creds.kubelet_cert = Some(KeyCert { key, cert });
    }
    if let (Some(private_key), Some(public_key)) = (
        get_b64(&annotations, SSH_PRIV_KEY_ANNOTATION)?,
        get_b64(&annotations, SSH_PUB_KEY_ANNOTATION)?,
    ) {
        creds.apiserver_ssh_key = Some(KeyPairData {
            private_key,
            public_key,
        });
    }
    creds.service_account_key = get_b64(&annotations, SERVICE_ACCOUNT_KEY_ANNOTATION)?;

    // Cloud access data, decoded by the owning provider.
    if let Some(provider_name) = annotations.get(PROVIDER_ANNOTATION) {
        let provider = registry
            .get(provider_name.as_str())
            .ok_or_else(|| CloudProviderError::UnknownProvider(provider_name.clone()))?;
        let prefix = cloud_annotation_prefix(provider_name);
        let sub: BTreeMap<String, String> = annotations
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&prefix)
                    .map(|suffix| (suffix.to_string(), v.clone()))
            })
            .collect();
        let mut cloud = provider.unmarshal(&sub)?;
        cloud.datacenter = annotations
            .get(CLOUD_DC_ANNOTATION)
            .cloned()
            .unwrap_or_default();
        cluster.spec.cloud = Some(cloud);
    }

    Ok(cluster)
}

/// Encodes the cluster domain value onto a fresh copy of the backing
/// CR, preserving the CR's identity and concurrency token.
pub fn marshal_cluster(
    registry: &CloudRegistry,
    cluster: &Cluster,
    base: &TenantCluster,
) -> Result<TenantCluster, CloudProviderError> {
    let mut out = base.clone();

    out.spec.human_readable_name = cluster.spec.human_readable_name.clone();
    out.spec.master_version = cluster.spec.master_version.clone();

    let labels = out.metadata.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(ROLE_LABEL_KEY.to_string(), CLUSTER_ROLE_LABEL.to_string());
    if cluster.spec.worker_name.is_empty() {
        labels.remove(WORKER_NAME_LABEL_KEY);
    } else {
        labels.insert(
            WORKER_NAME_LABEL_KEY.to_string(),
            cluster.spec.worker_name.clone(),
        );
    }

    // Rebuild the controller-owned annotations from scratch so stale
    // keys never survive; custom annotations pass through.
    let mut annotations: BTreeMap<String, String> = cluster.annotations.clone();

    if let Some(address) = &cluster.address {
        annotations.insert(URL_ANNOTATION.to_string(), address.url.clone());
        annotations.insert(
            EXTERNAL_NAME_ANNOTATION.to_string(),
            address.external_name.clone(),
        );
        annotations.insert(
            EXTERNAL_PORT_ANNOTATION.to_string(),
            address.external_port.to_string(),
        );
        if !address.admin_token.is_empty() {
            annotations.insert(ADMIN_TOKEN_ANNOTATION.to_string(), address.admin_token.clone());
        }
        if !address.kubelet_token.is_empty() {
            annotations.insert(
                KUBELET_TOKEN_ANNOTATION.to_string(),
                address.kubelet_token.clone(),
            );
        }
    }

    let creds = &cluster.status.credentials;
    if let Some(root_ca) = &creds.root_ca {
        put_b64(&mut annotations, ROOT_CA_KEY_ANNOTATION, &root_ca.key);
        put_b64(&mut annotations, ROOT_CA_CERT_ANNOTATION, &root_ca.cert);
    }
    if let Some(cert) = &creds.apiserver_cert {
        put_b64(&mut annotations, APISERVER_CERT_KEY_ANNOTATION, &cert.key);
        put_b64(&mut annotations, APISERVER_CERT_ANNOTATION, &cert.cert);
    }
    if let Some(cert) = &creds.kubelet_cert {
        put_b64(&mut annotations, KUBELET_CERT_KEY_ANNOTATION, &cert.key);
        put_b64(&mut annotations, KUBELET_CERT_ANNOTATION, &cert.cert);
    }
    if let Some(ssh) = &creds.apiserver_ssh_key {
        put_b64(&mut annotations, SSH_PRIV_KEY_ANNOTATION, &ssh.private_key);
        put_b64(&mut annotations, SSH_PUB_KEY_ANNOTATION, &ssh.public_key);
    }
    if let Some(sa_key) = &creds.service_account_key {
        put_b64(&mut annotations, SERVICE_ACCOUNT_KEY_ANNOTATION, sa_key);
    }

    if let Some(cloud) = &cluster.spec.cloud {
        let provider = provider_for(registry, cloud)?;
        annotations.insert(
            PROVIDER_ANNOTATION.to_string(),
            provider.name().to_string(),
        );
        annotations.insert(CLOUD_DC_ANNOTATION.to_string(), cloud.datacenter.clone());
        let prefix = cloud_annotation_prefix(provider.name());
        for (suffix, value) in provider.marshal(cloud)? {
            annotations.insert(format!("{prefix}{suffix}"), value);
        }
    }

    out.metadata.annotations = Some(annotations);

    out.status = Some(TenantClusterStatus {
        phase: cluster.status.phase,
        last_transition_time: Some(cluster.status.last_transition_time),
        health: cluster.status.health.clone(),
        last_deployed_master_version: cluster.status.last_deployed_master_version.clone(),
        master_update_phase: cluster.status.master_update_phase,
    });

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_registry;
    use crds::{ClusterPhase, FakeCloudSpec, TenantClusterSpec};
    use kube::api::ObjectMeta;

    fn base_resource(name: &str) -> TenantCluster {
        TenantCluster {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                resource_version: Some("41".to_string()),
                ..Default::default()
            },
            spec: TenantClusterSpec {
                human_readable_name: "my cluster".to_string(),
                master_version: None,
            },
            status: None,
        }
    }

    fn domain_cluster(name: &str) -> Cluster {
        let mut cluster = Cluster {
            name: name.to_string(),
            resource_version: Some("41".to_string()),
            ..Default::default()
        };
        cluster.spec.human_readable_name = "my cluster".to_string();
        cluster.spec.master_version = Some("1.5.3".to_string());
        cluster.spec.worker_name = "dev-worker".to_string();
        cluster.spec.cloud = Some(crds::CloudSpec {
            datacenter: "fake-dc".to_string(),
            fake: Some(FakeCloudSpec {
                token: Some("secret".to_string()),
            }),
            ..Default::default()
        });
        cluster.address = Some(ClusterAddress {
            url: "https://c1.example.com:8443".to_string(),
            external_name: "c1.example.com".to_string(),
            external_port: 8443,
            admin_token: "admin-token".to_string(),
            kubelet_token: "kubelet-token".to_string(),
        });
        cluster.status.phase = ClusterPhase::Launching;
        cluster.status.credentials.root_ca = Some(KeyCert {
            key: b"ca-key".to_vec(),
            cert: b"ca-cert".to_vec(),
        });
        cluster.status.credentials.service_account_key = Some(b"sa-key".to_vec());
        cluster
    }

    #[test]
    fn cluster_round_trips_through_annotations() {
        let registry = default_registry();
        let cluster = domain_cluster("c1");

        let cr = marshal_cluster(&registry, &cluster, &base_resource("c1")).unwrap();
        let back = unmarshal_cluster(&registry, &cr).unwrap();

        assert_eq!(back.name, cluster.name);
        assert_eq!(back.spec.master_version, cluster.spec.master_version);
        assert_eq!(back.spec.worker_name, "dev-worker");
        assert_eq!(back.address, cluster.address);
        assert_eq!(back.status.phase, ClusterPhase::Launching);
        assert_eq!(
            back.status.credentials.root_ca,
            cluster.status.credentials.root_ca
        );
        assert_eq!(
            back.status.credentials.service_account_key,
            cluster.status.credentials.service_account_key
        );
        assert_eq!(
            back.spec.cloud.as_ref().unwrap().fake.as_ref().unwrap().token,
            Some("secret".to_string())
        );
        assert_eq!(back.spec.cloud.as_ref().unwrap().datacenter, "fake-dc");
    }

    #[test]
    fn custom_annotations_pass_through() {
        let registry = default_registry();
        let mut base = base_resource("c2");
        base.metadata.annotations = Some(BTreeMap::from([(
            "team.example.com/owner".to_string(),
            "platform".to_string(),
        )]));

        let decoded = unmarshal_cluster(&registry, &base).unwrap();
        assert_eq!(
            decoded.annotations.get("team.example.com/owner"),
            Some(&"platform".to_string())
        );

        let encoded = marshal_cluster(&registry, &decoded, &base).unwrap();
        assert_eq!(
            encoded
                .metadata
                .annotations
                .unwrap()
                .get("team.example.com/owner"),
            Some(&"platform".to_string())
        );
    }

    #[test]
    fn unknown_provider_annotation_errors() {
        let registry = default_registry();
        let mut base = base_resource("c3");
        base.metadata.annotations = Some(BTreeMap::from([(
            PROVIDER_ANNOTATION.to_string(),
            "nimbus".to_string(),
        )]));

        assert!(matches!(
            unmarshal_cluster(&registry, &base),
            Err(CloudProviderError::UnknownProvider(_))
        ));
    }
}
