//! Fake and bring-your-own providers
//!
//! The fake provider backs tests and development datacenters; the
//! bring-your-own provider covers clusters whose infrastructure is
//! managed outside the control plane. Neither touches any real cloud.

use std::collections::BTreeMap;

use crds::{BringYourOwnCloudSpec, CloudSpec, Cluster, FakeCloudSpec};
use tracing::debug;

use crate::error::CloudProviderError;
use crate::CloudProvider;

const TOKEN_KEY: &str = "token";
const PRIVATE_INTERFACE_KEY: &str = "private-interface";

/// Provider for the fake cloud.
#[derive(Debug, Default)]
pub struct FakeCloudProvider;

impl CloudProvider for FakeCloudProvider {
    fn name(&self) -> &'static str {
        crds::FAKE_PROVIDER
    }

    fn initialize(
        &self,
        mut spec: CloudSpec,
        cluster_name: &str,
    ) -> Result<CloudSpec, CloudProviderError> {
        debug!(cluster = cluster_name, "initializing fake cloud");
        let fake = spec.fake.get_or_insert_with(FakeCloudSpec::default);
        if fake.token.is_none() {
            fake.token = Some(format!("fake-token-{cluster_name}"));
        }
        Ok(spec)
    }

    fn clean_up(&self, _spec: &CloudSpec) -> Result<(), CloudProviderError> {
        Ok(())
    }

    fn marshal(&self, spec: &CloudSpec) -> Result<BTreeMap<String, String>, CloudProviderError> {
        let mut out = BTreeMap::new();
        if let Some(token) = spec.fake.as_ref().and_then(|f| f.token.as_ref()) {
            out.insert(TOKEN_KEY.to_string(), token.clone());
        }
        Ok(out)
    }

    fn unmarshal(
        &self,
        annotations: &BTreeMap<String, String>,
    ) -> Result<CloudSpec, CloudProviderError> {
        Ok(CloudSpec {
            fake: Some(FakeCloudSpec {
                token: annotations.get(TOKEN_KEY).cloned(),
            }),
            ..Default::default()
        })
    }

    fn create_node_class(
        &self,
        cluster: &Cluster,
        node_version: &str,
    ) -> Result<String, CloudProviderError> {
        debug!(cluster = %cluster.name, version = node_version, "fake node class requested");
        Ok(self.node_class_name(node_version))
    }
}

/// Provider for clusters running on operator-managed infrastructure.
#[derive(Debug, Default)]
pub struct BringYourOwnCloudProvider;

impl CloudProvider for BringYourOwnCloudProvider {
    fn name(&self) -> &'static str {
        crds::BRING_YOUR_OWN_PROVIDER
    }

    fn initialize(
        &self,
        mut spec: CloudSpec,
        _cluster_name: &str,
    ) -> Result<CloudSpec, CloudProviderError> {
        spec.bringyourown
            .get_or_insert_with(BringYourOwnCloudSpec::default);
        Ok(spec)
    }

    fn clean_up(&self, _spec: &CloudSpec) -> Result<(), CloudProviderError> {
        Ok(())
    }

    fn marshal(&self, spec: &CloudSpec) -> Result<BTreeMap<String, String>, CloudProviderError> {
        let mut out = BTreeMap::new();
        if let Some(intf) = spec
            .bringyourown
            .as_ref()
            .and_then(|b| b.private_interface.as_ref())
        {
            out.insert(PRIVATE_INTERFACE_KEY.to_string(), intf.clone());
        }
        Ok(out)
    }

    fn unmarshal(
        &self,
        annotations: &BTreeMap<String, String>,
    ) -> Result<CloudSpec, CloudProviderError> {
        Ok(CloudSpec {
            bringyourown: Some(BringYourOwnCloudSpec {
                private_interface: annotations.get(PRIVATE_INTERFACE_KEY).cloned(),
            }),
            ..Default::default()
        })
    }

    fn create_node_class(
        &self,
        _cluster: &Cluster,
        node_version: &str,
    ) -> Result<String, CloudProviderError> {
        // Nodes are operator-provided; the class is purely nominal.
        Ok(self.node_class_name(node_version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_initialize_is_idempotent() {
        let provider = FakeCloudProvider;
        let spec = CloudSpec {
            datacenter: "fake-dc".to_string(),
            fake: Some(FakeCloudSpec::default()),
            ..Default::default()
        };

        let once = provider.initialize(spec, "c1").unwrap();
        let twice = provider.initialize(once.clone(), "c1").unwrap();
        assert_eq!(once, twice);
        assert_eq!(
            once.fake.unwrap().token.as_deref(),
            Some("fake-token-c1")
        );
    }

    #[test]
    fn fake_spec_round_trips_annotations() {
        let provider = FakeCloudProvider;
        let spec = provider
            .initialize(CloudSpec::default(), "c2")
            .unwrap();

        let annotations = provider.marshal(&spec).unwrap();
        let back = provider.unmarshal(&annotations).unwrap();
        assert_eq!(back.fake, spec.fake);
    }
}
