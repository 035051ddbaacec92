//! Cloud provider spec variants
//!
//! One optional sub-spec per supported back-end. Exactly one of the
//! provider fields is set on a valid spec; the provider name is derived
//! from whichever field is present.

use serde::{Deserialize, Serialize};

/// Provider name for the fake (testing) cloud.
pub const FAKE_PROVIDER: &str = "fake";
/// Provider name for bring-your-own infrastructure.
pub const BRING_YOUR_OWN_PROVIDER: &str = "bringyourown";
/// Provider name for Amazon Web Services.
pub const AWS_PROVIDER: &str = "aws";
/// Provider name for DigitalOcean.
pub const DIGITALOCEAN_PROVIDER: &str = "digitalocean";
/// Provider name for OpenStack.
pub const OPENSTACK_PROVIDER: &str = "openstack";
/// Provider name for bare-metal datacenters.
pub const BARE_METAL_PROVIDER: &str = "baremetal";

/// Access data for a cloud back-end, tagged with the datacenter the
/// tenant cluster lives in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudSpec {
    /// Datacenter where the cluster's infrastructure lives.
    #[serde(rename = "dc")]
    pub datacenter: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fake: Option<FakeCloudSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bringyourown: Option<BringYourOwnCloudSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsCloudSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digitalocean: Option<DigitaloceanCloudSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openstack: Option<OpenstackCloudSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baremetal: Option<BareMetalCloudSpec>,
}

impl CloudSpec {
    /// Name of the provider this spec addresses, if any sub-spec is set.
    pub fn provider_name(&self) -> Option<&'static str> {
        if self.fake.is_some() {
            Some(FAKE_PROVIDER)
        } else if self.bringyourown.is_some() {
            Some(BRING_YOUR_OWN_PROVIDER)
        } else if self.aws.is_some() {
            Some(AWS_PROVIDER)
        } else if self.digitalocean.is_some() {
            Some(DIGITALOCEAN_PROVIDER)
        } else if self.openstack.is_some() {
            Some(OPENSTACK_PROVIDER)
        } else if self.baremetal.is_some() {
            Some(BARE_METAL_PROVIDER)
        } else {
            None
        }
    }
}

/// Access data for the fake cloud, used in tests and development.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FakeCloudSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Access data for a bring-your-own cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BringYourOwnCloudSpec {
    /// Private interface the nodes talk over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_interface: Option<String>,
}

/// Access data for Amazon Web Services.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AwsCloudSpec {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub subnet_id: String,
    #[serde(default)]
    pub availability_zone: String,
}

/// Access data for DigitalOcean.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitaloceanCloudSpec {
    /// API token used to authenticate with the DigitalOcean API.
    pub token: String,
    /// SSH key fingerprints deployed to nodes at provisioning time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<String>,
}

/// Access data for an OpenStack cloud.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OpenstackCloudSpec {
    pub username: String,
    pub password: String,
    pub tenant: String,
    pub domain: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub floating_ip_pool: String,
}

/// Access data for a bare-metal datacenter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BareMetalCloudSpec {
    pub name: String,
}
