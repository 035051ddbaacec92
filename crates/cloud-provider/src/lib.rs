//! Cloud provider back-ends
//!
//! Defines the `CloudProvider` trait each back-end implements, the
//! provider registry the controller dispatches through, and the codec
//! that persists a cluster's credentials and cloud access data as CR
//! annotations.
//!
//! Only the fake and bring-your-own providers are implemented here;
//! real infrastructure drivers live out of tree and plug in through
//! the same trait.

pub mod codec;
pub mod error;
pub mod fake;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crds::{CloudSpec, Cluster};

pub use codec::{marshal_cluster, unmarshal_cluster};
pub use error::CloudProviderError;
pub use fake::{BringYourOwnCloudProvider, FakeCloudProvider};

/// A cloud back-end the controller can provision tenant clusters on.
///
/// `initialize` must be idempotent: reconcile passes may call it
/// repeatedly with the spec it previously returned. `marshal` and
/// `unmarshal` translate the provider's portion of a cloud spec to and
/// from flat annotation key suffixes; the codec prefixes them with the
/// provider namespace. Neither is self-concurrency-safe, callers
/// serialize codec access.
pub trait CloudProvider: Send + Sync {
    /// Registry name of this provider.
    fn name(&self) -> &'static str;

    /// Prepares provider-side infrastructure for a cluster and returns
    /// the possibly enriched spec.
    fn initialize(&self, spec: CloudSpec, cluster_name: &str)
        -> Result<CloudSpec, CloudProviderError>;

    /// Tears down provider-side infrastructure of a cluster.
    fn clean_up(&self, spec: &CloudSpec) -> Result<(), CloudProviderError>;

    /// Encodes the provider's part of the spec into annotation suffixes.
    fn marshal(&self, spec: &CloudSpec) -> Result<BTreeMap<String, String>, CloudProviderError>;

    /// Decodes the provider's part of the spec from annotation suffixes.
    fn unmarshal(
        &self,
        annotations: &BTreeMap<String, String>,
    ) -> Result<CloudSpec, CloudProviderError>;

    /// Name of the node class for worker nodes of the given version.
    fn node_class_name(&self, node_version: &str) -> String {
        format!("{}-{}", self.name(), node_version.replace('.', "-"))
    }

    /// Ensures a node class for worker nodes of the given version
    /// exists and returns its name.
    fn create_node_class(
        &self,
        cluster: &Cluster,
        node_version: &str,
    ) -> Result<String, CloudProviderError>;
}

/// Registry of available providers, keyed by provider name.
pub type CloudRegistry = HashMap<&'static str, Arc<dyn CloudProvider>>;

/// Builds the registry of in-tree providers.
pub fn default_registry() -> CloudRegistry {
    let mut registry: CloudRegistry = HashMap::new();
    let fake = Arc::new(FakeCloudProvider::default());
    let byo = Arc::new(BringYourOwnCloudProvider::default());
    registry.insert(fake.name(), fake);
    registry.insert(byo.name(), byo);
    registry
}

/// Looks up the provider responsible for a cloud spec.
pub fn provider_for<'r>(
    registry: &'r CloudRegistry,
    spec: &CloudSpec,
) -> Result<&'r Arc<dyn CloudProvider>, CloudProviderError> {
    let name = spec
        .provider_name()
        .ok_or(CloudProviderError::NoProviderSet)?;
    registry
        .get(name)
        .ok_or_else(|| CloudProviderError::UnknownProvider(name.to_string()))
}
