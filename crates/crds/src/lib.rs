//! Clusterops CRD Definitions
//!
//! Kubernetes Custom Resource Definitions and the cluster domain model
//! used by the cluster controller.

pub mod cloud;
pub mod cluster;
pub mod etcd;

pub use cloud::*;
pub use cluster::*;
pub use etcd::*;
