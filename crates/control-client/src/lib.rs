//! Seed cluster API access
//!
//! The `ControlPlane` trait is the controller's only door to the seed
//! cluster: typed reads, writes and watches for the TenantCluster CR
//! and the control-plane sub-resources living in per-cluster
//! namespaces. `KubeControlPlane` backs it with a real API server;
//! `MockControlPlane` (behind the `test-util` feature) backs it with
//! in-memory maps for tests.

pub mod api;
pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use api::{ControlPlane, WatchEvent};
pub use client::KubeControlPlane;
pub use error::ControlError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockControlPlane, RecordedEvent};
