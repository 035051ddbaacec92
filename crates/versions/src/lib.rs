//! Master version catalogue and upgrade path resolution
//!
//! Holds the externally loaded version and update lists, resolves
//! declared update edges into a graph, and answers two questions:
//! which sequence of updates leads from one version to another
//! (`UpdatePathSearch`), and which automatic update a cluster on a
//! given version should jump to (`best_automatic_update`).

pub mod automatic;
pub mod config;
pub mod error;
pub mod graph;
pub mod matcher;
pub mod types;

pub use automatic::best_automatic_update;
pub use config::{default_master_version, load_updates, load_versions};
pub use error::VersionError;
pub use graph::UpdatePathSearch;
pub use matcher::{EqualityMatcher, Matcher, SemverMatcher};
pub use types::{MasterUpdate, MasterVersion};
