//! Version handling error types.

use thiserror::Error;

/// Errors from version catalogue loading and graph search.
#[derive(Debug, Error)]
pub enum VersionError {
    /// A version id referenced by a search is not in the catalogue.
    #[error("unknown version: {0}")]
    UnknownVersion(String),

    /// No sequence of update edges connects the two versions.
    #[error("no update path from {from} to {to}")]
    NoPath { from: String, to: String },

    /// The version list has no entry flagged as default.
    #[error("no default master version configured")]
    NoDefaultVersion,

    /// A version id or range expression did not parse.
    #[error("invalid version expression {expr:?}: {reason}")]
    InvalidExpression { expr: String, reason: String },

    /// Version or update list file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Version or update list file did not deserialize.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
