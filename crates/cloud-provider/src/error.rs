//! Cloud provider error types.

use thiserror::Error;

/// Errors from provider dispatch and the annotation codec.
#[derive(Debug, Error)]
pub enum CloudProviderError {
    /// The cloud spec carries no provider sub-spec.
    #[error("cloud spec has no provider set")]
    NoProviderSet,

    /// The named provider is not registered.
    #[error("unknown cloud provider: {0}")]
    UnknownProvider(String),

    /// A controller-owned annotation the codec needs is missing.
    #[error("missing annotation: {0}")]
    MissingAnnotation(String),

    /// An annotation value did not decode.
    #[error("invalid annotation {key}: {reason}")]
    InvalidAnnotation { key: String, reason: String },

    /// The backing CR is structurally unusable (for example no name).
    #[error("malformed cluster resource: {0}")]
    MalformedResource(String),
}
