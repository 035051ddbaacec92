//! Control plane error types.

use thiserror::Error;

/// Errors from seed cluster API calls.
///
/// Status codes the reconcile loops branch on (404, 409) get their own
/// variants; everything else stays wrapped.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The addressed object does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The write lost an optimistic concurrency race.
    #[error("conflicting write to {0}")]
    Conflict(String),

    /// A create hit an object that already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// An object handed to a write call carries no name.
    #[error("{0} has no name")]
    Unnamed(String),

    /// Any other API failure.
    #[error("api error on {what}: {source}")]
    Api {
        what: String,
        #[source]
        source: kube::Error,
    },
}

impl ControlError {
    /// True for a 404 from the API server.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlError::NotFound(_))
    }

    /// True for an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControlError::Conflict(_))
    }

    /// True for a create that raced with another writer.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ControlError::AlreadyExists(_))
    }

    pub(crate) fn from_kube(err: kube::Error, what: impl Into<String>) -> Self {
        let what = what.into();
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => ControlError::NotFound(what),
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                ControlError::AlreadyExists(what)
            }
            kube::Error::Api(resp) if resp.code == 409 => ControlError::Conflict(what),
            _ => ControlError::Api { what, source: err },
        }
    }
}
