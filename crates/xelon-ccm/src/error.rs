//! Error types for the cloud controller manager
//!
//! Every failure carries an [`ErrorKind`] so callers branch on the kind of
//! condition instead of comparing error values.

use std::time::Duration;

use strum::Display;
use thiserror::Error;
use xelon_api::ApiError;

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The resource does not exist (yet). Often means "nothing to do".
    NotFound,
    /// The cloud is still provisioning the resource; retry later.
    Provisioning,
    /// No eligible load balancer cluster or virtual IP was found.
    Unavailable,
    /// The operation would need a capability this controller does not have.
    Unsupported,
    Other,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{resource} {id:?} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("load balancer cluster {cluster_id} is being provisioned")]
    Provisioning { cluster_id: String },

    /// Retryable condition with a suggested delay for the caller.
    #[error("{message} (retry in {}s)", delay.as_secs())]
    Retry { message: String, delay: Duration },

    #[error("{message}")]
    Unavailable { message: String },

    #[error("unsupported: {message}")]
    Unsupported { message: String },

    #[error("load balancer cluster {cluster_id} is not active (current status: {status:?})")]
    Inactive { cluster_id: String, status: String },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("kubernetes error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid provider id {0:?}")]
    InvalidProviderId(String),

    /// The operation failed and persisting the annotations afterwards failed too.
    #[error("{source}; persisting service annotations also failed: {patch}")]
    PersistFailed {
        #[source]
        source: Box<Error>,
        patch: Box<Error>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Provisioning { .. } | Error::Retry { .. } => ErrorKind::Provisioning,
            Error::Unavailable { .. } => ErrorKind::Unavailable,
            Error::Unsupported { .. } => ErrorKind::Unsupported,
            Error::PersistFailed { source, .. } => source.kind(),
            _ => ErrorKind::Other,
        }
    }

    /// Suggested delay before the caller retries, if this error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Retry { delay, .. } => Some(*delay),
            Error::PersistFailed { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Error::Unavailable {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::Unsupported {
            message: message.into(),
        }
    }

    /// Map a cloud API 404 to [`Error::NotFound`], pass everything else through.
    pub fn from_api(err: ApiError, resource: &'static str, id: &str) -> Self {
        if err.is_not_found() {
            Error::not_found(resource, id)
        } else {
            Error::Api(err)
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
