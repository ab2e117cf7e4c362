//! Error types for the pgcluster operator
//!
//! Errors are structured with fields so that a failure can be attributed to a
//! cluster, an object kind or a store call when it shows up in logs or status.
//! The variants fall into three classes that drive the requeue decision:
//! fatal spec errors, retryable store errors, and everything else.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for pgcluster operations
#[derive(Debug, Error)]
pub enum Error {
    /// The cluster specification is semantically invalid; no retry fixes it
    #[error("invalid spec for {cluster}: {message}")]
    SpecInvalid {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.instances[1].name")
        field: Option<String>,
    },

    /// Optimistic concurrency conflict on a store write
    #[error("conflict on {kind} {name}: {message}")]
    StoreConflict {
        /// Kind of the object being written
        kind: String,
        /// Name of the object being written
        name: String,
        /// Message returned by the store
        message: String,
    },

    /// The store could not be reached or is temporarily failing
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        /// Description of what failed
        message: String,
    },

    /// The object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Name of the missing object
        name: String,
    },

    /// An object with the intended name is controlled by someone else
    #[error("{kind} {name} is controlled by {owner}")]
    OwnershipConflict {
        /// Kind of the contested object
        kind: String,
        /// Name of the contested object
        name: String,
        /// Description of the current controller
        owner: String,
    },

    /// A retrieved object did not have the expected shape
    #[error("failed to decode {kind}: {message}")]
    Decode {
        /// Kind the object was decoded as
        kind: String,
        /// Description of the mismatch
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// An operation ran past its deadline
    #[error("timed out after {elapsed:?} waiting for {operation}")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// How long we waited
        elapsed: Duration,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "store")
        context: String,
    },
}

impl Error {
    /// Create a spec validation error with cluster context and field path
    pub fn spec_invalid_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::SpecInvalid {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a store conflict error
    pub fn store_conflict(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::StoreConflict {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a store unavailable error
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: msg.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an ownership conflict error
    pub fn ownership_conflict(
        kind: impl Into<String>,
        name: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self::OwnershipConflict {
            kind: kind.into(),
            name: name.into(),
            owner: owner.into(),
        }
    }

    /// Create a decode error for an object retrieved as the given kind
    pub fn decode(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Decode {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Classify a kube client error raised while operating on `kind`/`name`
    ///
    /// 404 maps to [`Error::NotFound`], 409 to [`Error::StoreConflict`],
    /// 429/5xx and transport failures to [`Error::StoreUnavailable`].
    /// Any other API rejection is a non-retryable internal error.
    pub fn from_kube(kind: &str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => Self::not_found(kind, name),
                409 => Self::store_conflict(kind, name, resp.message),
                429 | 500..=599 => Self::store_unavailable(format!(
                    "{} {}: {} ({})",
                    kind, name, resp.message, resp.code
                )),
                code => Self::internal_with_context(
                    "kube",
                    format!("{} {} rejected with {}: {}", kind, name, code, resp.message),
                ),
            },
            kube::Error::SerdeError(e) => Self::serialization_for(kind, e.to_string()),
            other => Self::store_unavailable(format!("{} {}: {}", kind, name, other)),
        }
    }

    /// Returns true if a later pass may succeed without a spec change
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreConflict { .. }
            | Self::StoreUnavailable { .. }
            | Self::NotFound { .. }
            | Self::Timeout { .. } => true,
            Self::SpecInvalid { .. }
            | Self::OwnershipConflict { .. }
            | Self::Decode { .. }
            | Self::Serialization { .. }
            | Self::Internal { .. } => false,
        }
    }

    /// Returns true if this error can only be resolved by editing the spec
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SpecInvalid { .. })
    }

    /// Returns true for [`Error::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Self::from_kube(UNKNOWN_CONTEXT, UNKNOWN_CONTEXT, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
