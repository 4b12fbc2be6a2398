//! Coordinator and call errors
//!
//! Callers of the coordinator only ever see [`CoordinationError`]; the
//! transport taxonomy stays underneath as its source. Method calls made
//! after registration report [`CallError`].

use thiserror::Error;

use crate::config::ConfigError;
use crate::object::{BoxError, MethodError};
use crate::transport::TransportError;

/// Failure to obtain the shared instance
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Port 0 cannot pin an identity
    #[error("port must be a positive integer, got {0}")]
    InvalidPort(u16),

    /// The configuration would make dialing or hosting fail
    #[error("invalid coordinator configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// An instance-dependent operation ran before `register` succeeded
    #[error("instance has not yet been registered")]
    Unregistered,

    /// The hosted type could not be constructed
    #[error("failed to construct {type_name}: {source}")]
    Construction {
        /// Type that failed
        type_name: &'static str,
        /// Error returned by `SharedObject::construct`
        #[source]
        source: BoxError,
    },

    /// Unexpected transport fault while dialing or hosting
    #[error("coordination failed on port {port}: {source}")]
    Transport {
        /// Port being coordinated
        port: u16,
        /// Underlying failure
        #[source]
        source: TransportError,
    },

    /// Lost the race to bind and the single retry to connect failed too
    #[error("lost the race to host port {port} and could not connect to the winner: {source}")]
    RetryFailed {
        /// Port being coordinated
        port: u16,
        /// Failure of the retried dial
        #[source]
        source: TransportError,
    },
}

impl CoordinationError {
    /// The transport failure underneath, if any
    #[must_use]
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport { source, .. } | Self::RetryFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Failure of one method call on an [`Instance`](crate::Instance)
#[derive(Debug, Error)]
pub enum CallError {
    /// The hosted method reported a failure
    #[error(transparent)]
    Method(#[from] MethodError),

    /// Arguments could not be serialized
    #[error("failed to encode arguments for {method}: {source}")]
    Encode {
        /// Method being called
        method: String,
        /// Serialization failure
        #[source]
        source: serde_json::Error,
    },

    /// Return value did not have the expected shape
    #[error("failed to decode result of {method}: {source}")]
    Decode {
        /// Method being called
        method: String,
        /// Deserialization failure
        #[source]
        source: serde_json::Error,
    },

    /// The channel to the host failed
    #[error("call transport failed: {0}")]
    Transport(#[from] TransportError),
}
