//! Host/peer message vocabulary
//!
//! A connection moves through three phases, each with its own frames:
//!
//! ```text
//!   Host                                   Peer
//!    │── Challenge { version, nonce } ─────►│
//!    │◄──── Answer { version, digest, nonce }│   authentication
//!    │── Accepted { digest } / Rejected ───►│
//!    │◄──────────────── Fetch { type_name } │   factory binding
//!    │── Instance { type_name } / Rejected ►│
//!    │◄──────── Call { call_id, method, .. }│   method calls
//!    │── Reply { call_id, outcome } ───────►│
//! ```
//!
//! Nonces and digests travel hex-encoded.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::object::MethodError;

/// Message-level protocol version, checked during the handshake
pub const PROTOCOL_VERSION: u16 = 1;

/// Identifier correlating a `Call` with its `Reply`
pub type CallId = u64;

/// Frames sent by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostFrame {
    /// First frame on every connection
    Challenge {
        /// Host protocol version
        version: u16,
        /// Random nonce the peer must sign
        nonce: String,
    },
    /// Peer authenticated; carries the host's proof of the same token
    Accepted {
        /// HMAC of the peer's nonce
        digest: String,
    },
    /// Connection refused; the host closes right after sending this
    Rejected {
        /// Human-readable reason
        reason: String,
    },
    /// Reference to the served instance
    Instance {
        /// Type the host is serving
        type_name: String,
    },
    /// Result of one method call
    Reply {
        /// Call this reply answers
        call_id: CallId,
        /// Return value or propagated failure
        outcome: CallOutcome,
    },
}

/// Frames sent by the peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerFrame {
    /// Response to the host's challenge
    Answer {
        /// Peer protocol version
        version: u16,
        /// HMAC of the host's nonce
        digest: String,
        /// Nonce the host must sign in return
        nonce: String,
    },
    /// Ask for the served instance
    Fetch {
        /// Type the peer expects to find
        type_name: String,
    },
    /// Invoke a method on the served instance
    Call {
        /// Correlation id, unique per connection
        call_id: CallId,
        /// Method name
        method: String,
        /// Positional (array) or keyword (object) arguments
        args: Value,
    },
}

/// Result of one remote invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Method returned a value
    Value(Value),
    /// Method failed
    Failure(MethodError),
}

impl From<Result<Value, MethodError>> for CallOutcome {
    fn from(result: Result<Value, MethodError>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(err) => Self::Failure(err),
        }
    }
}

impl From<CallOutcome> for Result<Value, MethodError> {
    fn from(outcome: CallOutcome) -> Self {
        match outcome {
            CallOutcome::Value(value) => Ok(value),
            CallOutcome::Failure(err) => Err(err),
        }
    }
}
