//! Transport Errors and Identifiers
//!
//! Shared definitions for both ends of a host/peer connection:
//! - `ConnectionId`: identifies one inbound peer on the host
//! - `TransportError`: every failure the channel layer can report

use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Unique identifier for an inbound peer connection
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a new connection ID from a random 64-bit value
    #[must_use]
    pub fn new() -> Self {
        use rand::Rng;
        let bytes: [u8; 8] = rand::thread_rng().gen();
        Self(format!("peer_{}", hex::encode(bytes)))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur on the transport channel
#[derive(Debug)]
pub enum TransportError {
    /// Dialing the host failed
    ConnectFailed {
        /// Address that was dialed
        addr: SocketAddr,
        /// Underlying socket error
        source: io::Error,
    },
    /// Binding the listening socket failed
    BindFailed {
        /// Address that was bound
        addr: SocketAddr,
        /// Underlying socket error
        source: io::Error,
    },
    /// The peer closed the connection
    ConnectionClosed,
    /// An operation did not finish in time
    Timeout(&'static str),
    /// Frame serialization/deserialization error
    SerializationError(String),
    /// Handshake authentication failed on either side
    AuthenticationFailed(String),
    /// The peer speaks a different wire or protocol version
    ProtocolMismatch {
        /// Version this build speaks
        ours: u16,
        /// Version the peer announced
        theirs: u16,
    },
    /// The bytes on the socket are not stance frames at all
    ForeignPeer,
    /// The host serves a different type than the one requested
    TypeMismatch {
        /// Type the peer asked for
        expected: String,
        /// Type the host is serving
        found: String,
    },
    /// The host refused the connection after authentication
    Rejected(String),
    /// A frame arrived that is not valid at this point of the exchange
    UnexpectedFrame(String),
    /// IO error from the underlying socket
    IoError(io::Error),
    /// Frame checksum mismatch - data corruption detected
    ChecksumMismatch {
        /// Expected checksum value
        expected: u32,
        /// Actual checksum value received
        actual: u32,
    },
}

impl TransportError {
    /// The socket error kind behind a dial or bind failure, if any
    #[must_use]
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::ConnectFailed { source, .. }
            | Self::BindFailed { source, .. }
            | Self::IoError(source) => Some(source.kind()),
            _ => None,
        }
    }

    /// Whether this is the "nobody is listening yet" condition of a dial
    #[must_use]
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::ConnectFailed { .. })
            && matches!(
                self.io_kind(),
                Some(io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionAborted)
            )
    }

    /// Whether a bind failed because another socket already holds the port
    #[must_use]
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, Self::BindFailed { .. })
            && self.io_kind() == Some(io::ErrorKind::AddrInUse)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed { addr, source } => write!(f, "Connect to {addr} failed: {source}"),
            Self::BindFailed { addr, source } => write!(f, "Bind to {addr} failed: {source}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout(what) => write!(f, "Timed out during {what}"),
            Self::SerializationError(msg) => write!(f, "Serialization error: {msg}"),
            Self::AuthenticationFailed(msg) => write!(f, "Authentication failed: {msg}"),
            Self::ProtocolMismatch { ours, theirs } => {
                write!(f, "Protocol mismatch: we speak v{ours}, peer speaks v{theirs}")
            }
            Self::ForeignPeer => write!(f, "Peer is not a stance endpoint"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "Host serves {found}, expected {expected}")
            }
            Self::Rejected(reason) => write!(f, "Rejected by host: {reason}"),
            Self::UnexpectedFrame(what) => write!(f, "Unexpected frame: {what}"),
            Self::IoError(e) => write!(f, "IO error: {e}"),
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "Checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
            ),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConnectFailed { source, .. }
            | Self::BindFailed { source, .. }
            | Self::IoError(source) => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::IoError(err)
    }
}
