//! Transport Layer for Host/Peer IPC
//!
//! An authenticated, bidirectional frame channel over a loopback TCP socket
//! bound to a fixed port:
//! - [`frame`]: header + CRC32 + JSON wire format
//! - [`protocol`]: the frames exchanged in each connection phase
//! - [`auth`]: mutual HMAC challenge/response on the derived token
//! - [`channel`]: `TcpStream` wrapped with the codec
//!
//! # Security
//!
//! - Hosts bind the loopback interface by default
//! - Every connection must prove knowledge of the port-scoped token
//! - Frame size is capped before any payload buffer is allocated

use std::future::Future;
use std::time::Duration;

pub mod auth;
pub mod channel;
pub mod frame;
pub mod protocol;
pub mod traits;

pub use channel::{FramedChannel, FramedReader, FramedWriter};
pub use frame::FrameDecoder;
pub use protocol::{CallId, CallOutcome, HostFrame, PeerFrame, PROTOCOL_VERSION};
pub use traits::{ConnectionId, TransportError};

/// Run `fut`, failing with `TransportError::Timeout(what)` after `limit`
pub(crate) async fn bounded<T, F>(
    limit: Duration,
    what: &'static str,
    fut: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransportError::Timeout(what))?
}
