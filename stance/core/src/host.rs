//! Remote Object Host
//!
//! Holds the listening socket for a port and the single instance served on
//! it. Every inbound connection gets its own dispatch task:
//!
//! ```text
//!                       RemoteHost
//!                 (TcpListener 127.0.0.1:port)
//!                            │
//!          ┌─────────────────┼─────────────────┐
//!          │                 │                 │
//!     peer task 1       peer task 2       peer task 3
//!          │                 │                 │
//!          └──── Arc<S>::invoke (concurrent) ──┘
//! ```
//!
//! Calls from different peers, and pipelined calls from one peer, may run
//! concurrently against the instance. Serializing them is the hosted type's
//! business.
//!
//! The listener lives inside the accept task; dropping the `RemoteHost`
//! aborts that task and every peer task, which releases the port.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn, Instrument};

use crate::config::StanceConfig;
use crate::object::{MethodCall, MethodError, MethodErrorKind, SharedObject};
use crate::secret::DerivedToken;
use crate::transport::{
    auth, bounded, ConnectionId, FramedChannel, HostFrame, PeerFrame, TransportError,
};

/// Pause after a failed `accept` so a persistent error does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Replies buffered per peer before call tasks wait on the writer
const REPLY_CAPACITY: usize = 64;

/// State shared by the accept loop and every peer task
struct HostContext<S> {
    object: Arc<S>,
    token: DerivedToken,
    type_name: &'static str,
    handshake_timeout: Duration,
    max_connections: usize,
    connections: Arc<DashMap<ConnectionId, AbortHandle>>,
}

impl<S> HostContext<S> {
    fn live_connections(&self) -> usize {
        self.connections.retain(|_, handle| !handle.is_finished());
        self.connections.len()
    }
}

/// Serves one instance of `S` on a bound port
pub struct RemoteHost<S: SharedObject> {
    local_addr: SocketAddr,
    object: Arc<S>,
    connections: Arc<DashMap<ConnectionId, AbortHandle>>,
    accept_task: JoinHandle<()>,
}

impl<S: SharedObject> RemoteHost<S> {
    /// Bind `addr` and start serving `object`
    ///
    /// # Errors
    ///
    /// Returns `TransportError::BindFailed` if the port cannot be bound,
    /// typically `AddrInUse` because another process holds it.
    pub async fn bind(
        addr: SocketAddr,
        token: DerivedToken,
        object: Arc<S>,
        config: &StanceConfig,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::BindFailed { addr, source })?;
        let local_addr = listener.local_addr()?;

        let connections = Arc::new(DashMap::new());
        let ctx = Arc::new(HostContext {
            object: Arc::clone(&object),
            token,
            type_name: S::type_name(),
            handshake_timeout: config.handshake_timeout(),
            max_connections: config.max_connections,
            connections: Arc::clone(&connections),
        });

        info!(
            addr = %local_addr,
            type_name = ctx.type_name,
            token = %ctx.token.fingerprint(),
            "Hosting shared instance"
        );

        let span = tracing::info_span!("host", port = local_addr.port());
        let accept_task = tokio::spawn(accept_loop(listener, ctx).instrument(span));

        Ok(Self {
            local_addr,
            object,
            connections,
            accept_task,
        })
    }

    /// Address the listener is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The served instance
    #[must_use]
    pub fn object(&self) -> &Arc<S> {
        &self.object
    }

    /// Number of peers currently connected
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.retain(|_, handle| !handle.is_finished());
        self.connections.len()
    }

    /// Stop serving and wait until the port is released
    pub async fn shutdown(mut self) {
        self.abort_all();
        // The listener is owned by the accept task; once it has finished the
        // socket is closed.
        if let Err(e) = (&mut self.accept_task).await {
            if !e.is_cancelled() {
                warn!(error = %e, "Accept loop ended abnormally");
            }
        }
        info!(addr = %self.local_addr, "Host shut down");
    }

    fn abort_all(&self) {
        self.accept_task.abort();
        for entry in self.connections.iter() {
            entry.value().abort();
        }
        self.connections.clear();
    }
}

impl<S: SharedObject> Drop for RemoteHost<S> {
    fn drop(&mut self) {
        self.abort_all();
    }
}

impl<S: SharedObject> std::fmt::Debug for RemoteHost<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHost")
            .field("local_addr", &self.local_addr)
            .field("type_name", &S::type_name())
            .finish_non_exhaustive()
    }
}

async fn accept_loop<S: SharedObject>(listener: TcpListener, ctx: Arc<HostContext<S>>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        if ctx.live_connections() >= ctx.max_connections {
            warn!(%peer, max = ctx.max_connections, "Connection limit reached, refusing peer");
            tokio::spawn(refuse(stream));
            continue;
        }

        let conn_id = ConnectionId::new();
        let span = tracing::info_span!("peer", conn_id = %conn_id, %peer);
        let task_ctx = Arc::clone(&ctx);
        let task_id = conn_id.clone();
        let task = tokio::spawn(
            async move {
                match serve_peer(stream, &task_ctx).await {
                    Ok(()) => debug!("Peer disconnected"),
                    Err(e) => warn!(error = %e, "Peer connection ended with error"),
                }
                task_ctx.connections.remove(&task_id);
            }
            .instrument(span),
        );
        ctx.connections.insert(conn_id, task.abort_handle());
    }
}

async fn refuse(stream: TcpStream) {
    if let Ok(mut channel) = FramedChannel::new(stream) {
        let frame = HostFrame::Rejected {
            reason: "host is at its connection limit".to_string(),
        };
        if let Err(e) = channel.send(&frame).await {
            debug!(error = %e, "Could not deliver refusal");
        }
    }
}

async fn serve_peer<S: SharedObject>(
    stream: TcpStream,
    ctx: &HostContext<S>,
) -> Result<(), TransportError> {
    let mut channel = FramedChannel::new(stream)?;

    bounded(
        ctx.handshake_timeout,
        "handshake",
        auth::challenge_peer(&mut channel, &ctx.token),
    )
    .await?;
    bounded(
        ctx.handshake_timeout,
        "instance fetch",
        bind_instance(&mut channel, ctx.type_name),
    )
    .await?;
    debug!("Peer authenticated");

    let (mut reader, mut writer) = channel.into_split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<HostFrame>(REPLY_CAPACITY);

    let read_calls = async {
        loop {
            let frame = match reader.recv::<PeerFrame>().await {
                Ok(frame) => frame,
                Err(TransportError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            };

            let (call_id, method, args) = match frame {
                PeerFrame::Call {
                    call_id,
                    method,
                    args,
                } => (call_id, method, args),
                other => return Err(TransportError::UnexpectedFrame(format!("{other:?}"))),
            };

            let object = Arc::clone(&ctx.object);
            let reply_tx = reply_tx.clone();
            tokio::spawn(
                async move {
                    let outcome = dispatch(object.as_ref(), MethodCall { method, args }).await;
                    if reply_tx
                        .send(HostFrame::Reply {
                            call_id,
                            outcome: outcome.into(),
                        })
                        .await
                        .is_err()
                    {
                        debug!(call_id, "Peer left before the reply was sent");
                    }
                }
                .in_current_span(),
            );
        }
    };

    let write_replies = async {
        while let Some(frame) = reply_rx.recv().await {
            writer.send(&frame).await?;
        }
        Ok::<(), TransportError>(())
    };

    tokio::select! {
        result = read_calls => result,
        result = write_replies => result,
    }
}

/// Answer the peer's `Fetch` with the type this host serves
///
/// A peer asking for a different type gets the real name back and is
/// expected to hang up.
async fn bind_instance(
    channel: &mut FramedChannel,
    type_name: &'static str,
) -> Result<(), TransportError> {
    let wanted = match channel.recv::<PeerFrame>().await? {
        PeerFrame::Fetch { type_name } => type_name,
        other => return Err(TransportError::UnexpectedFrame(format!("{other:?}"))),
    };

    channel
        .send(&HostFrame::Instance {
            type_name: type_name.to_string(),
        })
        .await?;

    if wanted != type_name {
        return Err(TransportError::TypeMismatch {
            expected: wanted,
            found: type_name.to_string(),
        });
    }
    Ok(())
}

/// Invoke one method, turning a panic into a reported failure
pub(crate) async fn dispatch<S: SharedObject>(
    object: &S,
    call: MethodCall,
) -> Result<Value, MethodError> {
    let method = call.method.clone();
    debug!(%method, "Dispatching call");

    match AssertUnwindSafe(object.invoke(call)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            warn!(%method, %detail, "Hosted method panicked");
            Err(MethodError::new(
                MethodErrorKind::Panicked,
                format!("{method}: {detail}"),
            ))
        }
    }
}
