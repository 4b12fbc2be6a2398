//! Remote Proxy
//!
//! Client side of a host connection. After the handshake and the instance
//! fetch, the stream is split into a writer task fed by an mpsc channel and
//! a reader task that routes each `Reply` to the call waiting for it:
//!
//! ```text
//!   call() ──► outbound mpsc ──► writer task ──► TcpStream ──► host
//!     ▲                                                          │
//!     └──── oneshot ◄── pending[call_id] ◄── reader task ◄───────┘
//! ```
//!
//! Every call waits for its own reply; nothing is cached on this side. When
//! the connection drops, all waiting and future calls fail with
//! `TransportError::ConnectionClosed`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::config::StanceConfig;
use crate::error::CallError;
use crate::object::{MethodCall, MethodError};
use crate::secret::DerivedToken;
use crate::transport::{
    auth, bounded, CallId, CallOutcome, FramedChannel, FramedReader, FramedWriter, HostFrame,
    PeerFrame, TransportError,
};

type PendingCalls = DashMap<CallId, oneshot::Sender<CallOutcome>>;

/// Link state shared by the proxy handle and its IO tasks
struct Link {
    connected: AtomicBool,
    pending: PendingCalls,
}

impl Link {
    /// Mark the link dead and fail every waiting call
    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the senders wakes each waiter with a RecvError
        self.pending.clear();
    }
}

struct ProxyInner {
    host_addr: SocketAddr,
    type_name: String,
    next_call_id: AtomicU64,
    outbound: mpsc::Sender<PeerFrame>,
    link: Arc<Link>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

/// Handle to an instance served by another process
///
/// Cheap to clone; clones share one connection. The proxy has no say over
/// the instance's lifetime.
#[derive(Clone)]
pub struct RemoteProxy {
    inner: Arc<ProxyInner>,
}

impl RemoteProxy {
    /// Dial the host at `addr`, authenticate and fetch its instance
    ///
    /// # Errors
    ///
    /// - `ConnectFailed` if nobody accepts the connection
    /// - `AuthenticationFailed` / `Rejected` if the host refuses the token
    /// - `TypeMismatch` if the host serves another type
    /// - `Timeout` if any phase exceeds its configured limit
    pub async fn dial(
        addr: SocketAddr,
        token: &DerivedToken,
        type_name: &str,
        config: &StanceConfig,
    ) -> Result<Self, TransportError> {
        let stream = bounded(config.connect_timeout(), "connect", async {
            TcpStream::connect(addr)
                .await
                .map_err(|source| TransportError::ConnectFailed { addr, source })
        })
        .await?;

        let mut channel = FramedChannel::new(stream)?;
        bounded(
            config.handshake_timeout(),
            "handshake",
            auth::answer_challenge(&mut channel, token),
        )
        .await?;
        bounded(
            config.handshake_timeout(),
            "instance fetch",
            fetch_instance(&mut channel, type_name),
        )
        .await?;

        info!(host = %addr, type_name, "Connected to shared instance");

        let (reader, writer) = channel.into_split();
        // A zero capacity would panic inside tokio; validated configs never have one
        let (outbound, outbound_rx) = mpsc::channel(config.channel_capacity.max(1));
        let link = Arc::new(Link {
            connected: AtomicBool::new(true),
            pending: DashMap::new(),
        });

        let span = tracing::info_span!("proxy", host = %addr);
        let reader_task =
            tokio::spawn(read_replies(reader, Arc::clone(&link)).instrument(span.clone()));
        let writer_task =
            tokio::spawn(write_calls(writer, outbound_rx, Arc::clone(&link)).instrument(span));

        Ok(Self {
            inner: Arc::new(ProxyInner {
                host_addr: addr,
                type_name: type_name.to_string(),
                next_call_id: AtomicU64::new(1),
                outbound,
                link,
                reader_task,
                writer_task,
            }),
        })
    }

    /// Forward one call and wait for the host's reply
    ///
    /// # Errors
    ///
    /// `CallError::Method` carries the hosted method's own failure;
    /// `CallError::Transport` means the connection is gone.
    pub async fn call(&self, call: MethodCall) -> Result<Value, CallError> {
        let inner = &self.inner;
        let call_id = inner.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();

        // Register before checking the link so a concurrent close() cannot
        // slip between the check and the insert.
        inner.link.pending.insert(call_id, reply_tx);
        if !inner.link.connected.load(Ordering::SeqCst) {
            inner.link.pending.remove(&call_id);
            return Err(TransportError::ConnectionClosed.into());
        }

        debug!(call_id, method = %call.method, "Forwarding call");
        let frame = PeerFrame::Call {
            call_id,
            method: call.method,
            args: call.args,
        };
        if inner.outbound.send(frame).await.is_err() {
            inner.link.pending.remove(&call_id);
            return Err(TransportError::ConnectionClosed.into());
        }

        match reply_rx.await {
            Ok(outcome) => Result::<Value, MethodError>::from(outcome).map_err(CallError::Method),
            Err(_) => Err(TransportError::ConnectionClosed.into()),
        }
    }

    /// Whether the connection to the host is still up
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.link.connected.load(Ordering::SeqCst)
    }

    /// Address of the host
    #[must_use]
    pub fn host_addr(&self) -> SocketAddr {
        self.inner.host_addr
    }

    /// Type served by the host
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }
}

impl std::fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("host_addr", &self.inner.host_addr)
            .field("type_name", &self.inner.type_name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn fetch_instance(
    channel: &mut FramedChannel,
    type_name: &str,
) -> Result<(), TransportError> {
    channel
        .send(&PeerFrame::Fetch {
            type_name: type_name.to_string(),
        })
        .await?;

    match channel.recv::<HostFrame>().await? {
        HostFrame::Instance { type_name: found } if found == type_name => Ok(()),
        HostFrame::Instance { type_name: found } => Err(TransportError::TypeMismatch {
            expected: type_name.to_string(),
            found,
        }),
        HostFrame::Rejected { reason } => Err(TransportError::Rejected(reason)),
        other => Err(TransportError::UnexpectedFrame(format!("{other:?}"))),
    }
}

async fn read_replies(mut reader: FramedReader, link: Arc<Link>) {
    loop {
        match reader.recv::<HostFrame>().await {
            Ok(HostFrame::Reply { call_id, outcome }) => {
                match link.pending.remove(&call_id) {
                    Some((_, waiter)) => {
                        // The caller may have given up; nothing to do then
                        let _ = waiter.send(outcome);
                    }
                    None => debug!(call_id, "Reply for unknown call"),
                }
            }
            Ok(other) => {
                warn!(frame = ?other, "Unexpected frame from host");
                break;
            }
            Err(TransportError::ConnectionClosed) => {
                info!("Host closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Read error");
                break;
            }
        }
    }
    link.close();
}

async fn write_calls(
    mut writer: FramedWriter,
    mut outbound: mpsc::Receiver<PeerFrame>,
    link: Arc<Link>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = writer.send(&frame).await {
            warn!(error = %e, "Write error");
            link.close();
            return;
        }
    }
}
