//! Stance Core - One Shared Instance per Port
//!
//! Processes on the same machine obtain a single shared instance of a type,
//! pinned to a TCP port. The first process to ask constructs the instance and
//! hosts it; every later process connects to it and forwards method calls.
//! No process is designated in advance and nothing is written to disk: the
//! operating system's "one listener per port" rule decides who hosts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────── process A (host) ────────────────┐
//! │  Coordinator ──► Instance::Hosted(Arc<Counter>)  │
//! │                        ▲                         │
//! │                  RemoteHost (127.0.0.1:port)     │
//! └────────────────────────┼─────────────────────────┘
//!              authenticated frames (HMAC, CRC32)
//! ┌────────────────────────┼─────────────────────────┐
//! │                  RemoteProxy                     │
//! │  Coordinator ──► Instance::Remote(proxy)         │
//! └──────────────── process B (client) ──────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Coordinator`]: connect-or-create state machine for one type and port
//! - [`Instance`]: handle whose method calls behave the same on both sides
//! - [`SharedObject`]: contract a hosted type implements
//! - [`StanceConfig`]: timeouts, retry delay and limits
//!
//! # Quick Start
//!
//! ```ignore
//! use stance_core::Coordinator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut coordinator = Coordinator::<Counter>::new(17310, None)?;
//!     let counter = coordinator.register(100).await?;
//!
//!     let count: i64 = counter.call("increment", ()).await?;
//!     println!("count = {count}, host = {:?}", coordinator.is_new());
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`coordinator`]: registration and the instance handle
//! - [`host`]: serves the instance on the bound port
//! - [`proxy`]: forwards calls to another process's instance
//! - [`object`]: hosted object contract and method errors
//! - [`secret`]: port-scoped token derivation
//! - [`transport`]: frame codec, handshake and channel
//! - [`config`]: configuration loading
//! - [`error`]: coordination and call errors

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod object;
pub mod proxy;
pub mod secret;
pub mod transport;

pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, StanceConfig,
};
pub use coordinator::{Coordinator, Instance, RegistrationState};
pub use error::{CallError, CoordinationError};
pub use host::RemoteHost;
pub use object::{BoxError, MethodCall, MethodError, MethodErrorKind, SharedObject};
pub use proxy::RemoteProxy;
pub use secret::{DerivedToken, DEFAULT_SECRET};
pub use transport::TransportError;

// Hosted types implement `SharedObject` with this attribute
pub use async_trait::async_trait;
