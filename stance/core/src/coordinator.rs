//! Coordinator: connect-or-create state machine
//!
//! Each process builds a `Coordinator` for a type and a port, then calls
//! [`Coordinator::register`]. The first process to bind the port becomes the
//! host and constructs the instance; every other process connects to it.
//!
//! ```text
//!                 ┌──────────────┐
//!                 │ Unregistered │
//!                 └──────┬───────┘
//!                        │ dial
//!          ok ┌──────────┴──────────┐ refused / aborted
//!             ▼                     ▼
//!        ┌────────┐        construct + bind
//!        │ Client │◄──┐    ok │        │ AddrInUse (race lost)
//!        └────────┘   │       ▼        ▼
//!                     │  ┌──────┐   sleep retry_delay
//!                     │  │ Host │      │
//!                     │  └──────┘      │ dial once more (fatal on error)
//!                     └────────────────┘
//! ```
//!
//! The listening bind is the lock: the OS lets exactly one socket listen on
//! the port, so whoever binds first is the host. No lock file or registry is
//! involved. A single delayed retry absorbs the window where two processes
//! both find nobody listening and both try to bind.
//!
//! Once registered the state never changes; `register` returns the cached
//! handle without touching the network.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::StanceConfig;
use crate::error::{CallError, CoordinationError};
use crate::host::{self, RemoteHost};
use crate::object::{MethodCall, SharedObject};
use crate::proxy::RemoteProxy;
use crate::secret::DerivedToken;
use crate::transport::TransportError;

/// Handle returned by [`Coordinator::register`]
///
/// Both variants take the same path through [`SharedObject::invoke`], with
/// arguments and results encoded as JSON, so a call gives the same answer
/// whether this process hosts the instance or not.
pub enum Instance<S: SharedObject> {
    /// This process constructed and hosts the instance
    Hosted(Arc<S>),
    /// The instance lives in another process
    Remote(RemoteProxy),
}

impl<S: SharedObject> Instance<S> {
    /// Call `method` with serializable `args` and decode the result
    ///
    /// # Errors
    ///
    /// See [`CallError`].
    pub async fn call<A, R>(&self, method: &str, args: A) -> Result<R, CallError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let call = MethodCall::new(method, args).map_err(|source| CallError::Encode {
            method: method.to_string(),
            source,
        })?;
        let value = self.call_value(call).await?;
        serde_json::from_value(value).map_err(|source| CallError::Decode {
            method: method.to_string(),
            source,
        })
    }

    /// Call with a prepared [`MethodCall`] and return the raw JSON result
    pub async fn call_value(&self, call: MethodCall) -> Result<Value, CallError> {
        match self {
            Self::Hosted(object) => host::dispatch(object.as_ref(), call)
                .await
                .map_err(CallError::Method),
            Self::Remote(proxy) => proxy.call(call).await,
        }
    }

    /// The local object, when this process is the host
    #[must_use]
    pub fn local(&self) -> Option<&Arc<S>> {
        match self {
            Self::Hosted(object) => Some(object),
            Self::Remote(_) => None,
        }
    }

    /// The proxy, when another process is the host
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteProxy> {
        match self {
            Self::Hosted(_) => None,
            Self::Remote(proxy) => Some(proxy),
        }
    }

    /// Whether this process hosts the instance
    #[must_use]
    pub fn is_hosted(&self) -> bool {
        matches!(self, Self::Hosted(_))
    }
}

impl<S: SharedObject> Clone for Instance<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Hosted(object) => Self::Hosted(Arc::clone(object)),
            Self::Remote(proxy) => Self::Remote(proxy.clone()),
        }
    }
}

impl<S: SharedObject> fmt::Debug for Instance<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hosted(_) => write!(f, "Instance::Hosted({})", S::type_name()),
            Self::Remote(proxy) => write!(f, "Instance::Remote({proxy:?})"),
        }
    }
}

/// Which role registration produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// `register` has not succeeded yet
    Unregistered,
    /// Connected to another process's instance
    Client,
    /// Constructed the instance and serves it
    Host,
}

enum Registration<S: SharedObject> {
    Unregistered,
    Client {
        instance: Instance<S>,
    },
    Host {
        instance: Instance<S>,
        // Holds the port; dropping it stops serving
        host: RemoteHost<S>,
    },
}

/// Obtains the single shared instance of `S` pinned to a port
pub struct Coordinator<S: SharedObject> {
    port: u16,
    token: DerivedToken,
    config: StanceConfig,
    registration: Registration<S>,
}

impl<S: SharedObject> Coordinator<S> {
    /// Coordinator with default configuration
    ///
    /// `secret` falls back to [`DEFAULT_SECRET`](crate::secret::DEFAULT_SECRET).
    ///
    /// # Errors
    ///
    /// Returns `CoordinationError::InvalidPort` for port 0.
    pub fn new(port: u16, secret: Option<&str>) -> Result<Self, CoordinationError> {
        Self::with_config(port, secret, StanceConfig::default())
    }

    /// Coordinator with explicit configuration
    ///
    /// # Errors
    ///
    /// Returns `CoordinationError::InvalidPort` for port 0 and
    /// `CoordinationError::InvalidConfig` if `config` fails validation.
    pub fn with_config(
        port: u16,
        secret: Option<&str>,
        config: StanceConfig,
    ) -> Result<Self, CoordinationError> {
        if port == 0 {
            return Err(CoordinationError::InvalidPort(port));
        }
        config.validate()?;
        Ok(Self {
            port,
            token: DerivedToken::derive(port, secret),
            config,
            registration: Registration::Unregistered,
        })
    }

    /// Build a coordinator and register in one step
    ///
    /// # Errors
    ///
    /// Any error from [`Coordinator::new`] or [`Coordinator::register`].
    pub async fn create(
        port: u16,
        secret: Option<&str>,
        args: S::Args,
    ) -> Result<Self, CoordinationError> {
        let mut coordinator = Self::new(port, secret)?;
        coordinator.register(args).await?;
        Ok(coordinator)
    }

    /// Connect to the existing instance or become its host
    ///
    /// `args` are only used if this process ends up constructing the
    /// instance. After the first success this returns the cached handle and
    /// does no network activity.
    ///
    /// # Errors
    ///
    /// - `Construction` if `S::construct` fails
    /// - `Transport` for any dial or bind failure outside the documented
    ///   refused → host → retry sequence (authentication, protocol, type
    ///   mismatch, timeouts)
    /// - `RetryFailed` if the bind was lost to another process and the
    ///   single retried dial failed as well
    pub async fn register(&mut self, args: S::Args) -> Result<&Instance<S>, CoordinationError> {
        if matches!(self.registration, Registration::Unregistered) {
            self.registration = self.resolve(args).await?;
        } else {
            debug!(port = self.port, "Already registered, construction arguments ignored");
        }
        self.instance().ok_or(CoordinationError::Unregistered)
    }

    async fn resolve(&self, args: S::Args) -> Result<Registration<S>, CoordinationError> {
        let port = self.port;

        match self.dial().await {
            Ok(proxy) => {
                info!(port, "Connected to existing instance");
                return Ok(Registration::Client {
                    instance: Instance::Remote(proxy),
                });
            }
            // Expected while nobody hosts the port; not worth more than debug
            Err(e) if e.is_refused() => {
                debug!(port, error = %e, "No host listening, attempting to host");
            }
            Err(source) => return Err(CoordinationError::Transport { port, source }),
        }

        let object = S::construct(args).map_err(|source| CoordinationError::Construction {
            type_name: S::type_name(),
            source,
        })?;
        let object = Arc::new(object);

        match RemoteHost::bind(
            self.config.socket_addr(port),
            self.token.clone(),
            Arc::clone(&object),
            &self.config,
        )
        .await
        {
            Ok(host) => {
                info!(port, type_name = S::type_name(), "Became host");
                Ok(Registration::Host {
                    instance: Instance::Hosted(object),
                    host,
                })
            }
            Err(e) if e.is_addr_in_use() => {
                warn!(
                    port,
                    retry_delay_ms = self.config.retry_delay_ms,
                    "Lost the race to host, retrying as client"
                );
                drop(object);
                tokio::time::sleep(self.config.retry_delay()).await;

                let proxy = self
                    .dial()
                    .await
                    .map_err(|source| CoordinationError::RetryFailed { port, source })?;
                info!(port, "Connected to the race winner");
                Ok(Registration::Client {
                    instance: Instance::Remote(proxy),
                })
            }
            Err(source) => Err(CoordinationError::Transport { port, source }),
        }
    }

    async fn dial(&self) -> Result<RemoteProxy, TransportError> {
        RemoteProxy::dial(
            self.config.socket_addr(self.port),
            &self.token,
            S::type_name(),
            &self.config,
        )
        .await
    }

    /// Whether this process constructed the instance
    ///
    /// # Errors
    ///
    /// Returns `CoordinationError::Unregistered` before a successful
    /// `register`.
    pub fn created_new_instance(&self) -> Result<bool, CoordinationError> {
        match self.registration {
            Registration::Unregistered => Err(CoordinationError::Unregistered),
            Registration::Client { .. } => Ok(false),
            Registration::Host { .. } => Ok(true),
        }
    }

    /// [`created_new_instance`](Self::created_new_instance) with `None`
    /// instead of an error
    #[must_use]
    pub fn is_new(&self) -> Option<bool> {
        self.created_new_instance().ok()
    }

    /// The registered handle, if any
    #[must_use]
    pub fn instance(&self) -> Option<&Instance<S>> {
        match &self.registration {
            Registration::Unregistered => None,
            Registration::Client { instance } | Registration::Host { instance, .. } => {
                Some(instance)
            }
        }
    }

    /// The host guard, when this process serves the instance
    #[must_use]
    pub fn host(&self) -> Option<&RemoteHost<S>> {
        match &self.registration {
            Registration::Host { host, .. } => Some(host),
            _ => None,
        }
    }

    /// Current role
    #[must_use]
    pub fn state(&self) -> RegistrationState {
        match self.registration {
            Registration::Unregistered => RegistrationState::Unregistered,
            Registration::Client { .. } => RegistrationState::Client,
            Registration::Host { .. } => RegistrationState::Host,
        }
    }

    /// Port that pins the instance
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Loggable prefix of the derived token
    #[must_use]
    pub fn token_fingerprint(&self) -> String {
        self.token.fingerprint()
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &StanceConfig {
        &self.config
    }

    /// Stop hosting (if hosting) and wait for the port to be released
    ///
    /// Dropping the coordinator releases the port as well; this variant
    /// waits until the listener is actually closed.
    pub async fn shutdown(self) {
        if let Registration::Host { host, .. } = self.registration {
            host.shutdown().await;
        }
    }
}

impl<S: SharedObject> fmt::Debug for Coordinator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let is_new = match self.is_new() {
            Some(true) => "true",
            Some(false) => "false",
            None => "None",
        };
        write!(
            f,
            "<Stance cls=\"{}\" port={} secret={} is_new={}>",
            S::type_name(),
            self.port,
            self.token.fingerprint(),
            is_new
        )
    }
}
