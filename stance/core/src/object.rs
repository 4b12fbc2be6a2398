//! Hosted Object Contract
//!
//! Any type served through a [`Coordinator`](crate::Coordinator) implements
//! [`SharedObject`]. Method calls arrive as a name plus JSON arguments,
//! whether they come from a remote peer or from the hosting process itself,
//! so both sides observe identical results.
//!
//! The host gives no concurrency control: calls from different peers may run
//! at the same time, so implementations use interior mutability (atomics,
//! mutexes) for their state.

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boxed error returned by [`SharedObject::construct`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A type whose single live instance is shared across processes
///
/// # Example
///
/// ```ignore
/// struct Counter(AtomicI64);
///
/// #[async_trait]
/// impl SharedObject for Counter {
///     type Args = i64;
///
///     fn construct(start: i64) -> Result<Self, BoxError> {
///         Ok(Self(AtomicI64::new(start)))
///     }
///
///     async fn invoke(&self, call: MethodCall) -> Result<Value, MethodError> {
///         match call.method.as_str() {
///             "increment" => Ok(json!(self.0.fetch_add(1, Ordering::SeqCst) + 1)),
///             "get_count" => Ok(json!(self.0.load(Ordering::SeqCst))),
///             other => Err(MethodError::unknown_method(other)),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait SharedObject: Send + Sync + 'static {
    /// Construction arguments, only used by the process that becomes host
    type Args: Send + 'static;

    /// Build the instance. Runs once, in the hosting process.
    fn construct(args: Self::Args) -> Result<Self, BoxError>
    where
        Self: Sized;

    /// Name checked when a peer fetches the instance
    fn type_name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }

    /// Dispatch one method call
    async fn invoke(&self, call: MethodCall) -> Result<Value, MethodError>;
}

/// One method invocation: name plus positional or keyword arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    /// Method name
    pub method: String,
    /// Array for positional arguments, object for keyword arguments
    pub args: Value,
}

impl MethodCall {
    /// Build a call from any serializable argument value
    ///
    /// # Errors
    ///
    /// Returns the serialization error if `args` cannot become JSON.
    pub fn new<A: Serialize>(
        method: impl Into<String>,
        args: A,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            method: method.into(),
            args: serde_json::to_value(args)?,
        })
    }

    /// A call without arguments
    #[must_use]
    pub fn bare(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Value::Array(Vec::new()),
        }
    }

    /// Decode the arguments into the shape the method expects
    ///
    /// # Errors
    ///
    /// Returns `MethodErrorKind::InvalidArguments` naming the method.
    pub fn args<T: DeserializeOwned>(&self) -> Result<T, MethodError> {
        T::deserialize(&self.args).map_err(|e| {
            MethodError::invalid_arguments(format!("{}: {e}", self.method))
        })
    }
}

/// Category of a failed invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodErrorKind {
    /// No method with that name
    UnknownMethod,
    /// Arguments did not match the method's signature
    InvalidArguments,
    /// The method ran and reported a failure
    Failed,
    /// The method panicked on the host
    Panicked,
}

impl fmt::Display for MethodErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::UnknownMethod => "unknown method",
            Self::InvalidArguments => "invalid arguments",
            Self::Failed => "method failed",
            Self::Panicked => "method panicked",
        };
        f.write_str(label)
    }
}

/// Failure of a hosted method, propagated unchanged to remote callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct MethodError {
    /// Failure category
    pub kind: MethodErrorKind,
    /// Detail for the caller
    pub message: String,
}

impl MethodError {
    /// Create an error of any kind
    #[must_use]
    pub fn new(kind: MethodErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// No such method
    #[must_use]
    pub fn unknown_method(method: &str) -> Self {
        Self::new(MethodErrorKind::UnknownMethod, method)
    }

    /// Arguments could not be decoded
    #[must_use]
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(MethodErrorKind::InvalidArguments, message)
    }

    /// The method reported a failure
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(MethodErrorKind::Failed, message)
    }
}
