//! Hosted types and helpers shared by the integration suites

#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use stance_core::{async_trait, BoxError, MethodCall, MethodError, SharedObject, StanceConfig};
use tokio::net::TcpListener;

/// Counter starting at the construction argument
pub struct Counter {
    count: AtomicI64,
}

impl Counter {
    pub fn value(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SharedObject for Counter {
    type Args = i64;

    fn construct(start: i64) -> Result<Self, BoxError> {
        if start < 0 {
            return Err(format!("counter cannot start below zero, got {start}").into());
        }
        Ok(Self {
            count: AtomicI64::new(start),
        })
    }

    fn type_name() -> &'static str {
        "Counter"
    }

    async fn invoke(&self, call: MethodCall) -> Result<Value, MethodError> {
        match call.method.as_str() {
            "increment" => Ok(json!(self.count.fetch_add(1, Ordering::SeqCst) + 1)),
            "get_count" => Ok(json!(self.value())),
            "add" => {
                let (a, b): (i64, i64) = call.args()?;
                Ok(json!(a + b))
            }
            "getpid" => Ok(json!(std::process::id())),
            "fail" => Err(MethodError::failed("asked to fail")),
            "panic" => panic!("counter exploded"),
            "slow" => {
                let (ms,): (u64,) = call.args()?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!(ms))
            }
            other => Err(MethodError::unknown_method(other)),
        }
    }
}

/// Unrelated type used to provoke type mismatches
pub struct Ledger {
    entries: AtomicUsize,
}

#[async_trait]
impl SharedObject for Ledger {
    type Args = ();

    fn construct((): ()) -> Result<Self, BoxError> {
        Ok(Self {
            entries: AtomicUsize::new(0),
        })
    }

    fn type_name() -> &'static str {
        "Ledger"
    }

    async fn invoke(&self, call: MethodCall) -> Result<Value, MethodError> {
        match call.method.as_str() {
            "len" => Ok(json!(self.entries.load(Ordering::SeqCst))),
            other => Err(MethodError::unknown_method(other)),
        }
    }
}

/// A port nothing listens on right now
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Defaults with short delays so failure paths finish quickly
pub fn fast_config() -> StanceConfig {
    StanceConfig {
        retry_delay_ms: 100,
        connect_timeout_ms: 1000,
        handshake_timeout_ms: 1000,
        ..StanceConfig::default()
    }
}
