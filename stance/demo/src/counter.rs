//! Shared counter

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use stance_core::{BoxError, MethodCall, MethodError, SharedObject};

/// Counter whose starting value is chosen by the hosting process
pub struct Counter {
    count: AtomicI64,
}

#[async_trait]
impl SharedObject for Counter {
    type Args = i64;

    fn construct(start_value: i64) -> Result<Self, BoxError> {
        Ok(Self {
            count: AtomicI64::new(start_value),
        })
    }

    fn type_name() -> &'static str {
        "Counter"
    }

    async fn invoke(&self, call: MethodCall) -> Result<Value, MethodError> {
        match call.method.as_str() {
            "increment" => {
                self.count.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
            "get_count" => Ok(json!(self.count.load(Ordering::SeqCst))),
            "getpid" => Ok(json!(std::process::id())),
            other => Err(MethodError::unknown_method(other)),
        }
    }
}
