//! Background task worker
//!
//! The task queue is not created by `construct`: the hosting process starts
//! it with `late_init` once it knows it is the host, so exactly one consumer
//! ever drains the queue. Tasks run one after another.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use stance_core::{BoxError, MethodCall, MethodError, SharedObject};
use tokio::sync::mpsc;
use tracing::info;

/// Tasks that may wait in the queue before `put_task` reports back-pressure
const QUEUE_CAPACITY: usize = 256;

/// One queued unit of work
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Task {
    /// How long the work takes
    pub seconds: u64,
    /// Printed once the work is done
    pub message: String,
}

/// Sequential worker shared between processes
pub struct Worker {
    queue: Mutex<Option<mpsc::Sender<Task>>>,
}

impl Worker {
    fn late_init(&self) -> Result<Value, MethodError> {
        let mut slot = self.queue.lock();
        if slot.is_some() {
            return Err(MethodError::failed("worker queue already started"));
        }

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(work_sequentially(rx));
        *slot = Some(tx);
        info!("Worker queue started");
        Ok(Value::Null)
    }

    fn put_task(&self, task: Task) -> Result<Value, MethodError> {
        let slot = self.queue.lock();
        let Some(tx) = slot.as_ref() else {
            return Err(MethodError::failed("worker queue not started; call late_init first"));
        };
        tx.try_send(task)
            .map_err(|e| MethodError::failed(format!("cannot queue task: {e}")))?;
        Ok(Value::Null)
    }
}

#[async_trait]
impl SharedObject for Worker {
    type Args = ();

    fn construct((): ()) -> Result<Self, BoxError> {
        Ok(Self {
            queue: Mutex::new(None),
        })
    }

    fn type_name() -> &'static str {
        "Worker"
    }

    async fn invoke(&self, call: MethodCall) -> Result<Value, MethodError> {
        match call.method.as_str() {
            "late_init" => self.late_init(),
            "put_task" => self.put_task(call.args()?),
            "getpid" => Ok(json!(std::process::id())),
            "pending" => {
                let slot = self.queue.lock();
                Ok(json!(slot
                    .as_ref()
                    .map_or(0, |tx| QUEUE_CAPACITY - tx.capacity())))
            }
            other => Err(MethodError::unknown_method(other)),
        }
    }
}

async fn work_sequentially(mut rx: mpsc::Receiver<Task>) {
    while let Some(task) = rx.recv().await {
        tokio::time::sleep(Duration::from_secs(task.seconds)).await;
        info!(seconds = task.seconds, "Task finished");
        println!("{}", task.message);
    }
}
