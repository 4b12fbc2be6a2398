//! Stance Demo
//!
//! Example programs for sharing one object between processes. Run the same
//! command in two terminals: the first becomes the host and stays up, the
//! second connects, calls a few methods and exits.
//!
//! # Usage
//!
//! ```bash
//! # Terminal 1: hosts a counter starting at 100
//! stance-demo counter
//!
//! # Terminal 2: increments the shared counter and prints it
//! stance-demo counter
//!
//! # Two counters on two ports
//! stance-demo two-counters
//!
//! # Hand a five second task to the shared worker
//! stance-demo worker --seconds 5 --message "Work done!"
//!
//! # With verbose logging
//! RUST_LOG=debug stance-demo counter
//! ```
//!
//! # Environment Variables
//!
//! - `STANCE_PORT`: port pinning the shared object (default: 17310)
//! - `STANCE_SECRET`: pass-phrase shared by host and clients
//! - `STANCE_CONFIG`: configuration file path
//! - `STANCE_*`: see `StanceConfig::from_env`
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

mod counter;
mod worker;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use stance_core::{load_config_from_path, Coordinator, SharedObject, StanceConfig};
use tracing::info;

use counter::Counter;
use worker::Worker;

/// Default port, shared by every subcommand
const DEFAULT_PORT: u16 = 17310;

#[derive(Parser, Debug)]
#[command(name = "stance-demo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "STANCE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Pass-phrase shared by host and clients
    #[arg(short = 's', long, env = "STANCE_SECRET")]
    secret: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host a counter, or increment the one already hosted
    Counter {
        /// Port pinning the counter
        #[arg(short, long, env = "STANCE_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Starting value, used only if this process hosts
        #[arg(long, default_value_t = 100)]
        start: i64,
    },

    /// Two independent counters on neighbouring ports
    TwoCounters {
        /// Port of the first counter; the second uses the next port
        #[arg(short, long, env = "STANCE_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Host a sequential task worker, or queue a task on it
    Worker {
        /// Port pinning the worker
        #[arg(short, long, env = "STANCE_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Duration of the queued task
        #[arg(long, default_value_t = 3)]
        seconds: u64,

        /// Printed by the host when the task completes
        #[arg(long, default_value = "Work done!")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stance_demo=info".parse()?)
                .add_directive("stance_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let config = match args.config {
        Some(path) => load_config_from_path(Some(path))?,
        None => stance_core::load_config()?,
    };
    let secret = args.secret.as_deref();

    match args.command {
        Command::Counter { port, start } => run_counter(port, secret, config, start).await,
        Command::TwoCounters { port } => run_two_counters(port, secret, config).await,
        Command::Worker {
            port,
            seconds,
            message,
        } => run_worker(port, secret, config, seconds, message).await,
    }
}

async fn register<S: SharedObject>(
    port: u16,
    secret: Option<&str>,
    config: StanceConfig,
    args: S::Args,
) -> anyhow::Result<Coordinator<S>> {
    let mut coordinator = Coordinator::with_config(port, secret, config)?;
    coordinator
        .register(args)
        .await
        .with_context(|| format!("Failed to obtain the shared {} on port {port}", S::type_name()))?;
    info!(coordinator = ?coordinator, "Registered");
    Ok(coordinator)
}

async fn serve_until_interrupted<S: SharedObject>(
    coordinator: Coordinator<S>,
) -> anyhow::Result<()> {
    println!("Hosting on port {}, press Ctrl-C to stop...", coordinator.port());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    coordinator.shutdown().await;
    Ok(())
}

async fn run_counter(
    port: u16,
    secret: Option<&str>,
    config: StanceConfig,
    start: i64,
) -> anyhow::Result<()> {
    let coordinator = register::<Counter>(port, secret, config, start).await?;
    if coordinator.created_new_instance()? {
        return serve_until_interrupted(coordinator).await;
    }

    let counter = coordinator
        .instance()
        .context("registered coordinator has no instance")?;
    counter.call::<_, ()>("increment", ()).await?;
    let count: i64 = counter.call("get_count", ()).await?;
    println!("{count}");
    Ok(())
}

async fn run_two_counters(
    port: u16,
    secret: Option<&str>,
    config: StanceConfig,
) -> anyhow::Result<()> {
    let second_port = port
        .checked_add(1)
        .context("the second counter needs the port after --port")?;

    let first = register::<Counter>(port, secret, config.clone(), 0).await?;
    let second = register::<Counter>(second_port, secret, config, 100).await?;

    if first.created_new_instance()? {
        // The second counter is served from here too while we wait
        let _second = second;
        return serve_until_interrupted(first).await;
    }

    let counter1 = first.instance().context("first counter missing")?;
    let counter2 = second.instance().context("second counter missing")?;

    counter1.call::<_, ()>("increment", ()).await?;
    counter2.call::<_, ()>("increment", ()).await?;
    counter2.call::<_, ()>("increment", ()).await?;

    let pid1: u32 = counter1.call("getpid", ()).await?;
    let count1: i64 = counter1.call("get_count", ()).await?;
    let pid2: u32 = counter2.call("getpid", ()).await?;
    let count2: i64 = counter2.call("get_count", ()).await?;

    println!("script PID: {}", std::process::id());
    println!("counter1 PID: {pid1} | value: {count1}");
    println!("counter2 PID: {pid2} | value: {count2}");
    Ok(())
}

async fn run_worker(
    port: u16,
    secret: Option<&str>,
    config: StanceConfig,
    seconds: u64,
    message: String,
) -> anyhow::Result<()> {
    let coordinator = register::<Worker>(port, secret, config, ()).await?;
    let worker = coordinator
        .instance()
        .context("registered coordinator has no instance")?;

    if coordinator.created_new_instance()? {
        // Only the creating process may start the queue
        worker.call::<_, ()>("late_init", ()).await?;
        return serve_until_interrupted(coordinator).await;
    }

    worker
        .call::<_, ()>(
            "put_task",
            serde_json::json!({ "seconds": seconds, "message": message }),
        )
        .await?;
    let pid: u32 = worker.call("getpid", ()).await?;
    println!("Task handed over to worker with PID {pid}!");
    Ok(())
}
