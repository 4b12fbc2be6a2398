//! Integration tests for connect-or-create coordination
//!
//! Every test runs host and clients inside one process on a fresh loopback
//! port. Tests cover:
//! - Host/client role assignment and shared state
//! - Construction arguments ignored on the client path
//! - Identical results for local and remote calls
//! - Method failures propagated across the connection
//! - Authentication and type checks during the handshake

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::task::JoinSet;

use common::{fast_config, free_port, Counter, Ledger};
use stance_core::{
    CallError, CoordinationError, Coordinator, MethodCall, MethodErrorKind, RegistrationState,
    StanceConfig, TransportError,
};

// =============================================================================
// Roles and shared state
// =============================================================================

#[tokio::test]
async fn test_host_and_client_share_one_counter() {
    let port = free_port().await;

    let host = Coordinator::<Counter>::create(port, None, 100).await.unwrap();
    let client = Coordinator::<Counter>::create(port, None, 0).await.unwrap();

    assert_eq!(host.is_new(), Some(true));
    assert_eq!(client.is_new(), Some(false));
    assert_eq!(host.state(), RegistrationState::Host);
    assert_eq!(client.state(), RegistrationState::Client);

    let remote = client.instance().unwrap();
    let first: i64 = remote.call("increment", ()).await.unwrap();
    let second: i64 = remote.call("increment", ()).await.unwrap();
    assert_eq!((first, second), (101, 102));

    let local = host.instance().unwrap().local().unwrap();
    assert_eq!(local.value(), 102);

    assert_eq!(host.host().unwrap().local_addr().port(), port);
    assert!(client.host().is_none());
}

#[tokio::test]
async fn test_invalid_config_never_reaches_the_host() {
    let port = free_port().await;
    let mut host = Coordinator::<Counter>::with_config(port, None, fast_config()).unwrap();
    assert_eq!(host.config().retry_delay_ms, fast_config().retry_delay_ms);
    host.register(1).await.unwrap();

    for config in [
        StanceConfig {
            channel_capacity: 0,
            ..fast_config()
        },
        StanceConfig {
            max_connections: 0,
            ..fast_config()
        },
    ] {
        let err = Coordinator::<Counter>::with_config(port, None, config).unwrap_err();
        assert!(
            matches!(err, CoordinationError::InvalidConfig(_)),
            "unexpected error: {err}"
        );
    }
    assert_eq!(host.host().unwrap().connection_count(), 0);
}

#[tokio::test]
async fn test_client_construction_args_are_ignored() {
    let port = free_port().await;

    let _host = Coordinator::<Counter>::create(port, None, 7).await.unwrap();
    let client = Coordinator::<Counter>::create(port, None, 999).await.unwrap();

    let count: i64 = client
        .instance()
        .unwrap()
        .call("get_count", ())
        .await
        .unwrap();
    assert_eq!(count, 7);
}

#[tokio::test]
async fn test_register_is_idempotent() {
    let port = free_port().await;
    let mut coordinator = Coordinator::<Counter>::new(port, None).unwrap();

    assert!(coordinator.register(5).await.unwrap().is_hosted());
    // Second call must not construct again or touch the network
    assert!(coordinator.register(500).await.unwrap().is_hosted());

    let count: i64 = coordinator
        .instance()
        .unwrap()
        .call("get_count", ())
        .await
        .unwrap();
    assert_eq!(count, 5);
    assert!(coordinator.created_new_instance().unwrap());
}

#[tokio::test]
async fn test_unregistered_coordinator_reports_error() {
    let coordinator = Coordinator::<Counter>::new(free_port().await, None).unwrap();

    let err = coordinator.created_new_instance().unwrap_err();
    assert_eq!(err.to_string(), "instance has not yet been registered");
    assert_eq!(coordinator.is_new(), None);
    assert!(coordinator.instance().is_none());
}

#[tokio::test]
async fn test_different_ports_are_independent() {
    let (port_a, port_b) = (free_port().await, free_port().await);
    assert_ne!(port_a, port_b);

    let host_a = Coordinator::<Counter>::create(port_a, None, 0).await.unwrap();
    let host_b = Coordinator::<Counter>::create(port_b, None, 50).await.unwrap();
    assert_eq!(host_a.is_new(), Some(true));
    assert_eq!(host_b.is_new(), Some(true));

    let client_a = Coordinator::<Counter>::create(port_a, None, 0).await.unwrap();
    let _: i64 = client_a
        .instance()
        .unwrap()
        .call("increment", ())
        .await
        .unwrap();

    assert_eq!(host_a.instance().unwrap().local().unwrap().value(), 1);
    assert_eq!(host_b.instance().unwrap().local().unwrap().value(), 50);
}

#[tokio::test]
async fn test_debug_render_reflects_role() {
    let port = free_port().await;
    let host = Coordinator::<Counter>::create(port, Some("PASSWORD"), 0)
        .await
        .unwrap();

    assert_eq!(
        format!("{host:?}"),
        format!(
            "<Stance cls=\"Counter\" port={port} secret={} is_new=true>",
            host.token_fingerprint()
        )
    );
}

// =============================================================================
// Calls
// =============================================================================

#[tokio::test]
async fn test_local_and_remote_calls_agree() {
    let port = free_port().await;
    let host = Coordinator::<Counter>::create(port, None, 0).await.unwrap();
    let client = Coordinator::<Counter>::create(port, None, 0).await.unwrap();

    let local: i64 = host.instance().unwrap().call("add", (2, 40)).await.unwrap();
    let remote: i64 = client
        .instance()
        .unwrap()
        .call("add", (2, 40))
        .await
        .unwrap();
    assert_eq!(local, 42);
    assert_eq!(local, remote);

    let local_pid: u32 = host.instance().unwrap().call("getpid", ()).await.unwrap();
    let remote_pid: u32 = client
        .instance()
        .unwrap()
        .call("getpid", ())
        .await
        .unwrap();
    assert_eq!(local_pid, remote_pid);
}

#[tokio::test]
async fn test_method_failures_cross_the_connection() {
    let port = free_port().await;
    let _host = Coordinator::<Counter>::create(port, None, 0).await.unwrap();
    let client = Coordinator::<Counter>::create(port, None, 0).await.unwrap();
    let remote = client.instance().unwrap();

    match remote.call::<_, Value>("rename", ()).await {
        Err(CallError::Method(e)) => {
            assert_eq!(e.kind, MethodErrorKind::UnknownMethod);
            assert_eq!(e.message, "rename");
        }
        other => panic!("expected unknown method, got {other:?}"),
    }

    match remote.call::<_, Value>("fail", ()).await {
        Err(CallError::Method(e)) => {
            assert_eq!(e.kind, MethodErrorKind::Failed);
            assert_eq!(e.message, "asked to fail");
        }
        other => panic!("expected method failure, got {other:?}"),
    }

    match remote.call::<_, Value>("add", json!(["two", 2])).await {
        Err(CallError::Method(e)) => assert_eq!(e.kind, MethodErrorKind::InvalidArguments),
        other => panic!("expected invalid arguments, got {other:?}"),
    }
}

#[tokio::test]
async fn test_panicking_method_leaves_connection_usable() {
    let port = free_port().await;
    let _host = Coordinator::<Counter>::create(port, None, 10).await.unwrap();
    let client = Coordinator::<Counter>::create(port, None, 0).await.unwrap();
    let remote = client.instance().unwrap();

    match remote.call::<_, Value>("panic", ()).await {
        Err(CallError::Method(e)) => {
            assert_eq!(e.kind, MethodErrorKind::Panicked);
            assert!(e.message.contains("counter exploded"));
        }
        other => panic!("expected panic report, got {other:?}"),
    }

    let count: i64 = remote.call("increment", ()).await.unwrap();
    assert_eq!(count, 11);
}

#[tokio::test]
async fn test_pipelined_calls_from_many_tasks() {
    let port = free_port().await;
    let host = Coordinator::<Counter>::create(port, None, 0).await.unwrap();
    let client = Coordinator::<Counter>::create(port, None, 0).await.unwrap();
    let remote = client.instance().unwrap().clone();

    let mut tasks = JoinSet::new();
    for _ in 0..50 {
        let remote = remote.clone();
        tasks.spawn(async move { remote.call::<_, i64>("increment", ()).await });
    }

    let mut seen = Vec::new();
    while let Some(result) = tasks.join_next().await {
        seen.push(result.unwrap().unwrap());
    }
    seen.sort_unstable();

    assert_eq!(seen, (1..=50).collect::<Vec<i64>>());
    assert_eq!(host.instance().unwrap().local().unwrap().value(), 50);
}

#[tokio::test]
async fn test_slow_call_does_not_block_others() {
    let port = free_port().await;
    let _host = Coordinator::<Counter>::create(port, None, 0).await.unwrap();
    let client = Coordinator::<Counter>::create(port, None, 0).await.unwrap();
    let remote = client.instance().unwrap().clone();

    let slow = {
        let remote = remote.clone();
        tokio::spawn(async move {
            remote
                .call_value(MethodCall::new("slow", (300u64,)).unwrap())
                .await
        })
    };

    let started = std::time::Instant::now();
    let count: i64 = remote.call("increment", ()).await.unwrap();
    assert_eq!(count, 1);
    assert!(started.elapsed() < std::time::Duration::from_millis(300));

    assert_eq!(slow.await.unwrap().unwrap(), json!(300));
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_wrong_passphrase_is_refused() {
    let port = free_port().await;
    let host = Coordinator::<Counter>::create(port, Some("alpha"), 0)
        .await
        .unwrap();

    let err = Coordinator::<Counter>::with_config(port, Some("beta"), fast_config())
        .unwrap()
        .register(0)
        .await
        .unwrap_err();

    match err {
        CoordinationError::Transport { port: p, source } => {
            assert_eq!(p, port);
            assert!(
                matches!(source, TransportError::AuthenticationFailed(_)),
                "unexpected source: {source}"
            );
        }
        other => panic!("expected transport failure, got {other}"),
    }

    // The host keeps serving peers that know the passphrase
    let client = Coordinator::<Counter>::create(port, Some("alpha"), 0)
        .await
        .unwrap();
    assert_eq!(client.is_new(), Some(false));
    assert_eq!(host.is_new(), Some(true));
}

#[tokio::test]
async fn test_default_and_explicit_secret_match() {
    let port = free_port().await;
    let _host = Coordinator::<Counter>::create(port, None, 0).await.unwrap();

    let client = Coordinator::<Counter>::create(port, Some(stance_core::DEFAULT_SECRET), 0)
        .await
        .unwrap();
    assert_eq!(client.is_new(), Some(false));
}

#[tokio::test]
async fn test_type_mismatch_is_reported() {
    let port = free_port().await;
    let _host = Coordinator::<Counter>::create(port, None, 0).await.unwrap();

    let err = Coordinator::<Ledger>::with_config(port, None, fast_config())
        .unwrap()
        .register(())
        .await
        .unwrap_err();

    match err.transport() {
        Some(TransportError::TypeMismatch { expected, found }) => {
            assert_eq!(expected, "Ledger");
            assert_eq!(found, "Counter");
        }
        other => panic!("expected type mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_construction_failure_leaves_port_free() {
    let port = free_port().await;
    let mut coordinator = Coordinator::<Counter>::new(port, None).unwrap();

    let err = coordinator.register(-1).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinationError::Construction {
            type_name: "Counter",
            ..
        }
    ));
    assert_eq!(coordinator.state(), RegistrationState::Unregistered);

    // Nothing was bound, so a later attempt can still host
    let host = coordinator.register(3).await.unwrap();
    let local = Arc::clone(host.local().unwrap());
    assert_eq!(local.value(), 3);
}
