//! Server startup and shutdown.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Behaviour, TestBackend};
use sshgate::prelude::*;

#[tokio::test]
async fn stop_before_any_connection() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend.clone()).await;
    assert_eq!(running.lifecycle.state(), LifecycleState::Running);

    running.server.stop().await;

    assert!(running.task.await.unwrap().is_ok());
    assert_eq!(running.lifecycle.state(), LifecycleState::Stopped);
    assert_eq!(backend.events.count("server shutdown"), 1);
}

#[tokio::test]
async fn second_run_is_refused_while_running() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend).await;

    let err = running.server.run().await.unwrap_err();
    assert!(matches!(err, ServerError::AlreadyRunning));

    running.lifecycle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn ready_failure_aborts_startup() {
    let backend = TestBackend::new(Behaviour {
        ready_error: Some("database unreachable".into()),
        ..Behaviour::default()
    });
    let server = Server::new(common::config(), backend).unwrap();
    let lifecycle = server.lifecycle();

    let err = server.run().await.unwrap_err();

    let ServerError::Ready(cause) = &err else {
        panic!("expected a readiness error, got {err}");
    };
    assert_eq!(cause.to_string(), "database unreachable");
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    assert_eq!(lifecycle.wait_running().await, None);
}

#[tokio::test]
async fn bind_failure_when_address_in_use() {
    let first = common::start(common::config(), TestBackend::new(Behaviour::default())).await;

    let config = common::config().listen(first.addr.to_string());
    let server = Server::new(config, TestBackend::new(Behaviour::default())).unwrap();
    let err = server.run().await.unwrap_err();
    assert!(err.is_bind());

    first.lifecycle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn shutdown_is_bounded_by_grace_period() {
    let backend = TestBackend::new(Behaviour {
        session_shutdown_delay: Duration::from_secs(10),
        ..Behaviour::default()
    });
    let running = common::start(common::config(), backend.clone()).await;
    let handle = common::login(running.addr).await;
    let _channel = handle.channel_open_session().await.unwrap();

    let started = Instant::now();
    running.lifecycle.stop(Duration::from_secs(2)).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(2), "stopped after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "stopped after {elapsed:?}");
    assert_eq!(backend.events.count("session shutdown"), 1);
    assert_eq!(backend.events.count("ssh shutdown"), 1);
    assert_eq!(backend.events.count("close"), 1);
    assert_eq!(backend.events.count("disconnect"), 1);
    assert_eq!(backend.events.count("server shutdown"), 1);
}

#[tokio::test]
async fn stuck_request_hook_does_not_hold_up_stop() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend.clone()).await;
    let handle = common::login(running.addr).await;
    let channel = handle.channel_open_session().await.unwrap();
    channel.exec(true, common::HANG).await.unwrap();
    backend.events.wait_for("exec hang").await;

    let started = Instant::now();
    running.lifecycle.stop(Duration::from_secs(1)).await;
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(5), "stopped after {elapsed:?}");
    assert_eq!(backend.events.count("close"), 1);
    assert_eq!(backend.events.count("disconnect"), 1);
    assert_eq!(backend.events.count("server shutdown"), 1);
}

#[tokio::test]
async fn refused_connection_never_reaches_authentication() {
    struct Refuse;

    #[async_trait::async_trait]
    impl Handler for Refuse {
        async fn on_network_connection(
            &self,
            _metadata: ConnectionMetadata,
        ) -> std::result::Result<(Arc<dyn NetworkConnectionHandler>, ConnectionMetadata), HandlerError>
        {
            Err(HandlerError::new("blocked"))
        }
    }

    let server = Arc::new(Server::new(common::config(), Arc::new(Refuse)).unwrap());
    let lifecycle = server.lifecycle();
    let task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };
    let addr = lifecycle.wait_running().await.unwrap();

    let connected = russh::client::connect(
        Arc::new(russh::client::Config::default()),
        addr,
        common::Client,
    )
    .await;
    assert!(connected.is_err());
    assert!(server.registry().is_empty());

    lifecycle.stop(Duration::from_secs(1)).await;
    assert!(task.await.unwrap().is_ok());
}
