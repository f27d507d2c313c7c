//! End-to-end session channel tests against a real SSH client.

mod common;

use std::time::Duration;

use common::{Behaviour, TestBackend};

#[tokio::test]
async fn exec_echo_returns_output_and_exit_status() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend.clone()).await;

    let handle = common::login(running.addr).await;
    let mut channel = handle.channel_open_session().await.unwrap();
    channel.exec(true, "echo hi").await.unwrap();

    let transcript = common::read_until_close(&mut channel).await;
    assert_eq!(transcript.stdout, b"hi\n");
    assert_eq!(transcript.exit_status, Some(0));
    assert_eq!(transcript.successes, 1);
    assert!(transcript.closed);

    backend.events.wait_for("close").await;
    assert_eq!(backend.events.count("close"), 1);
    assert_eq!(backend.events.count("exec echo hi"), 1);

    running.lifecycle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn output_written_inside_exec_hook_reaches_client() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend.clone()).await;

    let handle = common::login(running.addr).await;
    let mut channel = handle.channel_open_session().await.unwrap();
    channel.exec(true, common::FLOOD).await.unwrap();

    let transcript = common::read_until_close(&mut channel).await;
    assert_eq!(transcript.stdout.len(), common::FLOOD_CHUNKS * 1024);
    assert_eq!(transcript.successes, 1);
    assert_eq!(transcript.exit_status, Some(0));

    running.lifecycle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn x11_open_from_client_is_reported_unsupported() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend.clone()).await;

    let handle = common::login(running.addr).await;
    let opened = handle.channel_open_x11("127.0.0.1", 6010).await;

    assert!(matches!(opened, Err(russh::Error::ChannelOpenFailure(_))));
    assert_eq!(backend.events.count("unsupported channel x11"), 1);
    // The connection is still usable.
    let _session = handle.channel_open_session().await.unwrap();

    running.lifecycle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn failing_exec_is_refused() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend.clone()).await;

    let handle = common::login(running.addr).await;
    let mut channel = handle.channel_open_session().await.unwrap();
    channel.exec(true, "rm -rf /").await.unwrap();

    assert!(!common::reply(&mut channel).await);

    running.lifecycle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn pty_shell_and_resize_arrive_in_order() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend.clone()).await;

    let handle = common::login(running.addr).await;
    let mut channel = handle.channel_open_session().await.unwrap();

    channel
        .request_pty(true, "xterm", 80, 24, 0, 0, &[])
        .await
        .unwrap();
    assert!(common::reply(&mut channel).await);
    channel.request_shell(true).await.unwrap();
    assert!(common::reply(&mut channel).await);
    channel.window_change(120, 40, 0, 0).await.unwrap();

    backend.events.wait_for("window").await;
    let requests: Vec<String> = backend
        .events
        .all()
        .into_iter()
        .filter(|e| e.starts_with("pty") || e == "shell" || e.starts_with("window"))
        .collect();
    assert_eq!(requests, ["pty xterm 80x24", "shell", "window 120x40"]);

    running.lifecycle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn env_request_reaches_backend() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend.clone()).await;

    let handle = common::login(running.addr).await;
    let mut channel = handle.channel_open_session().await.unwrap();
    channel.set_env(true, "LANG", "C").await.unwrap();

    assert!(common::reply(&mut channel).await);
    assert_eq!(backend.events.count("env LANG=C"), 1);

    running.lifecycle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn session_rejected_when_backend_is_full() {
    let backend = TestBackend::new(Behaviour {
        max_sessions: 1,
        ..Behaviour::default()
    });
    let running = common::start(common::config(), backend.clone()).await;

    let handle = common::login(running.addr).await;
    let _first = handle.channel_open_session().await.unwrap();
    let second = handle.channel_open_session().await;

    // russh 0.54 sends its own fixed reason, not the backend's
    // `ResourceShortage`.
    assert!(matches!(
        second,
        Err(russh::Error::ChannelOpenFailure(
            russh::ChannelOpenFailure::AdministrativelyProhibited
        ))
    ));
    assert_eq!(backend.events.count("session rejected"), 1);
    assert_eq!(backend.events.count("session 0"), 1);
    assert_eq!(backend.events.count("session 1"), 0);

    running.lifecycle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn channels_get_sequential_ids() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend.clone()).await;

    let handle = common::login(running.addr).await;
    let _a = handle.channel_open_session().await.unwrap();
    let _b = handle.channel_open_session().await.unwrap();

    let sessions: Vec<String> = backend
        .events
        .all()
        .into_iter()
        .filter(|e| e.starts_with("session ") && e != "session rejected")
        .collect();
    assert_eq!(sessions, ["session 0", "session 1"]);

    running.lifecycle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn disconnect_runs_after_every_resource_is_released() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend.clone()).await;

    let handle = common::login(running.addr).await;
    let _channel = handle.channel_open_session().await.unwrap();
    handle
        .disconnect(russh::Disconnect::ByApplication, "bye", "en")
        .await
        .unwrap();

    backend.events.wait_for("disconnect").await;
    assert_eq!(backend.events.count("disconnect leftover=0"), 1);
    assert_eq!(backend.events.count("close"), 1);

    running.lifecycle.stop(Duration::from_secs(1)).await;
}
