//! End-to-end authentication tests.

mod common;

use std::time::Duration;

use common::{Behaviour, TestBackend};
use russh::client::KeyboardInteractiveAuthResponse;

#[tokio::test]
async fn password_login_runs_handshake_success() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend.clone()).await;

    let _handle = common::login(running.addr).await;

    assert_eq!(backend.events.count("auth password success"), 1);
    assert_eq!(backend.events.count("handshake success"), 1);

    running.lifecycle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn wrong_password_then_disconnect_reports_handshake_failure() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend.clone()).await;

    let mut handle = common::connect(running.addr).await;
    let result = handle
        .authenticate_password(common::USER, "guess")
        .await
        .unwrap();
    assert!(!result.success());
    drop(handle);

    backend.events.wait_for("disconnect").await;
    assert_eq!(backend.events.count("auth password failure"), 1);
    assert_eq!(backend.events.count("handshake failed"), 1);
    assert_eq!(backend.events.count("handshake success"), 0);

    running.lifecycle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn keyboard_interactive_challenge_and_answer() {
    let backend = TestBackend::new(Behaviour::default());
    let running = common::start(common::config(), backend.clone()).await;

    let mut handle = common::connect(running.addr).await;
    let step = handle
        .authenticate_keyboard_interactive_start(common::USER, None::<String>)
        .await
        .unwrap();
    let KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } = step else {
        panic!("expected a keyboard-interactive challenge");
    };
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].prompt, "Code: ");

    let step = handle
        .authenticate_keyboard_interactive_respond(vec!["123456".to_string()])
        .await
        .unwrap();
    assert!(matches!(step, KeyboardInteractiveAuthResponse::Success));
    assert_eq!(backend.events.count("auth keyboard-interactive success"), 1);

    running.lifecycle.stop(Duration::from_secs(1)).await;
}
