//! Shared fixtures for the end-to-end tests: a backend that records what it
//! sees and a small russh client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client;
use russh::{Channel, ChannelMsg};
use sshgate::prelude::*;
use sshgate::{KeepaliveConfig, ShutdownRegistry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const USER: &str = "alice";
pub const PASSWORD: &str = "secret";

/// `exec` command whose hook writes [`FLOOD_CHUNKS`] chunks of 1 KiB before
/// it returns.
pub const FLOOD: &str = "flood";
pub const FLOOD_CHUNKS: usize = 64;
/// `exec` command whose hook never returns.
pub const HANG: &str = "hang";

/// Event log shared by every handler of one backend.
#[derive(Debug, Default)]
pub struct Events(Mutex<Vec<String>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.all().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Wait until an event starting with `prefix` has been recorded.
    pub async fn wait_for(&self, prefix: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.count(prefix) == 0 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {prefix:?}, got {:?}",
                self.all()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// How the test backend behaves.
#[derive(Debug, Clone)]
pub struct Behaviour {
    pub max_sessions: usize,
    pub ready_error: Option<String>,
    pub session_shutdown_delay: Duration,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            max_sessions: usize::MAX,
            ready_error: None,
            session_shutdown_delay: Duration::ZERO,
        }
    }
}

/// Backend that accepts `alice`/`secret` and answers `exec "echo ..."`.
#[derive(Debug, Default)]
pub struct TestBackend {
    pub events: Arc<Events>,
    pub behaviour: Behaviour,
    pub registry: OnceLock<Arc<ShutdownRegistry>>,
    sessions: Arc<AtomicUsize>,
}

impl TestBackend {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            ..Self::default()
        })
    }
}

#[async_trait]
impl Handler for TestBackend {
    async fn on_ready(&self) -> std::result::Result<(), HandlerError> {
        match &self.behaviour.ready_error {
            Some(message) => Err(HandlerError::new(message.clone())),
            None => Ok(()),
        }
    }

    async fn on_shutdown(&self, _deadline: &Deadline) {
        self.events.push("server shutdown");
    }

    async fn on_network_connection(
        &self,
        metadata: ConnectionMetadata,
    ) -> std::result::Result<(Arc<dyn NetworkConnectionHandler>, ConnectionMetadata), HandlerError> {
        self.events.push("connect");
        let network = NetworkBackend {
            events: Arc::clone(&self.events),
            behaviour: self.behaviour.clone(),
            registry: self.registry.get().cloned(),
            connection_id: metadata.connection_id.to_string(),
            sessions: Arc::clone(&self.sessions),
        };
        Ok((Arc::new(network), metadata))
    }
}

struct NetworkBackend {
    events: Arc<Events>,
    behaviour: Behaviour,
    registry: Option<Arc<ShutdownRegistry>>,
    connection_id: String,
    sessions: Arc<AtomicUsize>,
}

#[async_trait]
impl NetworkConnectionHandler for NetworkBackend {
    async fn on_auth_password(&self, metadata: &AuthPendingMetadata, password: &[u8]) -> AuthResult {
        if metadata.username == USER && password == PASSWORD.as_bytes() {
            self.events.push("auth password success");
            AuthResult::success(metadata.accepted())
        } else {
            self.events.push("auth password failure");
            AuthResult::failure(metadata.rejected()).with_reason("wrong password")
        }
    }

    async fn on_auth_keyboard_interactive(
        &self,
        metadata: &AuthPendingMetadata,
        answers: Option<&KeyboardInteractiveAnswers>,
    ) -> KeyboardInteractiveStep {
        match answers {
            None => KeyboardInteractiveStep::Challenge {
                instruction: "Second factor".into(),
                questions: vec![KeyboardInteractiveQuestion::new("Code: ").with_id("otp")],
            },
            Some(answers) if answers.get_by_key("otp") == Some("123456") => {
                self.events.push("auth keyboard-interactive success");
                KeyboardInteractiveStep::Done(AuthResult::success(metadata.accepted()))
            }
            Some(_) => KeyboardInteractiveStep::Done(AuthResult::failure(metadata.rejected())),
        }
    }

    async fn on_handshake_failed(&self, _metadata: &ConnectionMetadata, _reason: &ServerError) {
        self.events.push("handshake failed");
    }

    async fn on_handshake_success(
        &self,
        metadata: AuthenticatedMetadata,
    ) -> std::result::Result<(Arc<dyn SshConnectionHandler>, AuthenticatedMetadata), HandlerError> {
        self.events.push("handshake success");
        let ssh = SshBackend {
            events: Arc::clone(&self.events),
            behaviour: self.behaviour.clone(),
            sessions: Arc::clone(&self.sessions),
        };
        Ok((Arc::new(ssh), metadata))
    }

    async fn on_disconnect(&self) {
        let leftover = self
            .registry
            .as_ref()
            .map(|registry| {
                registry
                    .keys()
                    .into_iter()
                    .filter(|key| key.contains(&self.connection_id))
                    .count()
            })
            .unwrap_or_default();
        self.events.push(format!("disconnect leftover={leftover}"));
    }
}

struct SshBackend {
    events: Arc<Events>,
    behaviour: Behaviour,
    sessions: Arc<AtomicUsize>,
}

#[async_trait]
impl SshConnectionHandler for SshBackend {
    async fn on_session_channel(
        &self,
        metadata: ChannelMetadata,
        _extra_data: Bytes,
        channel: SessionChannel,
    ) -> std::result::Result<Arc<dyn SessionChannelHandler>, ChannelRejection> {
        if self.sessions.load(Ordering::SeqCst) >= self.behaviour.max_sessions {
            self.events.push("session rejected");
            return Err(ChannelRejection::resource_shortage("too many sessions"));
        }
        self.sessions.fetch_add(1, Ordering::SeqCst);
        self.events.push(format!("session {}", metadata.channel_id));
        Ok(Arc::new(SessionBackend {
            events: Arc::clone(&self.events),
            channel,
            sessions: Arc::clone(&self.sessions),
            shutdown_delay: self.behaviour.session_shutdown_delay,
        }))
    }

    async fn on_unsupported_channel(&self, _id: u64, channel_type: &str, _extra_data: &[u8]) {
        self.events.push(format!("unsupported channel {channel_type}"));
    }

    async fn on_shutdown(&self, _deadline: &Deadline) {
        self.events.push("ssh shutdown");
    }
}

struct SessionBackend {
    events: Arc<Events>,
    channel: SessionChannel,
    sessions: Arc<AtomicUsize>,
    shutdown_delay: Duration,
}

#[async_trait]
impl SessionChannelHandler for SessionBackend {
    async fn on_env_request(
        &self,
        _id: u64,
        name: &str,
        value: &str,
    ) -> std::result::Result<(), HandlerError> {
        self.events.push(format!("env {name}={value}"));
        Ok(())
    }

    async fn on_pty_request(
        &self,
        _id: u64,
        request: &PtyRequest,
    ) -> std::result::Result<(), HandlerError> {
        self.events
            .push(format!("pty {} {}x{}", request.term, request.columns, request.rows));
        Ok(())
    }

    async fn on_exec_request(
        &self,
        _id: u64,
        program: &str,
    ) -> std::result::Result<(), HandlerError> {
        self.events.push(format!("exec {program}"));
        if program == HANG {
            std::future::pending::<()>().await;
        }
        let output = if program == FLOOD {
            // Written before the hook returns.
            let mut stdout = self.channel.stdout();
            for _ in 0..FLOOD_CHUNKS {
                stdout
                    .write_all(&[b'x'; 1024])
                    .await
                    .map_err(|e| HandlerError::with_source("flood write failed", e))?;
            }
            String::new()
        } else {
            let Some(text) = program.strip_prefix("echo ") else {
                return Err(HandlerError::new("only echo and flood are supported"));
            };
            format!("{text}\n")
        };
        let channel = self.channel.clone();
        tokio::spawn(async move {
            let _ = channel.stdout().write_all(output.as_bytes()).await;
            channel.exit_status(0).await;
            let _ = channel.close().await;
        });
        Ok(())
    }

    async fn on_shell(&self, _id: u64) -> std::result::Result<(), HandlerError> {
        self.events.push("shell");
        Ok(())
    }

    async fn on_window(
        &self,
        _id: u64,
        change: &WindowChange,
    ) -> std::result::Result<(), HandlerError> {
        self.events
            .push(format!("window {}x{}", change.columns, change.rows));
        Ok(())
    }

    async fn on_close(&self) {
        self.sessions.fetch_sub(1, Ordering::SeqCst);
        self.events.push("close");
    }

    async fn on_shutdown(&self, _deadline: &Deadline) {
        self.events.push("session shutdown");
        tokio::time::sleep(self.shutdown_delay).await;
    }
}

/// Server configuration for tests: loopback, ephemeral port, no keepalive.
pub fn config() -> ServerConfig {
    ServerConfig::new()
        .listen("127.0.0.1:0")
        .keepalive(KeepaliveConfig::disabled())
        .shutdown_timeout(Duration::from_secs(2))
}

/// A running server.
pub struct Running {
    pub server: Arc<Server>,
    pub lifecycle: Lifecycle,
    pub addr: SocketAddr,
    pub task: JoinHandle<sshgate::Result<()>>,
}

/// Start `backend` on an ephemeral port.
pub async fn start(config: ServerConfig, backend: Arc<TestBackend>) -> Running {
    let server = Arc::new(Server::new(config, backend.clone()).expect("valid config"));
    let _ = backend.registry.set(server.registry());
    let lifecycle = server.lifecycle();
    let task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };
    let addr = lifecycle.wait_running().await.expect("server started");
    Running {
        server,
        lifecycle,
        addr,
        task,
    }
}

/// Client side handler accepting any host key.
pub struct Client;

impl client::Handler for Client {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Connect without authenticating.
pub async fn connect(addr: SocketAddr) -> client::Handle<Client> {
    client::connect(Arc::new(client::Config::default()), addr, Client)
        .await
        .expect("connect")
}

/// Connect and log in as `alice`.
pub async fn login(addr: SocketAddr) -> client::Handle<Client> {
    let mut handle = connect(addr).await;
    let result = handle
        .authenticate_password(USER, PASSWORD)
        .await
        .expect("auth exchange");
    assert!(result.success(), "password authentication rejected");
    handle
}

/// What the client saw on a channel until it closed.
#[derive(Debug, Default)]
pub struct Transcript {
    pub stdout: Vec<u8>,
    pub exit_status: Option<u32>,
    pub successes: usize,
    pub failures: usize,
    pub closed: bool,
}

/// Read channel messages until the server closes the channel.
pub async fn read_until_close(channel: &mut Channel<client::Msg>) -> Transcript {
    let mut transcript = Transcript::default();
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), channel.wait())
            .await
            .expect("channel message");
        match msg {
            Some(ChannelMsg::Data { data }) => transcript.stdout.extend_from_slice(&data),
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                transcript.exit_status = Some(exit_status);
            }
            Some(ChannelMsg::Success) => transcript.successes += 1,
            Some(ChannelMsg::Failure) => transcript.failures += 1,
            Some(ChannelMsg::Close) | None => {
                transcript.closed = true;
                return transcript;
            }
            Some(_) => {}
        }
    }
}

/// Wait for the next reply to a request sent with `want_reply`.
pub async fn reply(channel: &mut Channel<client::Msg>) -> bool {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), channel.wait())
            .await
            .expect("channel reply");
        match msg {
            Some(ChannelMsg::Success) => return true,
            Some(ChannelMsg::Failure) | None => return false,
            Some(_) => {}
        }
    }
}

/// TCP relay between a client and the server that can stop carrying bytes
/// while keeping both sockets open, so the server sees a silent peer.
pub struct FreezingProxy {
    pub addr: SocketAddr,
    frozen: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl FreezingProxy {
    pub async fn start(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frozen = Arc::new(AtomicBool::new(false));
        let task = {
            let frozen = Arc::clone(&frozen);
            tokio::spawn(async move {
                let (client, _) = listener.accept().await.unwrap();
                let server = TcpStream::connect(upstream).await.unwrap();
                let (client_read, client_write) = client.into_split();
                let (server_read, server_write) = server.into_split();
                tokio::join!(
                    relay(client_read, server_write, Arc::clone(&frozen)),
                    relay(server_read, client_write, frozen),
                );
            })
        };
        Self { addr, frozen, task }
    }

    /// Stop relaying. Bytes already in flight are dropped.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }
}

impl Drop for FreezingProxy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn relay(mut from: OwnedReadHalf, mut to: OwnedWriteHalf, frozen: Arc<AtomicBool>) {
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = match from.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        if frozen.load(Ordering::SeqCst) {
            // Hold both halves open without reading or writing.
            std::future::pending::<()>().await;
        }
        if to.write_all(&buf[..n]).await.is_err() {
            return;
        }
    }
}
