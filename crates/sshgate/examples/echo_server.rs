//! Echo server example.
//!
//! Accepts `demo`/`demo` and runs a "shell" that echoes back whatever the
//! client types. `exec` prints the command instead of running it.
//!
//! Run with: `cargo run --example echo_server`, then
//! `ssh -p 2222 demo@127.0.0.1`. Settings can be overridden through
//! `SSHGATE_*` environment variables or a `sshgate.toml` in the working
//! directory. Ctrl-C stops the server, waiting up to `shutdownTimeout` for
//! open sessions.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use sshgate::prelude::*;
use sshgate::{ConfigLoader, EnvConfig};
use tokio::io::AsyncWriteExt;

struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn on_network_connection(
        &self,
        metadata: ConnectionMetadata,
    ) -> std::result::Result<(Arc<dyn NetworkConnectionHandler>, ConnectionMetadata), HandlerError>
    {
        println!("connection {} from {}", metadata.connection_id, metadata.remote_address);
        Ok((Arc::new(EchoConnection), metadata))
    }
}

struct EchoConnection;

#[async_trait]
impl NetworkConnectionHandler for EchoConnection {
    async fn on_auth_password(&self, metadata: &AuthPendingMetadata, password: &[u8]) -> AuthResult {
        if metadata.username == "demo" && password == b"demo" {
            AuthResult::success(metadata.accepted())
        } else {
            AuthResult::failure(metadata.rejected())
        }
    }

    async fn on_handshake_success(
        &self,
        metadata: AuthenticatedMetadata,
    ) -> std::result::Result<(Arc<dyn SshConnectionHandler>, AuthenticatedMetadata), HandlerError>
    {
        Ok((Arc::new(EchoSsh), metadata))
    }

    async fn on_disconnect(&self) {
        println!("disconnected");
    }
}

struct EchoSsh;

#[async_trait]
impl SshConnectionHandler for EchoSsh {
    async fn on_session_channel(
        &self,
        _metadata: ChannelMetadata,
        _extra_data: Bytes,
        channel: SessionChannel,
    ) -> std::result::Result<Arc<dyn SessionChannelHandler>, ChannelRejection> {
        Ok(Arc::new(EchoSession { channel }))
    }
}

struct EchoSession {
    channel: SessionChannel,
}

#[async_trait]
impl SessionChannelHandler for EchoSession {
    async fn on_env_request(
        &self,
        _id: u64,
        _name: &str,
        _value: &str,
    ) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    async fn on_pty_request(
        &self,
        _id: u64,
        _request: &PtyRequest,
    ) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    async fn on_exec_request(
        &self,
        _id: u64,
        program: &str,
    ) -> std::result::Result<(), HandlerError> {
        let channel = self.channel.clone();
        let line = format!("{program}\r\n");
        tokio::spawn(async move {
            let _ = channel.stdout().write_all(line.as_bytes()).await;
            channel.exit_status(0).await;
            let _ = channel.close().await;
        });
        Ok(())
    }

    async fn on_shell(&self, _id: u64) -> std::result::Result<(), HandlerError> {
        let channel = self.channel.clone();
        tokio::spawn(async move {
            let mut stdin = channel.stdin();
            let mut stdout = channel.stdout();
            let _ = tokio::io::copy(&mut stdin, &mut stdout).await;
            channel.exit_status(0).await;
            let _ = channel.close().await;
        });
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = match ConfigLoader::new().add_path(".").find("sshgate") {
        Some(path) => ConfigLoader::new().load(&path)?,
        None => ServerConfig::new().listen("127.0.0.1:2222"),
    };
    EnvConfig::default().apply(&mut config)?;

    let server = Arc::new(Server::new(config, Arc::new(Echo))?);
    let lifecycle = server.lifecycle();
    let running = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    if let Some(addr) = lifecycle.wait_running().await {
        println!("listening on {addr}");
    }
    let _ = tokio::signal::ctrl_c().await;
    println!("stopping");
    server.stop().await;

    running.await.map_err(std::io::Error::other)?
}
