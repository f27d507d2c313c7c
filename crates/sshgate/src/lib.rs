//! sshgate: SSH connection and channel multiplexing engine
//!
//! This crate accepts SSH connections, authenticates clients and multiplexes
//! their channels onto a pluggable backend. It owns the protocol plumbing;
//! what authentication means and what a session actually runs is up to the
//! backend, which implements the traits in [`handler`].
//!
//! # Features
//!
//! - **Async-first design** on the Tokio runtime, SSH transport via `russh`
//! - **Password, public key and keyboard-interactive** authentication
//! - **Session channels** with typed requests (`pty-req`, `exec`, `shell`,
//!   `subsystem`, `window-change`, `signal`, `env`, `x11-req`)
//! - **Port and socket forwarding** in both directions, opt-in
//! - **Graceful shutdown** with a shared deadline and forced teardown
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sshgate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> sshgate::Result<()> {
//!     let config = ServerConfig::new().listen("0.0.0.0:2222");
//!     let server = Server::new(config, Arc::new(MyBackend::default()))?;
//!     server.run().await
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod forward;
pub mod handler;
pub mod keepalive;
pub mod metadata;
pub mod prelude;
pub mod server;
pub mod shutdown;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{ChannelReader, ChannelWriter, EXTENDED_DATA_STDERR, SessionChannel};
pub use config::{AuthMethod, ConfigFormat, ConfigLoader, EnvConfig, ServerConfig};
pub use error::{HandlerError, Result, ServerError};
pub use forward::{ForwardStream, ForwardedChannel, ReverseForwarder};
pub use handler::{
    AuthResponse, AuthResult, ChannelRejection, Handler, KeyboardInteractiveAnswers,
    KeyboardInteractiveQuestion, KeyboardInteractiveStep, NetworkConnectionHandler, PublicKey,
    SessionChannelHandler, SshConnectionHandler,
};
pub use keepalive::KeepaliveConfig;
pub use metadata::{
    AuthPendingMetadata, AuthenticatedMetadata, ChannelMetadata, ConnectionId, ConnectionMetadata,
};
pub use server::{Lifecycle, LifecycleState, Server};
pub use shutdown::{ShutdownHandler, ShutdownRegistry};
pub use util::{Deadline, TimeoutExt};

// The wire payload crate, for backends that inspect request payloads.
pub use sshgate_wire as wire;
