//! The backend contract.
//!
//! A backend plugs into the engine through four handler traits, one per
//! stage of a connection's life:
//!
//! 1. [`Handler`]: the whole server. Creates a network connection handler
//!    for every accepted socket.
//! 2. [`NetworkConnectionHandler`]: one TCP connection. Authenticates the
//!    client and, on success, creates the SSH connection handler.
//! 3. [`SshConnectionHandler`]: one authenticated SSH connection. Handles
//!    global requests and decides which channels to open.
//! 4. [`SessionChannelHandler`]: one session channel. Receives the typed
//!    channel requests (`pty-req`, `exec`, `shell`, ...).
//!
//! Every method has a default: hooks do nothing, requests fail with
//! "not supported", authentication answers [`AuthResponse::Unavailable`] and
//! session channels are rejected. Backends override what they support.
//!
//! # Request hooks should return promptly
//!
//! Requests on one channel are processed in order and the SSH reply is sent
//! when the hook returns. A hook may write output or open reverse channels
//! before returning, but a hook that runs a program should start it in the
//! background and return, not wait for it to exit. Channel-open and
//! forwarding hooks run while the connection waits for their verdict.

pub mod auth;
pub mod rejection;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use sshgate_wire::DecodeError;
use sshgate_wire::open::DirectTcpIp;
use sshgate_wire::request::{PtyRequest, WindowChange, X11Request};

pub use auth::{
    AuthResponse, AuthResult, KeyboardInteractiveAnswers, KeyboardInteractiveQuestion,
    KeyboardInteractiveStep, PublicKey,
};
pub use rejection::ChannelRejection;

use crate::channel::SessionChannel;
use crate::error::{HandlerError, ServerError};
use crate::forward::{ForwardStream, ReverseForwarder};
use crate::metadata::{AuthPendingMetadata, AuthenticatedMetadata, ChannelMetadata, ConnectionMetadata};
use crate::util::Deadline;

/// Server-wide backend entry point.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Called once the listen socket is bound, before the first connection
    /// is accepted. An error aborts startup.
    async fn on_ready(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called last during shutdown, after every connection has finished.
    async fn on_shutdown(&self, _deadline: &Deadline) {}

    /// Called for every accepted socket, before the SSH handshake. An error
    /// closes the socket.
    async fn on_network_connection(
        &self,
        metadata: ConnectionMetadata,
    ) -> Result<(Arc<dyn NetworkConnectionHandler>, ConnectionMetadata), HandlerError>;
}

/// Backend for one network connection.
#[async_trait]
pub trait NetworkConnectionHandler: Send + Sync {
    /// Password authentication.
    async fn on_auth_password(
        &self,
        metadata: &AuthPendingMetadata,
        _password: &[u8],
    ) -> AuthResult {
        AuthResult::unavailable(metadata.rejected())
    }

    /// Public key authentication. Called once the client has proven
    /// possession of the private key.
    async fn on_auth_pubkey(&self, metadata: &AuthPendingMetadata, _key: &PublicKey) -> AuthResult {
        AuthResult::unavailable(metadata.rejected())
    }

    /// Keyboard-interactive authentication.
    ///
    /// Called first with `None`. Returning
    /// [`KeyboardInteractiveStep::Challenge`] sends the questions to the
    /// client; the hook is then called again with the answers.
    async fn on_auth_keyboard_interactive(
        &self,
        metadata: &AuthPendingMetadata,
        _answers: Option<&KeyboardInteractiveAnswers>,
    ) -> KeyboardInteractiveStep {
        KeyboardInteractiveStep::Done(AuthResult::unavailable(metadata.rejected()))
    }

    /// The connection ended before authentication completed.
    async fn on_handshake_failed(&self, _metadata: &ConnectionMetadata, _reason: &ServerError) {}

    /// Authentication succeeded. Returns the handler for the SSH connection.
    ///
    /// Called from within the successful authentication attempt, before the
    /// transport has confirmed the handshake. An error turns the attempt
    /// into a failure.
    async fn on_handshake_success(
        &self,
        metadata: AuthenticatedMetadata,
    ) -> Result<(Arc<dyn SshConnectionHandler>, AuthenticatedMetadata), HandlerError>;

    /// The connection is gone. Called exactly once, last.
    async fn on_disconnect(&self) {}

    /// The server is shutting down.
    async fn on_shutdown(&self, _deadline: &Deadline) {}
}

/// Backend for one authenticated SSH connection.
#[async_trait]
pub trait SshConnectionHandler: Send + Sync {
    /// A global request of an unsupported type arrived.
    async fn on_unsupported_global_request(
        &self,
        _request_id: u64,
        _request_type: &str,
        _payload: &[u8],
    ) {
    }

    /// A global request's payload could not be decoded.
    async fn on_failed_decode_global_request(
        &self,
        _request_id: u64,
        _request_type: &str,
        _payload: &[u8],
        _reason: &DecodeError,
    ) {
    }

    /// The client tried to open a channel of an unsupported type.
    async fn on_unsupported_channel(
        &self,
        _channel_id: u64,
        _channel_type: &str,
        _extra_data: &[u8],
    ) {
    }

    /// The client wants a session channel.
    ///
    /// `channel` is not usable until this returns `Ok` and the engine
    /// accepts the channel; keep it and use it from the session handler.
    async fn on_session_channel(
        &self,
        _metadata: ChannelMetadata,
        _extra_data: Bytes,
        _channel: SessionChannel,
    ) -> Result<Arc<dyn SessionChannelHandler>, ChannelRejection> {
        Err(ChannelRejection::unknown_channel_type(
            "Cannot open session channel.",
        ))
    }

    /// The client wants a `direct-tcpip` channel. Return the stream to
    /// connect it to.
    async fn on_tcp_forward_channel(
        &self,
        _channel_id: u64,
        _request: &DirectTcpIp,
    ) -> Result<Box<dyn ForwardStream>, ChannelRejection> {
        Err(ChannelRejection::prohibited("TCP forwarding is not supported"))
    }

    /// The client wants a `direct-streamlocal@openssh.com` channel. Return
    /// the stream to connect it to.
    async fn on_direct_stream_local(
        &self,
        _channel_id: u64,
        _socket_path: &str,
    ) -> Result<Box<dyn ForwardStream>, ChannelRejection> {
        Err(ChannelRejection::prohibited("Unix socket forwarding is not supported"))
    }

    /// `tcpip-forward`: listen on `address:port` and open a
    /// `forwarded-tcpip` channel through `forwarder` for each connection.
    async fn on_request_tcp_reverse_forward(
        &self,
        _address: &str,
        _port: u32,
        _forwarder: ReverseForwarder,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::not_supported())
    }

    /// `cancel-tcpip-forward`.
    async fn on_request_cancel_tcp_reverse_forward(
        &self,
        _address: &str,
        _port: u32,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::not_supported())
    }

    /// `streamlocal-forward@openssh.com`: listen on a Unix socket and open a
    /// `forwarded-streamlocal@openssh.com` channel for each connection.
    async fn on_request_stream_local(
        &self,
        _socket_path: &str,
        _forwarder: ReverseForwarder,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::not_supported())
    }

    /// `cancel-streamlocal-forward@openssh.com`.
    async fn on_request_cancel_stream_local(&self, _socket_path: &str) -> Result<(), HandlerError> {
        Err(HandlerError::not_supported())
    }

    /// The server is shutting down.
    async fn on_shutdown(&self, _deadline: &Deadline) {}
}

/// Backend for one session channel.
///
/// Request ids count from zero per channel. The default for every request
/// is to refuse it.
#[async_trait]
pub trait SessionChannelHandler: Send + Sync {
    /// A request of an unsupported type arrived.
    async fn on_unsupported_channel_request(
        &self,
        _request_id: u64,
        _request_type: &str,
        _payload: &[u8],
    ) {
    }

    /// A request's payload could not be decoded.
    async fn on_failed_decode_channel_request(
        &self,
        _request_id: u64,
        _request_type: &str,
        _payload: &[u8],
        _reason: &DecodeError,
    ) {
    }

    /// `env`: set an environment variable for the program.
    async fn on_env_request(
        &self,
        _request_id: u64,
        _name: &str,
        _value: &str,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::not_supported())
    }

    /// `pty-req`: allocate a terminal.
    async fn on_pty_request(
        &self,
        _request_id: u64,
        _request: &PtyRequest,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::not_supported())
    }

    /// `x11-req`: forward X11 connections through `forwarder`.
    async fn on_x11_request(
        &self,
        _request_id: u64,
        _request: &X11Request,
        _forwarder: ReverseForwarder,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::not_supported())
    }

    /// `exec`: run a program.
    async fn on_exec_request(&self, _request_id: u64, _program: &str) -> Result<(), HandlerError> {
        Err(HandlerError::not_supported())
    }

    /// `shell`: run the user's shell.
    async fn on_shell(&self, _request_id: u64) -> Result<(), HandlerError> {
        Err(HandlerError::not_supported())
    }

    /// `subsystem`: run a named subsystem such as `sftp`.
    async fn on_subsystem(&self, _request_id: u64, _subsystem: &str) -> Result<(), HandlerError> {
        Err(HandlerError::not_supported())
    }

    /// `signal`: deliver a signal (name without the `SIG` prefix).
    async fn on_signal(&self, _request_id: u64, _signal: &str) -> Result<(), HandlerError> {
        Err(HandlerError::not_supported())
    }

    /// `window-change`: the terminal was resized.
    async fn on_window(&self, _request_id: u64, _change: &WindowChange) -> Result<(), HandlerError> {
        Err(HandlerError::not_supported())
    }

    /// The channel closed. Called exactly once, after the last request.
    async fn on_close(&self) {}

    /// The server is shutting down.
    async fn on_shutdown(&self, _deadline: &Deadline) {}
}
