//! Error types for sshgate.
//!
//! [`ServerError`] covers everything the engine itself can fail on. Backends
//! report failures through [`HandlerError`], which the engine logs and turns
//! into SSH-level refusals; it never crosses the wire verbatim.

use std::fmt;

use sshgate_wire::{ChannelType, DecodeError};
use thiserror::Error;

/// The main error type for sshgate operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// [`Server::run`](crate::Server::run) was called while already running.
    #[error("server is already running")]
    AlreadyRunning,

    /// The listen socket could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// The configured listen address.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backend refused to start.
    #[error("backend failed to become ready: {0}")]
    Ready(#[source] HandlerError),

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config {
        /// What is wrong with the configuration.
        message: String,
    },

    /// A host key could not be loaded or generated.
    #[error("host key error: {reason}")]
    HostKey {
        /// Why the key was unusable.
        reason: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The SSH transport reported an error.
    #[error("SSH transport error: {0}")]
    Transport(#[from] russh::Error),

    /// The connection ended before authentication completed.
    #[error("SSH handshake failed: {reason}")]
    Handshake {
        /// What ended the handshake.
        reason: String,
    },

    /// A server-initiated channel could not be opened.
    #[error("failed to open {channel_type} channel: {reason}")]
    Forward {
        /// The channel type that was requested.
        channel_type: ChannelType,
        /// Why the client refused or the open failed.
        reason: String,
    },

    /// A request payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Result type alias for sshgate operations.
pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a host key error.
    pub fn host_key(reason: impl Into<String>) -> Self {
        Self::HostKey {
            reason: reason.into(),
        }
    }

    /// Create a handshake error.
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake {
            reason: reason.into(),
        }
    }

    /// Create a forwarding error.
    pub fn forward(channel_type: ChannelType, reason: impl Into<String>) -> Self {
        Self::Forward {
            channel_type,
            reason: reason.into(),
        }
    }

    /// Create a bind error.
    pub fn bind(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            address: address.into(),
            source,
        }
    }

    /// Check if this is a bind error.
    #[must_use]
    pub const fn is_bind(&self) -> bool {
        matches!(self, Self::Bind { .. })
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Check if this error ended a handshake.
    #[must_use]
    pub const fn is_handshake(&self) -> bool {
        matches!(self, Self::Handshake { .. } | Self::Transport(_))
    }
}

/// Error returned by backend hooks.
///
/// Carries a human-readable message and, optionally, the error that caused
/// it.
#[derive(Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl HandlerError {
    /// Create an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error with a message and an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The error returned by hooks a backend does not implement.
    #[must_use]
    pub fn not_supported() -> Self {
        Self::new("not supported")
    }

    /// The message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("HandlerError");
        debug.field("message", &self.message);
        if let Some(source) = &self.source {
            debug.field("source", &source.to_string());
        }
        debug.finish()
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(err.to_string(), err)
    }
}
