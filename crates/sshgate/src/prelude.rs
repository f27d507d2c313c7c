//! Convenient re-exports for writing a backend.
//!
//! ```ignore
//! use sshgate::prelude::*;
//! ```

// Server
pub use crate::config::{AuthMethod, ServerConfig};
pub use crate::keepalive::KeepaliveConfig;
pub use crate::server::{Lifecycle, LifecycleState, Server};

// Error handling
pub use crate::error::{HandlerError, Result, ServerError};

// Backend contract
pub use crate::handler::{
    AuthResponse, AuthResult, ChannelRejection, Handler, KeyboardInteractiveAnswers,
    KeyboardInteractiveQuestion, KeyboardInteractiveStep, NetworkConnectionHandler, PublicKey,
    SessionChannelHandler, SshConnectionHandler,
};
pub use crate::metadata::{
    AuthPendingMetadata, AuthenticatedMetadata, ChannelMetadata, ConnectionMetadata,
};

// Channels
pub use crate::channel::SessionChannel;
pub use crate::forward::{ForwardStream, ReverseForwarder};

// Shutdown
pub use crate::shutdown::ShutdownHandler;
pub use crate::util::Deadline;

// Typed request payloads handed to hooks
pub use sshgate_wire::RejectionReason;
pub use sshgate_wire::open::DirectTcpIp;
pub use sshgate_wire::request::{PtyRequest, WindowChange, X11Request};
