//! Metadata passed to backend hooks.
//!
//! Metadata grows as a connection progresses: [`ConnectionMetadata`] exists
//! from accept, [`AuthPendingMetadata`] adds the username the client offered,
//! [`AuthenticatedMetadata`] adds what the backend decided, and
//! [`ChannelMetadata`] pins it to one channel.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Process-unique connection identifier.
///
/// Sixteen lowercase hex digits: a random per-process salt followed by a
/// counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

static SALT: OnceLock<u32> = OnceLock::new();
static NEXT: AtomicU32 = AtomicU32::new(0);

impl ConnectionId {
    /// Allocate the next identifier.
    #[must_use]
    pub fn generate() -> Self {
        let salt = *SALT.get_or_init(rand::random::<u32>);
        let counter = NEXT.fetch_add(1, Ordering::Relaxed);
        Self(format!("{salt:08x}{counter:08x}"))
    }

    /// The identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata known as soon as a socket is accepted.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Connection identifier.
    pub connection_id: ConnectionId,
    /// Address of the client.
    pub remote_address: SocketAddr,
    /// Address the client connected to.
    pub local_address: Option<SocketAddr>,
    /// Free-form values set by backends.
    pub metadata: BTreeMap<String, String>,
}

impl ConnectionMetadata {
    /// Metadata for a freshly accepted socket.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        remote_address: SocketAddr,
        local_address: Option<SocketAddr>,
    ) -> Self {
        Self {
            connection_id,
            remote_address,
            local_address,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach the username the client is authenticating as.
    #[must_use]
    pub fn start_auth(&self, username: impl Into<String>) -> AuthPendingMetadata {
        AuthPendingMetadata {
            connection: self.clone(),
            username: username.into(),
        }
    }
}

/// Metadata during an authentication attempt.
#[derive(Debug, Clone)]
pub struct AuthPendingMetadata {
    /// Connection this attempt belongs to.
    pub connection: ConnectionMetadata,
    /// Username the client offered.
    pub username: String,
}

impl AuthPendingMetadata {
    /// Metadata for a successful attempt, authenticated under `username`.
    #[must_use]
    pub fn authenticated_as(&self, username: impl Into<String>) -> AuthenticatedMetadata {
        AuthenticatedMetadata {
            connection: self.connection.clone(),
            username: self.username.clone(),
            authenticated_username: username.into(),
            client_version: None,
        }
    }

    /// Metadata for an attempt that authenticated as the offered username.
    #[must_use]
    pub fn accepted(&self) -> AuthenticatedMetadata {
        self.authenticated_as(self.username.clone())
    }

    /// Metadata for an attempt that did not authenticate.
    #[must_use]
    pub fn rejected(&self) -> AuthenticatedMetadata {
        self.authenticated_as(String::new())
    }
}

/// Metadata after authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedMetadata {
    /// Connection metadata.
    pub connection: ConnectionMetadata,
    /// Username the client offered.
    pub username: String,
    /// Username the backend authenticated the client as.
    pub authenticated_username: String,
    /// The client's version banner, once the transport reports it.
    pub client_version: Option<String>,
}

impl AuthenticatedMetadata {
    /// The connection identifier.
    #[must_use]
    pub const fn connection_id(&self) -> &ConnectionId {
        &self.connection.connection_id
    }

    /// Metadata for one channel on this connection.
    #[must_use]
    pub fn channel(&self, channel_id: u64) -> ChannelMetadata {
        ChannelMetadata {
            connection: self.clone(),
            channel_id,
        }
    }
}

/// Metadata for a single channel.
#[derive(Debug, Clone)]
pub struct ChannelMetadata {
    /// The authenticated connection.
    pub connection: AuthenticatedMetadata,
    /// Connection-scoped channel identifier.
    pub channel_id: u64,
}

/// Connection-scoped channel id counter.
///
/// Shared by inbound channels and channels the server opens towards the
/// client, so ids never collide within a connection.
#[derive(Debug, Default)]
pub(crate) struct ChannelIds(AtomicU64);

impl ChannelIds {
    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}
