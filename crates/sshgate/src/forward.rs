//! Server-initiated channels.
//!
//! When a backend accepts a reverse forward (`tcpip-forward`,
//! `streamlocal-forward@openssh.com`) or an X11 request, it later needs to
//! open channels towards the client for each incoming connection. A
//! [`ReverseForwarder`] does that for one SSH connection.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sshgate_wire::ChannelType;
use sshgate_wire::open::{ForwardedStreamLocal, ForwardedTcpIp, X11Open};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::error::{Result, ServerError};
use crate::metadata::{ChannelIds, ConnectionId};
use crate::server::queue::RequestQueue;

/// A bidirectional byte stream carried by a channel.
pub trait ForwardStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized> ForwardStream for T {}

/// A channel the server asked the client to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReverseChannel {
    Tcp(ForwardedTcpIp),
    Unix(ForwardedStreamLocal),
    X11(X11Open),
}

impl ReverseChannel {
    pub(crate) const fn channel_type(&self) -> ChannelType {
        match self {
            Self::Tcp(_) => ChannelType::ForwardedTcpIp,
            Self::Unix(_) => ChannelType::ForwardedStreamLocal,
            Self::X11(_) => ChannelType::X11,
        }
    }
}

/// A channel the client accepted: its byte stream and the queue of requests
/// the client sends on it.
pub(crate) struct OpenedChannel {
    pub(crate) stream: Box<dyn ForwardStream>,
    pub(crate) requests: RequestQueue,
}

/// Opens channels towards the client on one connection.
#[async_trait]
pub(crate) trait ChannelOpener: Send + Sync {
    async fn open(&self, request: &ReverseChannel) -> Result<OpenedChannel>;
}

/// An open server-initiated channel.
pub struct ForwardedChannel {
    /// Connection-scoped channel id.
    pub channel_id: u64,
    /// The channel's byte stream.
    pub stream: Box<dyn ForwardStream>,
}

impl fmt::Debug for ForwardedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardedChannel")
            .field("channel_id", &self.channel_id)
            .finish_non_exhaustive()
    }
}

/// Opens `forwarded-tcpip`, `forwarded-streamlocal@openssh.com` and `x11`
/// channels on one connection.
///
/// Cheap to clone. Channel ids come from the same counter as the channels
/// the client opens. Requests the client sends on these channels are
/// answered with failure.
#[derive(Clone)]
pub struct ReverseForwarder {
    connection_id: ConnectionId,
    channel_ids: Arc<ChannelIds>,
    opener: Arc<dyn ChannelOpener>,
}

impl fmt::Debug for ReverseForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReverseForwarder")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

impl ReverseForwarder {
    pub(crate) fn new(
        connection_id: ConnectionId,
        channel_ids: Arc<ChannelIds>,
        opener: Arc<dyn ChannelOpener>,
    ) -> Self {
        Self {
            connection_id,
            channel_ids,
            opener,
        }
    }

    /// Open a `forwarded-tcpip` channel for a connection that arrived on a
    /// forwarded port.
    pub async fn open_tcp(
        &self,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
    ) -> Result<ForwardedChannel> {
        self.open(ReverseChannel::Tcp(ForwardedTcpIp {
            connected_address: connected_address.to_string(),
            connected_port,
            originator_address: originator_address.to_string(),
            originator_port,
        }))
        .await
    }

    /// Open a `forwarded-streamlocal@openssh.com` channel for a connection
    /// that arrived on a forwarded Unix socket.
    pub async fn open_unix(&self, socket_path: &str) -> Result<ForwardedChannel> {
        self.open(ReverseChannel::Unix(ForwardedStreamLocal {
            socket_path: socket_path.to_string(),
            reserved: String::new(),
        }))
        .await
    }

    /// Open an `x11` channel for an X11 client connection.
    pub async fn open_x11(
        &self,
        originator_address: &str,
        originator_port: u32,
    ) -> Result<ForwardedChannel> {
        self.open(ReverseChannel::X11(X11Open {
            originator_address: originator_address.to_string(),
            originator_port,
        }))
        .await
    }

    async fn open(&self, request: ReverseChannel) -> Result<ForwardedChannel> {
        let channel_id = self.channel_ids.next();
        let channel_type = request.channel_type();

        let opened = match self.opener.open(&request).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(
                    connection_id = %self.connection_id,
                    channel_id,
                    channel_type = %channel_type,
                    error = %e,
                    "Failed to open reverse forwarding channel"
                );
                return Err(match e {
                    ServerError::Forward { .. } => e,
                    other => ServerError::forward(channel_type, other.to_string()),
                });
            }
        };

        debug!(
            connection_id = %self.connection_id,
            channel_id,
            channel_type = %channel_type,
            "Opened reverse forwarding channel"
        );
        tokio::spawn(refuse_requests(opened.requests));

        Ok(ForwardedChannel {
            channel_id,
            stream: opened.stream,
        })
    }
}

/// Answer every request on a server-initiated channel with failure.
pub(crate) async fn refuse_requests(mut requests: RequestQueue) {
    while let Some(request) = requests.recv().await {
        request.reply(false).await;
    }
}
