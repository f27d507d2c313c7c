//! Envelopes between the transport adapter and the dispatch loops.
//!
//! Channel opens and global requests are answered by the transport when its
//! callback returns, so the adapter waits for their verdict. Channel requests
//! carry the channel's transport instead: the dispatch loop sends the reply
//! itself and the adapter returns as soon as the request is queued.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::channel::{ChannelTransport, StdinQueue};
use crate::forward::ForwardStream;
use crate::handler::ChannelRejection;

/// Where the verdict on a request goes.
enum Reply {
    Waiting(oneshot::Sender<bool>),
    Channel(Arc<dyn ChannelTransport>),
    Nobody,
}

/// A global or channel request awaiting dispatch.
pub(crate) struct InboundRequest {
    pub(crate) request_type: String,
    pub(crate) payload: Bytes,
    reply: Reply,
}

impl InboundRequest {
    /// A request whose sender waits for the verdict.
    pub(crate) fn new(
        request_type: impl Into<String>,
        payload: Bytes,
    ) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            request_type: request_type.into(),
            payload,
            reply: Reply::Waiting(tx),
        };
        (request, rx)
    }

    /// A channel request answered on `transport`, or not at all when the
    /// client asked for no reply.
    pub(crate) fn on_channel(
        request_type: impl Into<String>,
        payload: Bytes,
        transport: Option<Arc<dyn ChannelTransport>>,
    ) -> Self {
        Self {
            request_type: request_type.into(),
            payload,
            reply: transport.map_or(Reply::Nobody, Reply::Channel),
        }
    }

    /// Deliver the verdict.
    pub(crate) async fn reply(self, accepted: bool) {
        match self.reply {
            Reply::Waiting(tx) => {
                let _ = tx.send(accepted);
            }
            Reply::Channel(transport) => {
                if let Err(e) = transport.reply(accepted).await {
                    debug!(
                        request_type = %self.request_type,
                        error = %e,
                        "Failed to send channel request reply"
                    );
                }
            }
            Reply::Nobody => {}
        }
    }
}

pub(crate) type RequestSender = mpsc::UnboundedSender<InboundRequest>;
pub(crate) type RequestQueue = mpsc::UnboundedReceiver<InboundRequest>;

/// The engine's answer to a channel open.
#[derive(Debug)]
pub(crate) enum OpenDecision {
    Accept,
    Reject(ChannelRejection),
}

/// Everything the engine needs to run a channel once it is accepted.
pub(crate) struct ChannelLink {
    pub(crate) transport: Arc<dyn ChannelTransport>,
    pub(crate) requests: RequestQueue,
    /// Client data, for session channels.
    pub(crate) stdin: Option<StdinQueue>,
    /// The channel as a byte stream, for direct channels.
    pub(crate) stream: Option<Box<dyn ForwardStream>>,
}

/// A channel the client asked to open.
pub(crate) struct InboundChannel {
    pub(crate) channel_type: String,
    pub(crate) extra_data: Bytes,
    pub(crate) link: ChannelLink,
    pub(crate) decision: oneshot::Sender<OpenDecision>,
}

impl InboundChannel {
    pub(crate) fn new(
        channel_type: impl Into<String>,
        extra_data: Bytes,
        link: ChannelLink,
    ) -> (Self, oneshot::Receiver<OpenDecision>) {
        let (tx, rx) = oneshot::channel();
        let channel = Self {
            channel_type: channel_type.into(),
            extra_data,
            link,
            decision: tx,
        };
        (channel, rx)
    }
}

pub(crate) type ChannelSender = mpsc::UnboundedSender<InboundChannel>;
pub(crate) type ChannelQueue = mpsc::UnboundedReceiver<InboundChannel>;
