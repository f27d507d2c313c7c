//! In-memory stand-ins for the transport, used by unit tests.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sshgate_wire::request::ExitSignal;
use tokio::sync::mpsc;

use crate::channel::ChannelTransport;
use crate::error::{Result, ServerError};
use crate::forward::{ChannelOpener, OpenedChannel, ReverseChannel};
use crate::server::queue::RequestSender;

/// Something a [`RecordingTransport`] was asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Sent {
    Data(Vec<u8>),
    Extended(u32, Vec<u8>),
    ExitStatus(u32),
    ExitSignal(String),
    Eof,
    Close,
    Reply(bool),
}

/// Channel transport that records what it sends.
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
    exit_delay: Mutex<Option<Duration>>,
}

impl RecordingTransport {
    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fail every later send, as if the client had gone away.
    pub(crate) fn fail_sends(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Make every exit status send take `delay` before it is recorded.
    pub(crate) fn delay_exit(&self, delay: Duration) {
        *self.exit_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    fn record(&self, sent: Sent) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sent);
        Ok(())
    }
}

#[async_trait]
impl ChannelTransport for RecordingTransport {
    async fn data(&self, data: &[u8]) -> io::Result<()> {
        self.record(Sent::Data(data.to_vec()))
    }

    async fn extended_data(&self, code: u32, data: &[u8]) -> io::Result<()> {
        self.record(Sent::Extended(code, data.to_vec()))
    }

    async fn exit_status(&self, status: u32) -> io::Result<()> {
        let delay = *self.exit_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(Sent::ExitStatus(status))
    }

    async fn exit_signal(&self, signal: &ExitSignal) -> io::Result<()> {
        self.record(Sent::ExitSignal(signal.signal.clone()))
    }

    async fn eof(&self) -> io::Result<()> {
        self.record(Sent::Eof)
    }

    async fn close(&self) -> io::Result<()> {
        self.record(Sent::Close)
    }

    async fn reply(&self, accepted: bool) -> io::Result<()> {
        self.record(Sent::Reply(accepted))
    }
}

/// Channel opener that records requests and answers with in-memory streams.
#[derive(Default)]
pub(crate) struct RecordingOpener {
    refuse: bool,
    opened: Mutex<Vec<ReverseChannel>>,
    request_senders: Mutex<Vec<RequestSender>>,
}

impl RecordingOpener {
    /// An opener whose client refuses every channel.
    pub(crate) fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub(crate) fn opened(&self) -> Vec<ReverseChannel> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sender for requests on the `index`th opened channel.
    pub(crate) fn request_sender(&self, index: usize) -> RequestSender {
        self.request_senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)[index]
            .clone()
    }
}

#[async_trait]
impl ChannelOpener for RecordingOpener {
    async fn open(&self, request: &ReverseChannel) -> Result<OpenedChannel> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if self.refuse {
            return Err(ServerError::forward(
                request.channel_type(),
                "administratively prohibited",
            ));
        }

        let (stream, _peer) = tokio::io::duplex(1024);
        let (sender, requests) = mpsc::unbounded_channel();
        self.request_senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        Ok(OpenedChannel {
            stream: Box::new(stream),
            requests,
        })
    }
}
