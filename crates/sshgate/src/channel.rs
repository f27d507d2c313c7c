//! Session channel I/O.
//!
//! A [`SessionChannel`] is handed to the backend when a client asks for a
//! session channel, before the channel is accepted. Its I/O surfaces only
//! become usable once the engine has accepted the channel; touching them
//! earlier is a bug in the backend and panics.
//!
//! Exit status and exit signal are each delivered at most once, and not at
//! all after the channel was closed. Transport errors on those messages are
//! logged and swallowed: the client may legitimately have gone away.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use sshgate_wire::request::ExitSignal;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tracing::debug;

/// Extended data type code for stderr (RFC 4254 section 5.2).
pub const EXTENDED_DATA_STDERR: u32 = 1;

/// Outbound half of one transport channel.
#[async_trait]
pub(crate) trait ChannelTransport: Send + Sync {
    async fn data(&self, data: &[u8]) -> io::Result<()>;
    async fn extended_data(&self, code: u32, data: &[u8]) -> io::Result<()>;
    async fn exit_status(&self, status: u32) -> io::Result<()>;
    async fn exit_signal(&self, signal: &ExitSignal) -> io::Result<()>;
    async fn eof(&self) -> io::Result<()>;
    async fn close(&self) -> io::Result<()>;
    /// Answer the oldest channel request still waiting for a reply.
    async fn reply(&self, accepted: bool) -> io::Result<()>;
}

/// Bytes the client sent on a channel, in order.
pub(crate) type StdinQueue = mpsc::UnboundedReceiver<Bytes>;

#[derive(Debug, Default)]
struct State {
    exit_sent: bool,
    exit_signal_sent: bool,
    closed_write: bool,
    closed: bool,
}

struct Binding {
    transport: Arc<dyn ChannelTransport>,
    stdin: Arc<Mutex<StdinState>>,
}

struct Inner {
    channel_id: u64,
    binding: OnceLock<Binding>,
    state: Mutex<State>,
    /// Held across exit, EOF and close sends so they reach the transport in
    /// the order their state changed.
    sending: tokio::sync::Mutex<()>,
}

/// I/O for one session channel.
///
/// Cheap to clone; all clones refer to the same channel.
#[derive(Clone)]
pub struct SessionChannel {
    inner: Arc<Inner>,
}

impl fmt::Debug for SessionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionChannel")
            .field("channel_id", &self.inner.channel_id)
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl SessionChannel {
    pub(crate) fn unbound(channel_id: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel_id,
                binding: OnceLock::new(),
                state: Mutex::new(State::default()),
                sending: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Attach the accepted transport channel. Only the first call has an
    /// effect.
    pub(crate) fn bind(&self, transport: Arc<dyn ChannelTransport>, stdin: StdinQueue) {
        let binding = Binding {
            transport,
            stdin: Arc::new(Mutex::new(StdinState {
                queue: stdin,
                pending: Bytes::new(),
            })),
        };
        let _ = self.inner.binding.set(binding);
    }

    /// The transport channel is gone; later exit messages are dropped.
    pub(crate) fn mark_closed(&self) {
        self.state().closed = true;
    }

    /// The connection-scoped channel id.
    #[must_use]
    pub fn channel_id(&self) -> u64 {
        self.inner.channel_id
    }

    /// Whether the channel has been accepted.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.inner.binding.get().is_some()
    }

    /// Whether the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Data the client sends. Every call reads from the same stream.
    #[must_use]
    pub fn stdin(&self) -> ChannelReader {
        ChannelReader {
            shared: Arc::clone(&self.binding("stdin").stdin),
        }
    }

    /// Writer for the channel's standard output.
    #[must_use]
    pub fn stdout(&self) -> ChannelWriter {
        ChannelWriter::new(Arc::clone(&self.binding("stdout").transport), None)
    }

    /// Writer for the channel's standard error.
    #[must_use]
    pub fn stderr(&self) -> ChannelWriter {
        ChannelWriter::new(
            Arc::clone(&self.binding("stderr").transport),
            Some(EXTENDED_DATA_STDERR),
        )
    }

    /// Report the program's exit code to the client.
    pub async fn exit_status(&self, code: u32) {
        let transport = Arc::clone(&self.binding("exit status").transport);
        debug!(channel_id = self.channel_id(), exit_code = code, "Program exited");
        let _sending = self.inner.sending.lock().await;
        {
            let mut state = self.state();
            if state.exit_sent || state.closed {
                return;
            }
            state.exit_sent = true;
        }
        if let Err(e) = transport.exit_status(code).await {
            debug!(channel_id = self.channel_id(), error = %e, "Failed to send exit status to client");
        }
    }

    /// Report that the program was terminated by a signal.
    pub async fn exit_signal(
        &self,
        signal: &str,
        core_dumped: bool,
        error_message: &str,
        language_tag: &str,
    ) {
        let transport = Arc::clone(&self.binding("exit signal").transport);
        debug!(
            channel_id = self.channel_id(),
            signal,
            core_dumped,
            "Program exited with signal"
        );
        let _sending = self.inner.sending.lock().await;
        {
            let mut state = self.state();
            if state.exit_signal_sent || state.closed {
                return;
            }
            state.exit_signal_sent = true;
        }
        let payload = ExitSignal {
            signal: signal.to_string(),
            core_dumped,
            error_message: error_message.to_string(),
            language_tag: language_tag.to_string(),
        };
        if let Err(e) = transport.exit_signal(&payload).await {
            debug!(channel_id = self.channel_id(), error = %e, "Failed to send exit signal to client");
        }
    }

    /// Send EOF: no more output will follow.
    pub async fn close_write(&self) -> io::Result<()> {
        let transport = Arc::clone(&self.binding("close write").transport);
        let _sending = self.inner.sending.lock().await;
        {
            let mut state = self.state();
            if state.closed || state.closed_write {
                return Ok(());
            }
            state.closed_write = true;
        }
        transport.eof().await
    }

    /// Close the channel.
    pub async fn close(&self) -> io::Result<()> {
        let transport = Arc::clone(&self.binding("close").transport);
        let _sending = self.inner.sending.lock().await;
        {
            let mut state = self.state();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }
        transport.close().await
    }

    fn binding(&self, what: &str) -> &Binding {
        match self.inner.binding.get() {
            Some(binding) => binding,
            None => panic!(
                "BUG: {what} used on channel {} before it was accepted",
                self.inner.channel_id
            ),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct StdinState {
    queue: StdinQueue,
    pending: Bytes,
}

/// Reader over the bytes a client sends on a channel.
///
/// Reaches end of file when the client sends EOF or the channel closes.
pub struct ChannelReader {
    shared: Arc<Mutex<StdinState>>,
}

impl fmt::Debug for ChannelReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelReader").finish_non_exhaustive()
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);

        while state.pending.is_empty() {
            match state.queue.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => state.pending = chunk,
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let n = state.pending.len().min(buf.remaining());
        buf.put_slice(&state.pending[..n]);
        state.pending.advance(n);
        Poll::Ready(Ok(()))
    }
}

type WriteFuture = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// Writer for a channel's stdout or stderr stream.
///
/// Each `poll_write` sends one data message. If a write is pending, the next
/// call completes that write and reports its length, whatever buffer it is
/// given.
pub struct ChannelWriter {
    transport: Arc<dyn ChannelTransport>,
    extended: Option<u32>,
    in_flight: Option<(usize, WriteFuture)>,
}

impl fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("extended", &self.extended)
            .field("in_flight", &self.in_flight.is_some())
            .finish()
    }
}

impl ChannelWriter {
    fn new(transport: Arc<dyn ChannelTransport>, extended: Option<u32>) -> Self {
        Self {
            transport,
            extended,
            in_flight: None,
        }
    }

    fn poll_in_flight(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        let Some((len, future)) = self.in_flight.as_mut() else {
            return Poll::Ready(Ok(0));
        };
        let len = *len;
        let result = futures::ready!(future.as_mut().poll(cx));
        self.in_flight = None;
        Poll::Ready(result.map(|()| len))
    }
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.in_flight.is_none() {
            if buf.is_empty() {
                return Poll::Ready(Ok(0));
            }
            let transport = Arc::clone(&this.transport);
            let extended = this.extended;
            let data = buf.to_vec();
            let future: WriteFuture = Box::pin(async move {
                match extended {
                    Some(code) => transport.extended_data(code, &data).await,
                    None => transport.data(&data).await,
                }
            });
            this.in_flight = Some((buf.len(), future));
        }
        this.poll_in_flight(cx)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_in_flight(cx).map_ok(|_| ())
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}
