//! Accepted sockets that can be torn down from outside the connection task.
//!
//! When graceful shutdown runs out of time the server force-closes every
//! remaining connection. Each accepted socket is wrapped in a
//! [`ClosableStream`]; its [`ForceClose`] handle sits in [`LiveConnections`]
//! until the connection task finishes. The connection task also waits on
//! [`ForceClose::closed`] so that work stuck in a backend hook is dropped
//! rather than waited for.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::task::AtomicWaker;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::Notify;

use crate::metadata::ConnectionId;

#[derive(Default)]
struct CloseSignal {
    closed: AtomicBool,
    read_waker: AtomicWaker,
    write_waker: AtomicWaker,
    notify: Notify,
}

impl CloseSignal {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection force-closed")
}

/// A stream that fails all I/O once its [`ForceClose`] handle fires.
pub(crate) struct ClosableStream<S> {
    inner: S,
    signal: Arc<CloseSignal>,
}

impl<S> ClosableStream<S> {
    pub(crate) fn new(inner: S) -> (Self, ForceClose) {
        let signal = Arc::new(CloseSignal::default());
        let handle = ForceClose {
            signal: Arc::clone(&signal),
        };
        (Self { inner, signal }, handle)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ClosableStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.signal.read_waker.register(cx.waker());
        if self.signal.is_closed() {
            return Poll::Ready(Err(aborted()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ClosableStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.signal.write_waker.register(cx.waker());
        if self.signal.is_closed() {
            return Poll::Ready(Err(aborted()));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.signal.is_closed() {
            return Poll::Ready(Err(aborted()));
        }
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Force-closes one [`ClosableStream`].
#[derive(Clone)]
pub(crate) struct ForceClose {
    signal: Arc<CloseSignal>,
}

impl ForceClose {
    /// Fail pending and future I/O on the stream.
    pub(crate) fn close(&self) {
        self.signal.closed.store(true, Ordering::Release);
        self.signal.read_waker.wake();
        self.signal.write_waker.wake();
        self.signal.notify.notify_waiters();
    }

    /// Resolves once [`ForceClose::close`] has been called.
    pub(crate) async fn closed(&self) {
        let notified = self.signal.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.signal.is_closed() {
            return;
        }
        notified.await;
    }
}

/// Sockets of connections still being served.
#[derive(Default)]
pub(crate) struct LiveConnections {
    connections: Mutex<HashMap<ConnectionId, ForceClose>>,
}

impl LiveConnections {
    pub(crate) fn insert(&self, id: ConnectionId, handle: ForceClose) {
        self.lock().insert(id, handle);
    }

    pub(crate) fn remove(&self, id: &ConnectionId) {
        self.lock().remove(id);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Force-close every live socket. Returns how many were closed.
    pub(crate) fn close_all(&self) -> usize {
        let connections = self.lock();
        for handle in connections.values() {
            handle.close();
        }
        connections.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ForceClose>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
