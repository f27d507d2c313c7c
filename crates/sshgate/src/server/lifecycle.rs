//! Observing and stopping a running server.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Where a server is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// `run()` has not been called.
    Idle,
    /// Binding the listener and calling `on_ready`.
    Starting,
    /// Accepting connections.
    Running,
    /// Shutting down.
    Stopping,
    /// `run()` has returned or is about to.
    Stopped,
}

impl LifecycleState {
    /// Whether a run is in progress.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
struct Status {
    state: LifecycleState,
    local_addr: Option<SocketAddr>,
}

struct Inner {
    status: watch::Sender<Status>,
    stop: watch::Sender<Option<Duration>>,
}

/// Handle to a server's run.
///
/// Cheap to clone. Any clone can watch the state or ask the server to stop.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(Status {
            state: LifecycleState::Idle,
            local_addr: None,
        });
        let (stop, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner { status, stop }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.status.borrow().state
    }

    /// The address the listener is bound to, once running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.status.borrow().local_addr
    }

    /// Wait until the server accepts connections and return its address.
    ///
    /// Returns `None` if the run ended without ever accepting, for example
    /// because the address was already in use.
    pub async fn wait_running(&self) -> Option<SocketAddr> {
        let mut status = self.inner.status.subscribe();
        let reached = status
            .wait_for(|s| {
                matches!(
                    s.state,
                    LifecycleState::Running | LifecycleState::Stopping | LifecycleState::Stopped
                )
            })
            .await
            .ok()?;
        reached.local_addr
    }

    /// Wait until the run has finished.
    pub async fn wait_stopped(&self) {
        let mut status = self.inner.status.subscribe();
        let _ = status
            .wait_for(|s| s.state == LifecycleState::Stopped)
            .await;
    }

    /// Ask the server to stop without waiting.
    ///
    /// Backends get `grace` to finish their work before the remaining
    /// connections are force-closed.
    pub fn request_stop(&self, grace: Duration) {
        self.inner.stop.send_replace(Some(grace));
    }

    /// Stop the server and wait until it has stopped. Does nothing if no run
    /// is in progress.
    pub async fn stop(&self, grace: Duration) {
        if !self.state().is_active() {
            return;
        }
        self.request_stop(grace);
        self.wait_stopped().await;
    }

    /// Enter `Starting`. Returns `false` if a run is already in progress.
    pub(crate) fn begin(&self) -> bool {
        let mut started = false;
        self.inner.status.send_if_modified(|status| {
            if status.state.is_active() {
                return false;
            }
            *status = Status {
                state: LifecycleState::Starting,
                local_addr: None,
            };
            started = true;
            true
        });
        if started {
            self.inner.stop.send_replace(None);
        }
        started
    }

    pub(crate) fn set_running(&self, local_addr: SocketAddr) {
        self.inner.status.send_modify(|status| {
            status.state = LifecycleState::Running;
            status.local_addr = Some(local_addr);
        });
    }

    pub(crate) fn set_stopping(&self) {
        self.inner
            .status
            .send_modify(|status| status.state = LifecycleState::Stopping);
    }

    pub(crate) fn finish(&self) {
        self.inner
            .status
            .send_modify(|status| status.state = LifecycleState::Stopped);
    }

    /// Resolves with the grace period once a stop has been requested.
    pub(crate) async fn stop_requested(&self) -> Duration {
        let mut stop = self.inner.stop.subscribe();
        match stop.wait_for(Option::is_some).await {
            Ok(grace) => grace.unwrap_or_default(),
            // The sender lives in `self`, so this cannot happen.
            Err(_) => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:2222".parse().unwrap()
    }

    #[test]
    fn begin_refuses_second_run() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Idle);
        assert!(lifecycle.begin());
        assert!(!lifecycle.begin());

        lifecycle.set_running(addr());
        assert!(!lifecycle.begin());

        lifecycle.finish();
        assert!(lifecycle.begin());
        assert_eq!(lifecycle.local_addr(), None);
    }

    #[tokio::test]
    async fn wait_running_reports_address() {
        let lifecycle = Lifecycle::new();
        let watcher = lifecycle.clone();
        let waiting = tokio::spawn(async move { watcher.wait_running().await });

        lifecycle.begin();
        lifecycle.set_running(addr());
        assert_eq!(waiting.await.unwrap(), Some(addr()));
    }

    #[tokio::test]
    async fn wait_running_ends_on_failed_start() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin();
        lifecycle.finish();
        assert_eq!(lifecycle.wait_running().await, None);
    }

    #[tokio::test]
    async fn stop_waits_for_stopped() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin();
        lifecycle.set_running(addr());

        let server = lifecycle.clone();
        let run = tokio::spawn(async move {
            let grace = server.stop_requested().await;
            server.set_stopping();
            server.finish();
            grace
        });

        lifecycle.stop(Duration::from_secs(5)).await;
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert_eq!(run.await.unwrap(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stop_when_idle_returns() {
        let lifecycle = Lifecycle::new();
        lifecycle.stop(Duration::from_secs(1)).await;
        assert_eq!(lifecycle.state(), LifecycleState::Idle);
    }

    #[test]
    fn state_display() {
        assert_eq!(LifecycleState::Running.to_string(), "running");
        assert!(LifecycleState::Stopping.is_active());
        assert!(!LifecycleState::Stopped.is_active());
    }
}
