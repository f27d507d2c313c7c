//! Deadline utilities.
//!
//! A [`Deadline`] is handed to every shutdown hook so that a backend can plan
//! its own cleanup against the same instant the engine will enforce.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, Timeout, timeout};

/// Extension trait for adding timeouts to futures.
pub trait TimeoutExt: Sized {
    /// Wrap this future with a timeout.
    fn with_timeout(self, duration: Duration) -> Timeout<Self>;

    /// Wrap this future with a timeout in seconds.
    fn with_timeout_secs(self, secs: u64) -> Timeout<Self> {
        self.with_timeout(Duration::from_secs(secs))
    }
}

impl<F: Future> TimeoutExt for F {
    fn with_timeout(self, duration: Duration) -> Timeout<Self> {
        timeout(duration, self)
    }
}

/// A point in time by which an operation should have finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Create a new deadline from now.
    #[must_use]
    pub fn from_now(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    /// A deadline that has already passed.
    #[must_use]
    pub fn expired() -> Self {
        Self { at: Instant::now() }
    }

    /// The instant this deadline falls on.
    #[must_use]
    pub const fn instant(&self) -> Instant {
        self.at
    }

    /// Check if the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Get the remaining time until the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Sleep until the deadline.
    pub async fn sleep(&self) {
        tokio::time::sleep_until(self.at).await;
    }

    /// Apply this deadline to a future.
    pub fn apply<F: Future>(&self, future: F) -> Timeout<F> {
        tokio::time::timeout_at(self.at, future)
    }
}
