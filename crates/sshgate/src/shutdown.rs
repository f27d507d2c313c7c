//! Shutdown coordination.
//!
//! Every live resource that wants a say in graceful shutdown registers a
//! [`ShutdownHandler`] under a unique key while it is active. On shutdown the
//! registry calls all of them concurrently with the same [`Deadline`].
//!
//! Keys used by the engine:
//!
//! | Key | Resource |
//! |-----|----------|
//! | `network-<connection>` | network connection handler |
//! | `ssh-<connection>` | SSH connection handler |
//! | `session-<connection>-<channel>` | session channel handler |
//! | `direct-<connection>-<channel>` | `direct-tcpip` or `direct-streamlocal` copy |

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use crate::util::Deadline;

/// Something that can be asked to wind down.
#[async_trait]
pub trait ShutdownHandler: Send + Sync {
    /// Finish or abort outstanding work, ideally before `deadline`.
    async fn on_shutdown(&self, deadline: &Deadline);
}

/// Registry of active shutdown handlers.
#[derive(Default)]
pub struct ShutdownRegistry {
    handlers: Mutex<HashMap<String, Arc<dyn ShutdownHandler>>>,
}

impl std::fmt::Debug for ShutdownRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl ShutdownRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. An existing handler under the same key is
    /// replaced.
    pub fn register(&self, key: impl Into<String>, handler: Arc<dyn ShutdownHandler>) {
        self.lock().insert(key.into(), handler);
    }

    /// Remove a handler. Removing an absent key does nothing.
    pub fn unregister(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Whether a key is registered.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Call every currently registered handler concurrently and wait for all
    /// of them.
    ///
    /// Handlers registered after the call starts are not called. This does
    /// not enforce `deadline` itself; wrap it with [`Deadline::apply`] to do
    /// so.
    pub async fn shutdown(&self, deadline: &Deadline) {
        let snapshot: Vec<(String, Arc<dyn ShutdownHandler>)> = self
            .lock()
            .iter()
            .map(|(key, handler)| (key.clone(), Arc::clone(handler)))
            .collect();
        debug!(handlers = snapshot.len(), "Notifying shutdown handlers");

        join_all(snapshot.iter().map(|(key, handler)| async move {
            handler.on_shutdown(deadline).await;
            debug!(key = %key, "Shutdown handler finished");
        }))
        .await;
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn ShutdownHandler>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl ShutdownHandler for Counting {
        async fn on_shutdown(&self, _deadline: &Deadline) {
            tokio::time::sleep(self.delay).await;
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting(delay: Duration) -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    #[test]
    fn register_and_unregister() {
        let registry = ShutdownRegistry::new();
        registry.register("network-1", counting(Duration::ZERO));
        registry.register("ssh-1", counting(Duration::ZERO));
        assert_eq!(registry.keys(), vec!["network-1", "ssh-1"]);

        registry.unregister("ssh-1");
        registry.unregister("ssh-1");
        registry.unregister("never-registered");
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("network-1"));
    }

    #[tokio::test]
    async fn double_registration_replaces() {
        let registry = ShutdownRegistry::new();
        let first = counting(Duration::ZERO);
        let second = counting(Duration::ZERO);
        registry.register("session-1-0", first.clone());
        registry.register("session-1-0", second.clone());

        registry.shutdown(&Deadline::from_now(Duration::from_secs(1))).await;
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_run_concurrently() {
        let registry = ShutdownRegistry::new();
        let handlers: Vec<_> = (0..5).map(|_| counting(Duration::from_secs(2))).collect();
        for (i, handler) in handlers.iter().enumerate() {
            registry.register(format!("ssh-{i}"), handler.clone());
        }

        let start = tokio::time::Instant::now();
        registry.shutdown(&Deadline::from_now(Duration::from_secs(5))).await;
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(handlers.iter().all(|h| h.calls.load(Ordering::SeqCst) == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_slow_handler() {
        let registry = ShutdownRegistry::new();
        registry.register("session-1-0", counting(Duration::from_secs(10)));

        let deadline = Deadline::from_now(Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        let finished = deadline.apply(registry.shutdown(&deadline)).await;
        assert!(finished.is_err());
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn empty_registry_returns_immediately() {
        let registry = ShutdownRegistry::new();
        assert!(registry.is_empty());
        registry.shutdown(&Deadline::expired()).await;
    }
}
