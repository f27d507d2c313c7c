//! The SSH server.
//!
//! [`Server::run`] binds the listen socket, accepts connections until
//! [`Lifecycle::stop`] is called, then shuts down in this order:
//!
//! 1. Stop accepting.
//! 2. Notify every registered shutdown handler, bounded by the grace period.
//!    Connections still open when the grace period ends are force-closed.
//! 3. Wait for every connection task.
//! 4. Call [`Handler::on_shutdown`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use sshgate::prelude::*;
//!
//! struct Refuse;
//!
//! #[async_trait]
//! impl Handler for Refuse {
//!     async fn on_network_connection(
//!         &self,
//!         _metadata: ConnectionMetadata,
//!     ) -> std::result::Result<(Arc<dyn NetworkConnectionHandler>, ConnectionMetadata), HandlerError> {
//!         Err(HandlerError::new("closed for maintenance"))
//!     }
//! }
//!
//! # async fn example() -> sshgate::Result<()> {
//! let server = Server::new(ServerConfig::new().listen("127.0.0.1:2222"), Arc::new(Refuse))?;
//! let lifecycle = server.lifecycle();
//! tokio::spawn(async move { server.run().await });
//!
//! lifecycle.wait_running().await;
//! lifecycle.stop(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

mod connection;
mod dispatch;
pub mod lifecycle;
pub(crate) mod queue;
mod socket;
mod transport;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub use lifecycle::{Lifecycle, LifecycleState};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::handler::Handler;
use crate::shutdown::ShutdownRegistry;
use crate::util::Deadline;
use socket::LiveConnections;

/// State shared by the accept loop and every connection task.
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    pub(crate) transport: Arc<russh::server::Config>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) registry: Arc<ShutdownRegistry>,
    pub(crate) connections: LiveConnections,
    pub(crate) banner: Option<String>,
}

/// An SSH server driving a backend [`Handler`].
pub struct Server {
    shared: Arc<Shared>,
    lifecycle: Lifecycle,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("listen", &self.shared.config.listen)
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Create a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a host key cannot
    /// be loaded.
    pub fn new(config: ServerConfig, handler: Arc<dyn Handler>) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(config.transport()?);
        let banner = (!config.banner.is_empty()).then(|| config.banner.clone());
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                transport,
                handler,
                registry: Arc::new(ShutdownRegistry::new()),
                connections: LiveConnections::default(),
                banner,
            }),
            lifecycle: Lifecycle::new(),
        })
    }

    /// Handle for observing and stopping this server.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    /// The configuration this server was created with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// The shutdown registry. Backends may register their own resources.
    #[must_use]
    pub fn registry(&self) -> Arc<ShutdownRegistry> {
        Arc::clone(&self.shared.registry)
    }

    /// Stop the server, giving backends the configured `shutdown_timeout`
    /// to finish. Returns once [`Server::run`] has returned.
    pub async fn stop(&self) {
        self.lifecycle.stop(self.shared.config.shutdown_timeout).await;
    }

    /// Serve until stopped.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AlreadyRunning`] if another `run` is in progress
    /// - [`ServerError::Bind`] if the listen address cannot be bound
    /// - [`ServerError::Ready`] if [`Handler::on_ready`] fails
    pub async fn run(&self) -> Result<()> {
        if !self.lifecycle.begin() {
            return Err(ServerError::AlreadyRunning);
        }
        let result = self.serve().await;
        self.lifecycle.finish();
        result
    }

    async fn serve(&self) -> Result<()> {
        let address = &self.shared.config.listen;
        let listener = TcpListener::bind(address.as_str())
            .await
            .map_err(|e| ServerError::bind(address.clone(), e))?;
        let local_addr = listener.local_addr()?;

        if let Err(e) = self.shared.handler.on_ready().await {
            error!(address = %local_addr, error = %e, "Backend failed to become ready");
            drop(listener);
            return Err(ServerError::Ready(e));
        }
        self.lifecycle.set_running(local_addr);
        info!(address = %local_addr, "SSH server running");

        let mut tasks = JoinSet::new();
        let grace = loop {
            tokio::select! {
                grace = self.lifecycle.stop_requested() => break grace,
                accepted = listener.accept() => match accepted {
                    Ok((socket, remote)) => {
                        tasks.spawn(connection::serve(Arc::clone(&self.shared), socket, remote));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        };
        drop(listener);

        self.lifecycle.set_stopping();
        self.shutdown(grace, tasks).await;
        Ok(())
    }

    async fn shutdown(&self, grace: Duration, mut tasks: JoinSet<()>) {
        let deadline = Deadline::from_now(grace);
        info!(
            grace_secs = grace.as_secs_f64(),
            connections = self.shared.connections.len(),
            "Shutting down SSH server"
        );

        let notify = async {
            if deadline
                .apply(self.shared.registry.shutdown(&deadline))
                .await
                .is_err()
            {
                warn!("Shutdown handlers did not finish within the grace period");
            }
        };
        let drain = async {
            let drained = deadline
                .apply(async { while tasks.join_next().await.is_some() {} })
                .await;
            if drained.is_err() {
                let closed = self.shared.connections.close_all();
                warn!(connections = closed, "Grace period expired, closing remaining connections");
                while tasks.join_next().await.is_some() {}
            }
        };
        tokio::join!(notify, drain);

        self.shared.handler.on_shutdown(&deadline).await;
        info!("SSH server stopped");
    }
}
