//! One accepted socket, from handshake to disconnect.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::Shared;
use super::dispatch::Dispatcher;
use super::socket::ClosableStream;
use super::transport::{Established, Routes, RusshOpener, TransportHandler};
use crate::error::ServerError;
use crate::forward::ReverseForwarder;
use crate::handler::{NetworkConnectionHandler, SshConnectionHandler};
use crate::metadata::{ChannelIds, ConnectionId, ConnectionMetadata};
use crate::shutdown::ShutdownHandler;
use crate::util::Deadline;

/// Serve one accepted socket until the client goes away.
pub(crate) async fn serve(shared: Arc<Shared>, socket: TcpStream, remote: SocketAddr) {
    let connection_id = ConnectionId::generate();
    let metadata = ConnectionMetadata::new(connection_id.clone(), remote, socket.local_addr().ok());

    let (network, metadata) = match shared.handler.on_network_connection(metadata).await {
        Ok(accepted) => accepted,
        Err(e) => {
            info!(
                connection_id = %connection_id,
                remote = %remote,
                error = %e,
                "Backend refused the connection"
            );
            return;
        }
    };
    debug!(connection_id = %connection_id, remote = %remote, "Client connected");

    let network_key = format!("network-{connection_id}");
    shared
        .registry
        .register(network_key.clone(), Arc::new(NetworkShutdown(Arc::clone(&network))));

    let (socket, force_close) = ClosableStream::new(socket);
    shared
        .connections
        .insert(connection_id.clone(), force_close.clone());

    let routes = Arc::new(Routes::default());
    let (channels, channel_queue) = mpsc::unbounded_channel();
    let (globals, global_queue) = mpsc::unbounded_channel();
    let (established_tx, established_rx) = oneshot::channel();
    let transport = TransportHandler::new(
        metadata.clone(),
        Arc::clone(&network),
        shared.banner.clone(),
        Arc::clone(&routes),
        channels,
        globals,
        established_tx,
    );

    let running =
        match russh::server::run_stream(Arc::clone(&shared.transport), socket, transport).await {
            Ok(running) => running,
            Err(e) => {
                handshake_failed(&shared, &network, &metadata, &network_key, e).await;
                return;
            }
        };
    let mut running = Box::pin(running);

    let established = tokio::select! {
        biased;
        established = established_rx => established.ok(),
        () = force_close.closed() => {
            drop(running);
            let reason = ServerError::handshake("connection force-closed during authentication");
            handshake_failed(&shared, &network, &metadata, &network_key, reason).await;
            return;
        }
        result = &mut running => {
            let reason = match result {
                Ok(()) => ServerError::handshake("connection closed before authentication completed"),
                Err(e) => e,
            };
            handshake_failed(&shared, &network, &metadata, &network_key, reason).await;
            return;
        }
    };
    let Some(Established {
        handler,
        metadata: authenticated,
        handle,
    }) = established
    else {
        let reason = match running.await {
            Ok(()) => ServerError::handshake("connection closed before authentication completed"),
            Err(e) => e,
        };
        handshake_failed(&shared, &network, &metadata, &network_key, reason).await;
        return;
    };

    debug!(
        connection_id = %connection_id,
        user = %authenticated.authenticated_username,
        client_version = authenticated.client_version.as_deref().unwrap_or(""),
        "Handshake complete"
    );
    let ssh_key = format!("ssh-{connection_id}");
    shared
        .registry
        .register(ssh_key.clone(), Arc::new(SshShutdown(Arc::clone(&handler))));

    let channel_ids = Arc::new(ChannelIds::default());
    let forwarder = ReverseForwarder::new(
        connection_id.clone(),
        Arc::clone(&channel_ids),
        Arc::new(RusshOpener::new(handle, Arc::clone(&routes))),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        authenticated,
        handler,
        forwarder,
        channel_ids,
        Arc::clone(&shared.registry),
        shared.config.forwarding,
        force_close.clone(),
    ));
    let global_loop = tokio::spawn(Arc::clone(&dispatcher).global_requests(global_queue));
    let channel_loop = tokio::spawn(dispatcher.channels(channel_queue));

    tokio::select! {
        result = &mut running => {
            if let Err(e) = result {
                debug!(connection_id = %connection_id, error = %e, "Connection ended with error");
            }
        }
        () = force_close.closed() => {
            warn!(connection_id = %connection_id, "Connection force-closed");
        }
    }
    // Drops the transport handler and with it the senders of the channel and
    // global queues.
    drop(running);

    // The transport is gone; end every channel's request queue so the loops
    // can finish even while a backend still holds a forwarder.
    routes.clear();
    for (name, task) in [("global", global_loop), ("channel", channel_loop)] {
        if let Err(e) = task.await {
            warn!(
                connection_id = %connection_id,
                loop_name = name,
                error = %e,
                "Dispatch loop failed"
            );
        }
    }

    shared.connections.remove(&connection_id);
    shared.registry.unregister(&ssh_key);
    shared.registry.unregister(&network_key);
    network.on_disconnect().await;
    debug!(connection_id = %connection_id, "Client disconnected");
}

async fn handshake_failed(
    shared: &Shared,
    network: &Arc<dyn NetworkConnectionHandler>,
    metadata: &ConnectionMetadata,
    network_key: &str,
    reason: ServerError,
) {
    debug!(
        connection_id = %metadata.connection_id,
        error = %reason,
        "Handshake failed"
    );
    network.on_handshake_failed(metadata, &reason).await;
    shared.connections.remove(&metadata.connection_id);
    shared.registry.unregister(network_key);
    network.on_disconnect().await;
}

struct NetworkShutdown(Arc<dyn NetworkConnectionHandler>);

#[async_trait]
impl ShutdownHandler for NetworkShutdown {
    async fn on_shutdown(&self, deadline: &Deadline) {
        self.0.on_shutdown(deadline).await;
    }
}

struct SshShutdown(Arc<dyn SshConnectionHandler>);

#[async_trait]
impl ShutdownHandler for SshShutdown {
    async fn on_shutdown(&self, deadline: &Deadline) {
        self.0.on_shutdown(deadline).await;
    }
}
