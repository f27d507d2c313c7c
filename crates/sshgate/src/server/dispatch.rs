//! Per-connection dispatch loops.
//!
//! Two loops run for every authenticated connection: one for global
//! requests and one for channel opens. Each accepted session channel gets a
//! loop of its own for its requests. Loops take envelopes off their queue in
//! arrival order, call the backend and deliver the verdict. Every loop stops
//! early when the connection is force-closed; a session loop still calls
//! `on_close` when that happens.

use std::sync::Arc;

use async_trait::async_trait;
use sshgate_wire::global::{StreamLocalForward, TcpipForward};
use sshgate_wire::open::{DirectStreamLocal, DirectTcpIp};
use sshgate_wire::request::{
    EnvRequest, ExecRequest, PtyRequest, SignalRequest, SubsystemRequest, WindowChange, X11Request,
};
use sshgate_wire::{ChannelType, GlobalRequestType, Payload, RequestType};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::queue::{
    ChannelLink, ChannelQueue, InboundChannel, InboundRequest, OpenDecision, RequestQueue,
};
use super::socket::ForceClose;
use crate::channel::{ChannelTransport, SessionChannel};
use crate::error::HandlerError;
use crate::forward::{ForwardStream, ReverseForwarder, refuse_requests};
use crate::handler::{ChannelRejection, SessionChannelHandler, SshConnectionHandler};
use crate::metadata::{AuthenticatedMetadata, ChannelIds, ConnectionId};
use crate::shutdown::{ShutdownHandler, ShutdownRegistry};
use crate::util::Deadline;

/// Shared state of one authenticated connection's dispatch loops.
pub(crate) struct Dispatcher {
    metadata: AuthenticatedMetadata,
    handler: Arc<dyn SshConnectionHandler>,
    forwarder: ReverseForwarder,
    channel_ids: Arc<ChannelIds>,
    registry: Arc<ShutdownRegistry>,
    forwarding: bool,
    force: ForceClose,
}

impl Dispatcher {
    pub(crate) fn new(
        metadata: AuthenticatedMetadata,
        handler: Arc<dyn SshConnectionHandler>,
        forwarder: ReverseForwarder,
        channel_ids: Arc<ChannelIds>,
        registry: Arc<ShutdownRegistry>,
        forwarding: bool,
        force: ForceClose,
    ) -> Self {
        Self {
            metadata,
            handler,
            forwarder,
            channel_ids,
            registry,
            forwarding,
            force,
        }
    }

    fn connection_id(&self) -> &ConnectionId {
        self.metadata.connection_id()
    }

    /// Run the global request loop until the queue closes.
    pub(crate) async fn global_requests(self: Arc<Self>, mut queue: RequestQueue) {
        let serve = async {
            let mut next_id = 0u64;
            while let Some(request) = queue.recv().await {
                let request_id = next_id;
                next_id += 1;
                let accepted = self.global_request(request_id, &request).await;
                request.reply(accepted).await;
            }
        };
        tokio::select! {
            () = serve => {}
            () = self.force.closed() => {}
        }
        debug!(connection_id = %self.connection_id(), "Global request loop finished");
    }

    async fn global_request(&self, request_id: u64, request: &InboundRequest) -> bool {
        match GlobalRequestType::parse(&request.request_type) {
            Some(GlobalRequestType::Keepalive) => false,
            Some(kind) if self.forwarding => self.forwarding_request(request_id, kind, request).await,
            _ => {
                debug!(
                    connection_id = %self.connection_id(),
                    request_id,
                    request_type = %request.request_type,
                    "Unsupported global request"
                );
                self.handler
                    .on_unsupported_global_request(request_id, &request.request_type, &request.payload)
                    .await;
                false
            }
        }
    }

    async fn forwarding_request(
        &self,
        request_id: u64,
        kind: GlobalRequestType,
        request: &InboundRequest,
    ) -> bool {
        debug!(
            connection_id = %self.connection_id(),
            request_id,
            request_type = %kind,
            "Global request from client"
        );
        let result = match kind {
            GlobalRequestType::Keepalive => return false,
            GlobalRequestType::TcpipForward => {
                let Some(forward) = self.decode_global::<TcpipForward>(request_id, request).await else {
                    return false;
                };
                self.handler
                    .on_request_tcp_reverse_forward(&forward.address, forward.port, self.forwarder.clone())
                    .await
            }
            GlobalRequestType::CancelTcpipForward => {
                let Some(forward) = self.decode_global::<TcpipForward>(request_id, request).await else {
                    return false;
                };
                self.handler
                    .on_request_cancel_tcp_reverse_forward(&forward.address, forward.port)
                    .await
            }
            GlobalRequestType::StreamLocalForward => {
                let Some(forward) =
                    self.decode_global::<StreamLocalForward>(request_id, request).await
                else {
                    return false;
                };
                self.handler
                    .on_request_stream_local(&forward.socket_path, self.forwarder.clone())
                    .await
            }
            GlobalRequestType::CancelStreamLocalForward => {
                let Some(forward) =
                    self.decode_global::<StreamLocalForward>(request_id, request).await
                else {
                    return false;
                };
                self.handler
                    .on_request_cancel_stream_local(&forward.socket_path)
                    .await
            }
        };
        verdict(self.connection_id(), None, request_id, kind.as_str(), result)
    }

    async fn decode_global<P: Payload>(&self, request_id: u64, request: &InboundRequest) -> Option<P> {
        match P::decode(&request.payload) {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!(
                    connection_id = %self.connection_id(),
                    request_id,
                    request_type = %request.request_type,
                    error = %e,
                    "Failed to decode global request payload"
                );
                self.handler
                    .on_failed_decode_global_request(
                        request_id,
                        &request.request_type,
                        &request.payload,
                        &e,
                    )
                    .await;
                None
            }
        }
    }

    /// Run the channel accept loop until the queue closes, then wait for
    /// every channel it started.
    pub(crate) async fn channels(self: Arc<Self>, mut queue: ChannelQueue) {
        let mut tasks = JoinSet::new();
        let accept = async {
            while let Some(inbound) = queue.recv().await {
                let channel_id = self.channel_ids.next();
                match ChannelType::parse(&inbound.channel_type) {
                    Some(ChannelType::Session) => {
                        self.open_session(channel_id, inbound, &mut tasks).await;
                    }
                    Some(kind @ (ChannelType::DirectTcpIp | ChannelType::DirectStreamLocal))
                        if self.forwarding =>
                    {
                        self.open_direct(channel_id, kind, inbound, &mut tasks).await;
                    }
                    _ => self.unsupported_channel(channel_id, inbound).await,
                }
                while tasks.try_join_next().is_some() {}
            }
        };
        tokio::select! {
            () = accept => {}
            () = self.force.closed() => {}
        }
        // Channel tasks watch the same signal, so this ends promptly after a
        // forced close too.
        while tasks.join_next().await.is_some() {}
        debug!(connection_id = %self.connection_id(), "Channel loop finished");
    }

    async fn unsupported_channel(&self, channel_id: u64, inbound: InboundChannel) {
        debug!(
            connection_id = %self.connection_id(),
            channel_id,
            channel_type = %inbound.channel_type,
            "Unsupported channel type requested"
        );
        self.handler
            .on_unsupported_channel(channel_id, &inbound.channel_type, &inbound.extra_data)
            .await;
        let _ = inbound.decision.send(OpenDecision::Reject(
            ChannelRejection::unknown_channel_type("unsupported channel type"),
        ));
    }

    async fn open_session(&self, channel_id: u64, inbound: InboundChannel, tasks: &mut JoinSet<()>) {
        let InboundChannel {
            extra_data,
            link,
            decision,
            ..
        } = inbound;

        let channel = SessionChannel::unbound(channel_id);
        let handler = match self
            .handler
            .on_session_channel(self.metadata.channel(channel_id), extra_data, channel.clone())
            .await
        {
            Ok(handler) => handler,
            Err(rejection) => {
                info!(
                    connection_id = %self.connection_id(),
                    channel_id,
                    reason = %rejection.reason(),
                    message = rejection.message(),
                    "New session channel rejected"
                );
                let _ = decision.send(OpenDecision::Reject(rejection));
                return;
            }
        };

        let ChannelLink {
            transport,
            requests,
            stdin,
            ..
        } = link;
        let stdin = stdin.unwrap_or_else(|| mpsc::unbounded_channel().1);
        channel.bind(transport, stdin);

        let key = format!("session-{}-{}", self.connection_id(), channel_id);
        self.registry
            .register(key.clone(), Arc::new(SessionShutdown(Arc::clone(&handler))));

        let session = SessionDispatch {
            connection_id: self.connection_id().clone(),
            channel_id,
            key,
            handler,
            channel,
            forwarder: self.forwarder.clone(),
            registry: Arc::clone(&self.registry),
            force: self.force.clone(),
        };
        if decision.send(OpenDecision::Accept).is_err() {
            debug!(
                connection_id = %self.connection_id(),
                channel_id,
                "Transport went away before the session channel was accepted"
            );
            session.finish().await;
            return;
        }
        debug!(connection_id = %self.connection_id(), channel_id, "New session channel");
        tasks.spawn(session.run(requests));
    }

    async fn open_direct(
        &self,
        channel_id: u64,
        kind: ChannelType,
        inbound: InboundChannel,
        tasks: &mut JoinSet<()>,
    ) {
        let InboundChannel {
            extra_data,
            link,
            decision,
            ..
        } = inbound;

        let backend = match kind {
            ChannelType::DirectTcpIp => match DirectTcpIp::decode(&extra_data) {
                Ok(request) => self.handler.on_tcp_forward_channel(channel_id, &request).await,
                Err(e) => Err(self.undecodable_open(channel_id, kind, &e)),
            },
            _ => match DirectStreamLocal::decode(&extra_data) {
                Ok(request) => {
                    self.handler
                        .on_direct_stream_local(channel_id, &request.socket_path)
                        .await
                }
                Err(e) => Err(self.undecodable_open(channel_id, kind, &e)),
            },
        };
        let backend = match backend {
            Ok(stream) => stream,
            Err(rejection) => {
                debug!(
                    connection_id = %self.connection_id(),
                    channel_id,
                    channel_type = %kind,
                    reason = %rejection.reason(),
                    message = rejection.message(),
                    "New forwarding channel rejected"
                );
                let _ = decision.send(OpenDecision::Reject(rejection));
                return;
            }
        };
        let ChannelLink {
            transport,
            requests,
            stream,
            ..
        } = link;
        let Some(stream) = stream else {
            let _ = decision.send(OpenDecision::Reject(ChannelRejection::connect_failed(
                "channel has no data stream",
            )));
            return;
        };

        let key = format!("direct-{}-{}", self.connection_id(), channel_id);
        let stop = Arc::new(Notify::new());
        self.registry
            .register(key.clone(), Arc::new(DirectShutdown(Arc::clone(&stop))));
        if decision.send(OpenDecision::Accept).is_err() {
            self.registry.unregister(&key);
            return;
        }
        debug!(
            connection_id = %self.connection_id(),
            channel_id,
            channel_type = %kind,
            "New forwarding channel"
        );
        tasks.spawn(
            DirectForward {
                connection_id: self.connection_id().clone(),
                channel_id,
                key,
                transport,
                stop,
                registry: Arc::clone(&self.registry),
                force: self.force.clone(),
            }
            .run(stream, backend, requests),
        );
    }

    fn undecodable_open(
        &self,
        channel_id: u64,
        kind: ChannelType,
        error: &sshgate_wire::DecodeError,
    ) -> ChannelRejection {
        warn!(
            connection_id = %self.connection_id(),
            channel_id,
            channel_type = %kind,
            error = %error,
            "Failed to decode new forwarding channel payload"
        );
        ChannelRejection::connect_failed("invalid channel open payload")
    }
}

/// Log the outcome of a dispatched request and turn it into the reply.
fn verdict(
    connection_id: &ConnectionId,
    channel_id: Option<u64>,
    request_id: u64,
    request_type: &str,
    result: Result<(), HandlerError>,
) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            debug!(
                connection_id = %connection_id,
                channel_id,
                request_id,
                request_type,
                error = %e,
                "Request failed"
            );
            false
        }
    }
}

/// Request loop of one accepted session channel.
struct SessionDispatch {
    connection_id: ConnectionId,
    channel_id: u64,
    key: String,
    handler: Arc<dyn SessionChannelHandler>,
    channel: SessionChannel,
    forwarder: ReverseForwarder,
    registry: Arc<ShutdownRegistry>,
    force: ForceClose,
}

impl SessionDispatch {
    async fn run(self, mut requests: RequestQueue) {
        let serve = async {
            let mut next_id = 0u64;
            while let Some(request) = requests.recv().await {
                let request_id = next_id;
                next_id += 1;
                let accepted = self.request(request_id, &request).await;
                // Replies go out in request order: the next request is not
                // taken before this one is answered.
                request.reply(accepted).await;
            }
        };
        tokio::select! {
            () = serve => {}
            () = self.force.closed() => debug!(
                connection_id = %self.connection_id,
                channel_id = self.channel_id,
                "Session channel force-closed"
            ),
        }
        self.finish().await;
    }

    async fn finish(self) {
        self.registry.unregister(&self.key);
        self.channel.mark_closed();
        self.handler.on_close().await;
        debug!(
            connection_id = %self.connection_id,
            channel_id = self.channel_id,
            "Session channel closed"
        );
    }

    async fn request(&self, request_id: u64, request: &InboundRequest) -> bool {
        let Some(kind) = RequestType::parse(&request.request_type) else {
            return self.unsupported(request_id, request).await;
        };
        debug!(
            connection_id = %self.connection_id,
            channel_id = self.channel_id,
            request_id,
            request_type = %kind,
            "Channel request from client"
        );

        let handler = &self.handler;
        let result = match kind {
            RequestType::Env => {
                let Some(env) = self.decode::<EnvRequest>(request_id, request).await else {
                    return false;
                };
                handler.on_env_request(request_id, &env.name, &env.value).await
            }
            RequestType::Pty => {
                let Some(pty) = self.decode::<PtyRequest>(request_id, request).await else {
                    return false;
                };
                handler.on_pty_request(request_id, &pty).await
            }
            RequestType::Shell => handler.on_shell(request_id).await,
            RequestType::Exec => {
                let Some(exec) = self.decode::<ExecRequest>(request_id, request).await else {
                    return false;
                };
                handler.on_exec_request(request_id, &exec.exec).await
            }
            RequestType::Subsystem => {
                let Some(subsystem) = self.decode::<SubsystemRequest>(request_id, request).await
                else {
                    return false;
                };
                handler.on_subsystem(request_id, &subsystem.subsystem).await
            }
            RequestType::WindowChange => {
                let Some(change) = self.decode::<WindowChange>(request_id, request).await else {
                    return false;
                };
                handler.on_window(request_id, &change).await
            }
            RequestType::Signal => {
                let Some(signal) = self.decode::<SignalRequest>(request_id, request).await else {
                    return false;
                };
                handler.on_signal(request_id, &signal.signal).await
            }
            RequestType::X11 => {
                let Some(x11) = self.decode::<X11Request>(request_id, request).await else {
                    return false;
                };
                handler
                    .on_x11_request(request_id, &x11, self.forwarder.clone())
                    .await
            }
            // Only ever sent by the server.
            RequestType::ExitStatus | RequestType::ExitSignal => {
                return self.unsupported(request_id, request).await;
            }
        };
        verdict(
            &self.connection_id,
            Some(self.channel_id),
            request_id,
            kind.as_str(),
            result,
        )
    }

    async fn unsupported(&self, request_id: u64, request: &InboundRequest) -> bool {
        debug!(
            connection_id = %self.connection_id,
            channel_id = self.channel_id,
            request_id,
            request_type = %request.request_type,
            "Unsupported channel request"
        );
        self.handler
            .on_unsupported_channel_request(request_id, &request.request_type, &request.payload)
            .await;
        false
    }

    async fn decode<P: Payload>(&self, request_id: u64, request: &InboundRequest) -> Option<P> {
        match P::decode(&request.payload) {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!(
                    connection_id = %self.connection_id,
                    channel_id = self.channel_id,
                    request_id,
                    request_type = %request.request_type,
                    error = %e,
                    "Failed to decode channel request payload"
                );
                self.handler
                    .on_failed_decode_channel_request(
                        request_id,
                        &request.request_type,
                        &request.payload,
                        &e,
                    )
                    .await;
                None
            }
        }
    }
}

/// Byte copy between a direct channel and the backend's stream.
struct DirectForward {
    connection_id: ConnectionId,
    channel_id: u64,
    key: String,
    transport: Arc<dyn ChannelTransport>,
    stop: Arc<Notify>,
    registry: Arc<ShutdownRegistry>,
    force: ForceClose,
}

impl DirectForward {
    async fn run(
        self,
        mut channel: Box<dyn ForwardStream>,
        mut backend: Box<dyn ForwardStream>,
        requests: RequestQueue,
    ) {
        tokio::select! {
            copied = tokio::io::copy_bidirectional(&mut channel, &mut backend) => match copied {
                Ok((to_backend, to_client)) => debug!(
                    connection_id = %self.connection_id,
                    channel_id = self.channel_id,
                    to_backend,
                    to_client,
                    "Forwarding channel finished"
                ),
                Err(e) => warn!(
                    connection_id = %self.connection_id,
                    channel_id = self.channel_id,
                    error = %e,
                    "Forwarding connection error"
                ),
            },
            () = refuse_requests(requests) => {}
            () = self.stop.notified() => {}
            () = self.force.closed() => {}
        }
        let _ = backend.shutdown().await;
        let _ = self.transport.close().await;
        self.registry.unregister(&self.key);
    }
}

struct SessionShutdown(Arc<dyn SessionChannelHandler>);

#[async_trait]
impl ShutdownHandler for SessionShutdown {
    async fn on_shutdown(&self, deadline: &Deadline) {
        self.0.on_shutdown(deadline).await;
    }
}

struct DirectShutdown(Arc<Notify>);

#[async_trait]
impl ShutdownHandler for DirectShutdown {
    async fn on_shutdown(&self, _deadline: &Deadline) {
        self.0.notify_one();
    }
}
