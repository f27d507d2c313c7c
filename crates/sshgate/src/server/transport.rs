//! Adapter between russh's callback-style handler and the dispatch loops.
//!
//! russh drives one [`TransportHandler`] per connection. Authentication is
//! answered directly from the backend. Everything after that is turned into
//! queue envelopes ([`InboundChannel`], [`InboundRequest`]) so the dispatch
//! loops can assign ids and call the backend in order.
//!
//! Channel request callbacks return as soon as the request is queued; the
//! session's loop sends the reply through the connection [`Handle`]. Channel
//! open and global request callbacks wait for the verdict, because russh
//! sends those replies when the callback returns. While they wait, russh
//! does not process anything else on the connection.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use russh::keys::PublicKey as RusshPublicKey;
use russh::server::{Auth, Handle, Msg, Response, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty, Sig};
use sshgate_wire::global::{StreamLocalForward, TcpipForward};
use sshgate_wire::open::{DirectStreamLocal, DirectTcpIp, ForwardedTcpIp, X11Open};
use sshgate_wire::request::{
    EnvRequest, ExecRequest, ExitSignal, PtyRequest, SignalRequest, SubsystemRequest,
    WindowChange, X11Request,
};
use sshgate_wire::{ChannelType, GlobalRequestType, Payload, RequestType};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::queue::{
    ChannelLink, ChannelSender, InboundChannel, InboundRequest, OpenDecision, RequestSender,
};
use crate::channel::ChannelTransport;
use crate::config::AuthMethod;
use crate::error::{Result, ServerError};
use crate::forward::{ChannelOpener, ForwardStream, OpenedChannel, ReverseChannel};
use crate::handler::{
    AuthResponse, AuthResult, KeyboardInteractiveAnswers, KeyboardInteractiveQuestion,
    KeyboardInteractiveStep, NetworkConnectionHandler, PublicKey, SshConnectionHandler,
};
use crate::metadata::{AuthenticatedMetadata, ConnectionMetadata};

/// Per-channel forwarding targets for client traffic.
struct Route {
    requests: RequestSender,
    stdin: Option<mpsc::UnboundedSender<Bytes>>,
    transport: Arc<RusshChannel>,
}

/// Transport channel id to dispatch queues, shared by the adapter and the
/// reverse channel opener.
#[derive(Default)]
pub(crate) struct Routes {
    routes: Mutex<HashMap<ChannelId, Route>>,
}

impl Routes {
    fn insert(&self, id: ChannelId, route: Route) {
        self.lock().insert(id, route);
    }

    fn remove(&self, id: ChannelId) {
        self.lock().remove(&id);
    }

    fn requests(&self, id: ChannelId) -> Option<(RequestSender, Arc<RusshChannel>)> {
        self.lock()
            .get(&id)
            .map(|route| (route.requests.clone(), Arc::clone(&route.transport)))
    }

    fn stdin(&self, id: ChannelId) -> Option<mpsc::UnboundedSender<Bytes>> {
        self.lock().get(&id).and_then(|route| route.stdin.clone())
    }

    fn close_stdin(&self, id: ChannelId) {
        if let Some(route) = self.lock().get_mut(&id) {
            route.stdin = None;
        }
    }

    /// Drop every route, ending the request queues of all channels.
    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelId, Route>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "channel closed")
}

/// Outbound side of one russh channel.
pub(crate) struct RusshChannel {
    handle: Handle,
    id: ChannelId,
}

impl RusshChannel {
    pub(crate) const fn new(handle: Handle, id: ChannelId) -> Self {
        Self { handle, id }
    }
}

#[async_trait]
impl ChannelTransport for RusshChannel {
    async fn data(&self, data: &[u8]) -> io::Result<()> {
        self.handle
            .data(self.id, CryptoVec::from_slice(data))
            .await
            .map_err(|_| closed())
    }

    async fn extended_data(&self, code: u32, data: &[u8]) -> io::Result<()> {
        self.handle
            .extended_data(self.id, code, CryptoVec::from_slice(data))
            .await
            .map_err(|_| closed())
    }

    async fn exit_status(&self, status: u32) -> io::Result<()> {
        self.handle
            .exit_status_request(self.id, status)
            .await
            .map_err(|_| closed())
    }

    async fn exit_signal(&self, signal: &ExitSignal) -> io::Result<()> {
        self.handle
            .exit_signal_request(
                self.id,
                signal_from_name(&signal.signal),
                signal.core_dumped,
                signal.error_message.clone(),
                signal.language_tag.clone(),
            )
            .await
            .map_err(|_| closed())
    }

    async fn eof(&self) -> io::Result<()> {
        self.handle.eof(self.id).await.map_err(|_| closed())
    }

    async fn close(&self) -> io::Result<()> {
        self.handle.close(self.id).await.map_err(|_| closed())
    }

    async fn reply(&self, accepted: bool) -> io::Result<()> {
        let sent = if accepted {
            self.handle.channel_success(self.id).await
        } else {
            self.handle.channel_failure(self.id).await
        };
        sent.map_err(|()| closed())
    }
}

/// Opens server-initiated channels on one connection.
pub(crate) struct RusshOpener {
    handle: Handle,
    routes: Arc<Routes>,
}

impl RusshOpener {
    pub(crate) const fn new(handle: Handle, routes: Arc<Routes>) -> Self {
        Self { handle, routes }
    }
}

#[async_trait]
impl ChannelOpener for RusshOpener {
    async fn open(&self, request: &ReverseChannel) -> Result<OpenedChannel> {
        let opened = match request {
            ReverseChannel::Tcp(open) => {
                self.handle
                    .channel_open_forwarded_tcpip(
                        open.connected_address.clone(),
                        open.connected_port,
                        open.originator_address.clone(),
                        open.originator_port,
                    )
                    .await
            }
            ReverseChannel::Unix(open) => {
                self.handle
                    .channel_open_forwarded_streamlocal(open.socket_path.clone())
                    .await
            }
            ReverseChannel::X11(open) => {
                self.handle
                    .channel_open_x11(open.originator_address.clone(), open.originator_port)
                    .await
            }
        };
        let channel =
            opened.map_err(|e| ServerError::forward(request.channel_type(), e.to_string()))?;

        let (requests, queue) = mpsc::unbounded_channel();
        self.routes.insert(
            channel.id(),
            Route {
                requests,
                stdin: None,
                transport: Arc::new(RusshChannel::new(self.handle.clone(), channel.id())),
            },
        );
        Ok(OpenedChannel {
            stream: Box::new(channel.into_stream()),
            requests: queue,
        })
    }
}

/// Handed to the connection task once the client is authenticated.
pub(crate) struct Established {
    pub(crate) handler: Arc<dyn SshConnectionHandler>,
    pub(crate) metadata: AuthenticatedMetadata,
    pub(crate) handle: Handle,
}

/// russh handler for one connection.
pub(crate) struct TransportHandler {
    connection: ConnectionMetadata,
    network: Arc<dyn NetworkConnectionHandler>,
    banner: Option<String>,
    routes: Arc<Routes>,
    channels: ChannelSender,
    globals: RequestSender,
    authenticated: Option<(Arc<dyn SshConnectionHandler>, AuthenticatedMetadata)>,
    established: Option<oneshot::Sender<Established>>,
    keyboard_questions: Option<Vec<KeyboardInteractiveQuestion>>,
}

impl TransportHandler {
    pub(crate) fn new(
        connection: ConnectionMetadata,
        network: Arc<dyn NetworkConnectionHandler>,
        banner: Option<String>,
        routes: Arc<Routes>,
        channels: ChannelSender,
        globals: RequestSender,
        established: oneshot::Sender<Established>,
    ) -> Self {
        Self {
            connection,
            network,
            banner,
            routes,
            channels,
            globals,
            authenticated: None,
            established: Some(established),
            keyboard_questions: None,
        }
    }

    async fn complete_auth(&mut self, method: AuthMethod, result: AuthResult) -> Auth {
        let user = result.metadata.username.clone();
        let reason = result
            .reason
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        match result.response {
            AuthResponse::Success => {
                info!(
                    connection_id = %self.connection.connection_id,
                    user = %user,
                    method = method.as_str(),
                    "User authenticated"
                );
                match self.network.on_handshake_success(result.metadata).await {
                    Ok(established) => {
                        self.authenticated = Some(established);
                        Auth::Accept
                    }
                    Err(e) => {
                        error!(
                            connection_id = %self.connection.connection_id,
                            user = %user,
                            error = %e,
                            "Backend failed to set up the authenticated connection"
                        );
                        reject()
                    }
                }
            }
            AuthResponse::Failure => {
                info!(
                    connection_id = %self.connection.connection_id,
                    user = %user,
                    method = method.as_str(),
                    reason = %reason,
                    "Authentication failed"
                );
                reject()
            }
            AuthResponse::Unavailable => {
                warn!(
                    connection_id = %self.connection.connection_id,
                    user = %user,
                    method = method.as_str(),
                    reason = %reason,
                    "Authentication backend unavailable"
                );
                reject()
            }
        }
    }

    async fn open_channel(
        &mut self,
        channel_type: ChannelType,
        extra_data: Bytes,
        channel: Channel<Msg>,
        handle: Handle,
    ) -> bool {
        let id = channel.id();
        let (requests, queue) = mpsc::unbounded_channel();
        let transport = Arc::new(RusshChannel::new(handle, id));
        let route_transport = Arc::clone(&transport);

        let (stdin, link) = if channel_type == ChannelType::Session {
            let (stdin, stdin_queue) = mpsc::unbounded_channel();
            let link = ChannelLink {
                transport,
                requests: queue,
                stdin: Some(stdin_queue),
                stream: None,
            };
            (Some(stdin), link)
        } else {
            let link = ChannelLink {
                transport,
                requests: queue,
                stdin: None,
                stream: Some(Box::new(channel.into_stream()) as Box<dyn ForwardStream>),
            };
            (None, link)
        };

        // Installed before the verdict so that nothing the client sends
        // right after the confirmation is lost.
        self.routes.insert(
            id,
            Route {
                requests,
                stdin,
                transport: route_transport,
            },
        );

        let (inbound, decision) = InboundChannel::new(channel_type.as_str(), extra_data, link);
        if self.channels.send(inbound).is_err() {
            self.routes.remove(id);
            return false;
        }
        match decision.await {
            Ok(OpenDecision::Accept) => true,
            Ok(OpenDecision::Reject(rejection)) => {
                debug!(
                    connection_id = %self.connection.connection_id,
                    channel_type = %channel_type,
                    reason = %rejection.reason(),
                    message = rejection.message(),
                    "Channel open rejected"
                );
                self.routes.remove(id);
                false
            }
            Err(_) => {
                self.routes.remove(id);
                false
            }
        }
    }

    /// Queue a channel request. The dispatch loop sends the reply unless
    /// `want_reply` is false; a request for a channel without a route is
    /// refused here.
    fn channel_request(
        &self,
        channel: ChannelId,
        request_type: RequestType,
        payload: Bytes,
        want_reply: bool,
        session: &mut Session,
    ) {
        let queued = self.routes.requests(channel).is_some_and(|(requests, transport)| {
            let transport = want_reply.then(|| transport as Arc<dyn ChannelTransport>);
            requests
                .send(InboundRequest::on_channel(request_type.as_str(), payload, transport))
                .is_ok()
        });
        if !queued && want_reply {
            let _ = session.channel_failure(channel);
        }
    }

    async fn global_request(&mut self, request_type: GlobalRequestType, payload: Bytes) -> bool {
        let (request, verdict) = InboundRequest::new(request_type.as_str(), payload);
        if self.globals.send(request).is_err() {
            return false;
        }
        verdict.await.unwrap_or(false)
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

/// Signal name without the `SIG` prefix, as carried on the wire.
fn signal_name(signal: &Sig) -> String {
    match signal {
        Sig::Custom(name) => name.clone(),
        other => format!("{other:?}"),
    }
}

fn signal_from_name(name: &str) -> Sig {
    match name {
        "ABRT" => Sig::ABRT,
        "ALRM" => Sig::ALRM,
        "FPE" => Sig::FPE,
        "HUP" => Sig::HUP,
        "ILL" => Sig::ILL,
        "INT" => Sig::INT,
        "KILL" => Sig::KILL,
        "PIPE" => Sig::PIPE,
        "QUIT" => Sig::QUIT,
        "SEGV" => Sig::SEGV,
        "TERM" => Sig::TERM,
        "USR1" => Sig::USR1,
        other => Sig::Custom(other.to_string()),
    }
}

impl russh::server::Handler for TransportHandler {
    type Error = ServerError;

    async fn authentication_banner(&mut self) -> std::result::Result<Option<String>, Self::Error> {
        Ok(self.banner.clone())
    }

    async fn auth_password(
        &mut self,
        user: &str,
        password: &str,
    ) -> std::result::Result<Auth, Self::Error> {
        let pending = self.connection.start_auth(user);
        let result = self
            .network
            .on_auth_password(&pending, password.as_bytes())
            .await;
        Ok(self.complete_auth(AuthMethod::Password, result).await)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &RusshPublicKey,
    ) -> std::result::Result<Auth, Self::Error> {
        let key = match public_key.to_openssh() {
            Ok(encoded) => PublicKey::new(encoded),
            Err(e) => {
                debug!(
                    connection_id = %self.connection.connection_id,
                    error = %e,
                    "Cannot encode client public key"
                );
                return Ok(reject());
            }
        };
        let pending = self.connection.start_auth(user);
        let result = self.network.on_auth_pubkey(&pending, &key).await;
        Ok(self.complete_auth(AuthMethod::PublicKey, result).await)
    }

    async fn auth_keyboard_interactive<'a>(
        &'a mut self,
        user: &str,
        _submethods: &str,
        response: Option<Response<'a>>,
    ) -> std::result::Result<Auth, Self::Error> {
        let pending = self.connection.start_auth(user);
        let answers = match (response, self.keyboard_questions.take()) {
            (Some(response), Some(questions)) => {
                let responses: Vec<String> = response
                    .into_iter()
                    .map(|item| String::from_utf8_lossy(&item).into_owned())
                    .collect();
                Some(KeyboardInteractiveAnswers::new(&questions, responses))
            }
            _ => None,
        };

        match self
            .network
            .on_auth_keyboard_interactive(&pending, answers.as_ref())
            .await
        {
            KeyboardInteractiveStep::Challenge {
                instruction,
                questions,
            } => {
                let prompts: Vec<(Cow<'static, str>, bool)> = questions
                    .iter()
                    .map(|q| (Cow::Owned(q.question.clone()), q.echo_response))
                    .collect();
                self.keyboard_questions = Some(questions);
                Ok(Auth::Partial {
                    name: Cow::Borrowed(""),
                    instructions: Cow::Owned(instruction),
                    prompts: Cow::Owned(prompts),
                })
            }
            KeyboardInteractiveStep::Done(result) => Ok(self
                .complete_auth(AuthMethod::KeyboardInteractive, result)
                .await),
        }
    }

    async fn auth_succeeded(&mut self, session: &mut Session) -> std::result::Result<(), Self::Error> {
        let Some((handler, mut metadata)) = self.authenticated.take() else {
            return Err(ServerError::handshake(
                "authentication succeeded without a connection handler",
            ));
        };
        metadata.client_version = Some(String::from_utf8_lossy(session.remote_sshid()).into_owned());
        if let Some(established) = self.established.take() {
            let _ = established.send(Established {
                handler,
                metadata,
                handle: session.handle(),
            });
        }
        Ok(())
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        let handle = session.handle();
        Ok(self
            .open_channel(ChannelType::Session, Bytes::new(), channel, handle)
            .await)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        let extra_data = DirectTcpIp {
            host_to_connect: host_to_connect.to_string(),
            port_to_connect,
            originator_address: originator_address.to_string(),
            originator_port,
        }
        .to_bytes();
        let handle = session.handle();
        Ok(self
            .open_channel(ChannelType::DirectTcpIp, extra_data, channel, handle)
            .await)
    }

    async fn channel_open_x11(
        &mut self,
        channel: Channel<Msg>,
        originator_address: &str,
        originator_port: u32,
        session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        let extra_data = X11Open {
            originator_address: originator_address.to_string(),
            originator_port,
        }
        .to_bytes();
        let handle = session.handle();
        Ok(self
            .open_channel(ChannelType::X11, extra_data, channel, handle)
            .await)
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        let extra_data = ForwardedTcpIp {
            connected_address: connected_address.to_string(),
            connected_port,
            originator_address: originator_address.to_string(),
            originator_port,
        }
        .to_bytes();
        let handle = session.handle();
        Ok(self
            .open_channel(ChannelType::ForwardedTcpIp, extra_data, channel, handle)
            .await)
    }

    async fn channel_open_direct_streamlocal(
        &mut self,
        channel: Channel<Msg>,
        socket_path: &str,
        session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        let extra_data = DirectStreamLocal::new(socket_path).to_bytes();
        let handle = session.handle();
        Ok(self
            .open_channel(ChannelType::DirectStreamLocal, extra_data, channel, handle)
            .await)
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        self.routes.close_stdin(channel);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        self.routes.remove(channel);
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        if let Some(stdin) = self.routes.stdin(channel) {
            let _ = stdin.send(Bytes::copy_from_slice(data));
        }
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        let payload = EnvRequest {
            name: variable_name.to_string(),
            value: variable_value.to_string(),
        }
        .to_bytes();
        self.channel_request(channel, RequestType::Env, payload, true, session);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        let modes: Vec<(u8, u32)> = modes
            .iter()
            .map(|(mode, value)| (*mode as u8, *value))
            .collect();
        let payload = PtyRequest {
            term: term.to_string(),
            columns: col_width,
            rows: row_height,
            width: pix_width,
            height: pix_height,
            mode_list: PtyRequest::encode_modes(&modes),
        }
        .to_bytes();
        self.channel_request(channel, RequestType::Pty, payload, true, session);
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        single_connection: bool,
        x11_auth_protocol: &str,
        x11_auth_cookie: &str,
        x11_screen_number: u32,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        let payload = X11Request {
            single_connection,
            auth_protocol: x11_auth_protocol.to_string(),
            auth_cookie: x11_auth_cookie.to_string(),
            screen_number: x11_screen_number,
        }
        .to_bytes();
        self.channel_request(channel, RequestType::X11, payload, true, session);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        self.channel_request(channel, RequestType::Shell, Bytes::new(), true, session);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        let payload = ExecRequest::encode_raw(data);
        self.channel_request(channel, RequestType::Exec, payload, true, session);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        let payload = SubsystemRequest {
            subsystem: name.to_string(),
        }
        .to_bytes();
        self.channel_request(channel, RequestType::Subsystem, payload, true, session);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        let payload = WindowChange {
            columns: col_width,
            rows: row_height,
            width: pix_width,
            height: pix_height,
        }
        .to_bytes();
        // Sent without want-reply (RFC 4254 section 6.7).
        self.channel_request(channel, RequestType::WindowChange, payload, false, session);
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        // `signal` never wants a reply.
        let payload = SignalRequest {
            signal: signal_name(&signal),
        }
        .to_bytes();
        self.channel_request(channel, RequestType::Signal, payload, false, session);
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        let payload = TcpipForward {
            address: address.to_string(),
            port: *port,
        }
        .to_bytes();
        Ok(self
            .global_request(GlobalRequestType::TcpipForward, payload)
            .await)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        let payload = TcpipForward {
            address: address.to_string(),
            port,
        }
        .to_bytes();
        Ok(self
            .global_request(GlobalRequestType::CancelTcpipForward, payload)
            .await)
    }

    async fn streamlocal_forward(
        &mut self,
        socket_path: &str,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        let payload = StreamLocalForward {
            socket_path: socket_path.to_string(),
        }
        .to_bytes();
        Ok(self
            .global_request(GlobalRequestType::StreamLocalForward, payload)
            .await)
    }

    async fn cancel_streamlocal_forward(
        &mut self,
        socket_path: &str,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        let payload = StreamLocalForward {
            socket_path: socket_path.to_string(),
        }
        .to_bytes();
        Ok(self
            .global_request(GlobalRequestType::CancelStreamLocalForward, payload)
            .await)
    }
}
