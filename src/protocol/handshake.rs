//! SOCKS5 Handshake State Machine
//!
//! One machine drives both sides of the negotiation. [`Session`] owns the
//! phase transitions and validates every message without touching I/O;
//! [`Handshake`] moves the messages over a byte stream in the order the
//! session's role dictates.
//!
//! ```text
//! Start -> Greeted -> MethodSelected -> Requested -> Replied -> Relaying
//!   \_________\____________\_______________\___________\______> Failed
//! ```

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{Result, Socks5Error};
use crate::protocol::codec;
use crate::protocol::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client side: sends the greeting and the request.
    Initiator,
    /// Proxy side: answers with the method selection and the reply.
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Greeted,
    MethodSelected,
    Requested,
    Replied,
    Relaying,
    Failed,
}

impl Phase {
    /// Next phase on the success path.
    pub fn successor(self) -> Option<Phase> {
        match self {
            Phase::Start => Some(Phase::Greeted),
            Phase::Greeted => Some(Phase::MethodSelected),
            Phase::MethodSelected => Some(Phase::Requested),
            Phase::Requested => Some(Phase::Replied),
            Phase::Replied => Some(Phase::Relaying),
            Phase::Relaying | Phase::Failed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Message that must move, and in which direction, to leave `phase`.
pub fn expected_message(role: Role, phase: Phase) -> Option<(Direction, MessageKind)> {
    let kind = match phase {
        Phase::Start => MessageKind::Greeting,
        Phase::Greeted => MessageKind::Selection,
        Phase::MethodSelected => MessageKind::Request,
        Phase::Requested => MessageKind::Reply,
        Phase::Replied | Phase::Relaying | Phase::Failed => return None,
    };
    let initiator_sends = matches!(kind, MessageKind::Greeting | MessageKind::Request);
    let direction = match (role, initiator_sends) {
        (Role::Initiator, true) | (Role::Responder, false) => Direction::Outbound,
        _ => Direction::Inbound,
    };
    Some((direction, kind))
}

/// Result of a completed negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Established {
    pub method: AuthMethod,
    pub requested: Endpoint,
    pub bound: Endpoint,
}

/// State of one in-progress negotiation. Discarded once it reaches a terminal phase.
#[derive(Debug, Clone)]
pub struct Session {
    role: Role,
    phase: Phase,
    negotiated_method: Option<AuthMethod>,
    requested_endpoint: Option<Endpoint>,
    bound_endpoint: Option<Endpoint>,
}

impl Session {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            phase: Phase::Start,
            negotiated_method: None,
            requested_endpoint: None,
            bound_endpoint: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn negotiated_method(&self) -> Option<AuthMethod> {
        self.negotiated_method
    }

    pub fn requested_endpoint(&self) -> Option<Endpoint> {
        self.requested_endpoint
    }

    pub fn expected(&self) -> Option<(Direction, MessageKind)> {
        expected_message(self.role, self.phase)
    }

    /// Validate a message received from the peer and advance.
    pub fn receive(&mut self, message: &Message) -> Result<()> {
        self.check_expected(Direction::Inbound, message.kind())?;

        let outcome = match (self.role, message) {
            (Role::Responder, Message::Greeting(greeting)) => {
                if greeting.methods.iter().any(AuthMethod::is_supported) {
                    Ok(())
                } else {
                    Err(Socks5Error::AuthenticationRejected)
                }
            }
            (Role::Initiator, Message::Selection(selection)) => {
                if selection.method.is_supported() {
                    self.negotiated_method = Some(selection.method);
                    Ok(())
                } else {
                    Err(Socks5Error::AuthenticationRejected)
                }
            }
            (Role::Responder, Message::Request(request)) => {
                self.requested_endpoint = Some(request.endpoint);
                Ok(())
            }
            (Role::Initiator, Message::Reply(reply)) => {
                if reply.reply == ReplyCode::Succeeded {
                    self.bound_endpoint = Some(reply.endpoint);
                    Ok(())
                } else {
                    Err(Socks5Error::ConnectRejected(reply.reply))
                }
            }
            (_, other) => Err(Socks5Error::malformed(format!(
                "unexpected inbound {}",
                other.kind()
            ))),
        };
        self.settle(outcome)
    }

    /// Record a message this side is about to send and advance.
    ///
    /// Only success-path messages go through here; rejection replies are
    /// written after the session has already failed.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        self.check_expected(Direction::Outbound, message.kind())?;

        let outcome = match (self.role, message) {
            (Role::Initiator, Message::Greeting(_)) => Ok(()),
            (Role::Responder, Message::Selection(selection)) => {
                if selection.method.is_supported() {
                    self.negotiated_method = Some(selection.method);
                    Ok(())
                } else {
                    Err(Socks5Error::AuthenticationRejected)
                }
            }
            (Role::Initiator, Message::Request(request)) => {
                self.requested_endpoint = Some(request.endpoint);
                Ok(())
            }
            (Role::Responder, Message::Reply(reply)) => {
                if reply.reply == ReplyCode::Succeeded {
                    self.bound_endpoint = Some(reply.endpoint);
                    Ok(())
                } else {
                    Err(Socks5Error::ConnectRejected(reply.reply))
                }
            }
            (_, other) => Err(Socks5Error::malformed(format!(
                "unexpected outbound {}",
                other.kind()
            ))),
        };
        self.settle(outcome)
    }

    /// Replied -> Relaying.
    pub fn start_relaying(&mut self) -> Result<()> {
        if self.phase != Phase::Replied {
            let phase = self.phase;
            self.fail();
            return Err(Socks5Error::malformed(format!(
                "cannot start relaying from {:?}",
                phase
            )));
        }
        self.phase = Phase::Relaying;
        Ok(())
    }

    pub fn fail(&mut self) {
        self.phase = Phase::Failed;
    }

    /// Available once the session is relaying.
    pub fn established(&self) -> Option<Established> {
        if self.phase != Phase::Relaying {
            return None;
        }
        Some(Established {
            method: self.negotiated_method?,
            requested: self.requested_endpoint?,
            bound: self.bound_endpoint?,
        })
    }

    fn check_expected(&mut self, direction: Direction, kind: MessageKind) -> Result<()> {
        match self.expected() {
            Some(expected) if expected == (direction, kind) => Ok(()),
            Some((_, expected_kind)) => {
                self.fail();
                Err(Socks5Error::malformed(format!(
                    "expected {}, got {}",
                    expected_kind, kind
                )))
            }
            None => {
                let phase = self.phase;
                self.fail();
                Err(Socks5Error::malformed(format!(
                    "no {} expected in phase {:?}",
                    kind, phase
                )))
            }
        }
    }

    fn settle(&mut self, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                if let Some(next) = self.phase.successor() {
                    self.phase = next;
                }
                Ok(())
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }
}

/// Runs a [`Session`] over a byte stream.
pub struct Handshake<S> {
    stream: S,
    session: Session,
}

impl<S> Handshake<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn initiator(stream: S) -> Self {
        Self {
            stream,
            session: Session::new(Role::Initiator),
        }
    }

    pub fn responder(stream: S) -> Self {
        Self {
            stream,
            session: Session::new(Role::Responder),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Negotiate a CONNECT to `target` as the client.
    ///
    /// On failure the stream is dropped, closing the connection.
    pub async fn connect(mut self, target: Endpoint) -> Result<(S, Established)> {
        match self.run_initiator(target).await {
            Ok(established) => Ok((self.stream, established)),
            Err(e) => {
                self.session.fail();
                Err(e)
            }
        }
    }

    /// Answer a client's negotiation as the proxy.
    ///
    /// `dial` opens the outbound connection and reports its local address,
    /// which becomes BND.ADDR/BND.PORT. Failures are answered with the
    /// matching selection or reply before the stream is shut down.
    pub async fn accept<F, Fut, T>(mut self, dial: F) -> Result<(S, T, Established)>
    where
        F: FnOnce(Endpoint) -> Fut,
        Fut: Future<Output = io::Result<(T, SocketAddr)>>,
    {
        match self.run_responder(dial).await {
            Ok((upstream, established)) => Ok((self.stream, upstream, established)),
            Err(e) => {
                self.session.fail();
                self.reject(&e).await;
                Err(e)
            }
        }
    }

    async fn run_initiator(&mut self, target: Endpoint) -> Result<Established> {
        self.send(Message::greeting(SUPPORTED_METHODS)).await?;
        debug!("Sent greeting offering {:?}", SUPPORTED_METHODS);

        self.receive(MessageKind::Selection).await?;
        debug!("Proxy selected {:?}", self.session.negotiated_method());

        self.send(Message::connect(target)).await?;
        debug!("Sent CONNECT request for {}", target);

        self.receive(MessageKind::Reply).await?;
        self.session.start_relaying()?;
        self.finish()
    }

    async fn run_responder<F, Fut, T>(&mut self, dial: F) -> Result<(T, Established)>
    where
        F: FnOnce(Endpoint) -> Fut,
        Fut: Future<Output = io::Result<(T, SocketAddr)>>,
    {
        self.receive(MessageKind::Greeting).await?;
        self.send(Message::selection(AuthMethod::NoAuth)).await?;
        debug!("Selected no-authentication method");

        self.receive(MessageKind::Request).await?;
        let target = self
            .session
            .requested_endpoint()
            .ok_or_else(|| Socks5Error::malformed("request carried no endpoint"))?;
        info!("CONNECT requested to {}", target);

        let (upstream, local_addr) = dial(target)
            .await
            .map_err(Socks5Error::UpstreamConnectFailure)?;
        let bound = Endpoint::from_socket_addr(&local_addr);

        self.send(Message::reply(ReplyCode::Succeeded, bound)).await?;
        self.session.start_relaying()?;
        debug!("Replied success, bound to {}", bound);

        Ok((upstream, self.finish()?))
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        self.session.send(&message)?;
        let bytes = codec::encode(&message)?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self, kind: MessageKind) -> Result<Message> {
        let frame = self.read_frame(kind).await?;
        let message = codec::decode(kind, &frame)?;
        self.session.receive(&message)?;
        Ok(message)
    }

    /// Read exactly one message: its header, then the length the header implies.
    async fn read_frame(&mut self, kind: MessageKind) -> Result<Vec<u8>> {
        let header_len = codec::header_len(kind);
        let mut frame = vec![0u8; header_len];
        self.stream.read_exact(&mut frame).await?;

        let total = codec::frame_len(kind, &frame)?;
        if total > header_len {
            frame.resize(total, 0);
            self.stream.read_exact(&mut frame[header_len..]).await?;
        }
        Ok(frame)
    }

    fn finish(&self) -> Result<Established> {
        self.session
            .established()
            .ok_or_else(|| Socks5Error::malformed("handshake ended before relaying"))
    }

    /// Best-effort rejection before the connection is closed.
    async fn reject(&mut self, error: &Socks5Error) {
        let response = match error {
            Socks5Error::AuthenticationRejected => {
                Some(codec::encode_method_selection(AuthMethod::NoAcceptable))
            }
            other => other
                .reply_code()
                .map(|code| codec::encode_reply(code, &Endpoint::unspecified())),
        };

        if let Some(bytes) = response {
            if let Err(e) = self.stream.write_all(&bytes).await {
                warn!("Failed to send rejection: {}", e);
            }
        }
        let _ = self.stream.shutdown().await;
    }
}
