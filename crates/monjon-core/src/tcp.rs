// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! TCP event sources, per §4.2 and §4.3.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::ToSocketAddrs;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::error::{
    classify_io_error, BindError, ConfigurationError, ConnectError, IoOutcome, ListenerError,
};
use crate::event::{Action, Direction, Event, EventKind, Packet};
use crate::id::SourceName;
use crate::source::{SessionState, Side, SocketRef};

/// Default read chunk size for recv handlers (§6, "Default read chunk 8192 bytes").
const RECV_CHUNK: usize = 8192;

/// Listen backlog (§4.2, "modest backlog (5 is sufficient)").
const BACKLOG: i32 = 5;

/// How long a session's synchronous dial to its target may block before
/// giving up. Not specified by §4.3, which only requires the dial to be
/// synchronous; bounding it keeps a single bad target from wedging the
/// whole dispatcher, since there is nothing else running on this thread
/// while the dial is in flight.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How many closed sessions a listener retains for `sessions()` before
/// discarding the oldest. §4.3 boundary scenario 4 requires that a closed
/// session stay visible in the listener's history; Design Note §9(a) asks
/// for an explicit policy rather than the unbounded retention the Python
/// original defaulted to.
const MAX_RETAINED_SESSIONS: usize = 256;

/// A retained record of a session the listener has spawned, kept for
/// enumeration only — per Design Note §9, the listener holds no live
/// reference to the session, just its name, a description, and the last
/// known state, refreshed by the dispatcher as the session's lifecycle
/// advances.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub name: SourceName,
    pub description: String,
    pub state: SessionState,
}

/// One bound, listening TCP socket plus the target it forwards accepted
/// connections to.
pub struct TcpListener {
    pub name: SourceName,
    listener: mio::net::TcpListener,
    local_port: u16,
    remote_host: String,
    remote_port: u16,
    pending_accepts: VecDeque<mio::net::TcpStream>,
    sessions: VecDeque<SessionRecord>,
}

impl TcpListener {
    /// Bind and start listening. `local_port == 0` lets the OS choose a
    /// port, captured afterwards. `remote_port == 0` mirrors the *final*
    /// local port (after OS assignment), per §4.2.
    pub fn bind(
        name: SourceName,
        local_port: u16,
        remote_host: Option<String>,
        remote_port: u16,
    ) -> Result<Self, ListenerError> {
        if remote_host.is_none() && remote_port == 0 {
            return Err(ConfigurationError::MissingTarget.into());
        }

        let socket = open_listening_socket(local_port)
            .map_err(|source| ListenerError::from(BindError { source }))?;

        let local_addr = socket
            .local_addr()
            .map_err(|source| ListenerError::from(BindError { source }))?;
        let actual_local_port = local_addr.port();
        let effective_remote_port = if remote_port == 0 { actual_local_port } else { remote_port };

        let listener = mio::net::TcpListener::from_std(socket);

        debug!(name = %name, port = actual_local_port, "listener bound");

        Ok(Self {
            name,
            listener,
            local_port: actual_local_port,
            remote_host: remote_host.unwrap_or_else(|| "127.0.0.1".to_string()),
            remote_port: effective_remote_port,
            pending_accepts: VecDeque::new(),
            sessions: VecDeque::new(),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn target(&self) -> (&str, u16) {
        (&self.remote_host, self.remote_port)
    }

    pub fn describe(&self) -> String {
        format!("<TCP Listener: {} -> {}:{}>", self.local_port, self.remote_host, self.remote_port)
    }

    pub fn sockets(&self) -> Vec<SocketRef> {
        vec![SocketRef { fd: self.listener.as_raw_fd(), side: Side::Listening }]
    }

    /// Accept exactly one connection and enqueue the deferred publish
    /// action. The accept itself runs synchronously with the readability
    /// notification (§4.2 rationale: otherwise the listening socket stays
    /// spuriously readable); only *publishing* the session is deferred.
    pub fn on_readable(&mut self, out: &mut Vec<Event>) {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                debug!(name = %self.name, %peer, "accepted connection");
                self.pending_accepts.push_back(stream);
                out.push(Event::new(
                    self.name,
                    EventKind::Accept,
                    Action::AcceptPublish { listener: self.name },
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => warn!(name = %self.name, error = %e, "accept failed"),
        }
    }

    pub fn take_pending_accept(&mut self) -> Option<mio::net::TcpStream> {
        self.pending_accepts.pop_front()
    }

    pub fn sessions(&self) -> &VecDeque<SessionRecord> {
        &self.sessions
    }

    pub fn record_session(&mut self, name: SourceName, description: String) {
        self.sessions.push_back(SessionRecord { name, description, state: SessionState::Open });
        while self.sessions.len() > MAX_RETAINED_SESSIONS {
            self.sessions.pop_front();
        }
    }

    pub fn mark_session_closed(&mut self, name: SourceName) {
        if let Some(record) = self.sessions.iter_mut().find(|r| r.name == name) {
            record.state = SessionState::Closed;
        }
    }
}

fn open_listening_socket(local_port: u16) -> std::io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    let addr: std::net::SocketAddr = (std::net::Ipv4Addr::UNSPECIFIED, local_port).into();
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Two connected sockets — client side (already connected, from accept) and
/// server side (dialled during construction) — relaying bytes between them.
pub struct TcpSession {
    pub name: SourceName,
    pub state: SessionState,
    client: Option<mio::net::TcpStream>,
    server: Option<mio::net::TcpStream>,
    client_fd: i32,
    server_fd: i32,
    /// Bytes still waiting to reach the server after a partial write,
    /// drained on the next writable notification for `server_fd`.
    pending_to_server: VecDeque<u8>,
    /// Same, for bytes waiting to reach the client.
    pending_to_client: VecDeque<u8>,
}

impl TcpSession {
    /// Dial `host:port` synchronously and pair it with the already-accepted
    /// `client` socket. §4.3: "future revision: make this deferred and
    /// cancellable" — not attempted here, the dial blocks this thread.
    pub fn connect(
        name: SourceName,
        client: mio::net::TcpStream,
        host: &str,
        port: u16,
    ) -> Result<Self, ConnectError> {
        let client_fd = client.as_raw_fd();

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|source| ConnectError { source })?
            .next()
            .ok_or_else(|| ConnectError {
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address found for {host}:{port}"),
                ),
            })?;

        let std_server = std::net::TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|source| ConnectError { source })?;
        std_server.set_nonblocking(true).map_err(|source| ConnectError { source })?;
        let server = mio::net::TcpStream::from_std(std_server);
        let server_fd = server.as_raw_fd();

        debug!(name = %name, %host, port, "session connected to target");

        Ok(Self {
            name,
            state: SessionState::Open,
            client: Some(client),
            server: Some(server),
            client_fd,
            server_fd,
            pending_to_server: VecDeque::new(),
            pending_to_client: VecDeque::new(),
        })
    }

    pub fn describe(&self) -> String {
        format!("<TCP Session: {}>", self.name)
    }

    pub fn sockets(&self) -> Vec<SocketRef> {
        let mut v = Vec::with_capacity(2);
        if self.client.is_some() {
            v.push(SocketRef { fd: self.client_fd, side: Side::Client });
        }
        if self.server.is_some() {
            v.push(SocketRef { fd: self.server_fd, side: Side::Server });
        }
        v
    }

    /// Read up to [`RECV_CHUNK`] bytes from whichever side signalled
    /// readable and produce the matching event, per §4.3.
    pub fn on_readable(&mut self, fd: i32, out: &mut Vec<Event>) {
        if self.state == SessionState::Closed {
            return;
        }

        let (side, direction, kind) = if fd == self.client_fd {
            (Side::Client, Direction::ToServer, EventKind::ServerRecv)
        } else if fd == self.server_fd {
            (Side::Server, Direction::ToClient, EventKind::ClientRecv)
        } else {
            return;
        };

        let mut buf = [0u8; RECV_CHUNK];
        loop {
            let stream = match side {
                Side::Client => self.client.as_mut(),
                Side::Server => self.server.as_mut(),
                Side::Listening => None,
            };
            let Some(stream) = stream else { return };

            match stream.read(&mut buf) {
                Ok(0) => {
                    out.push(Event::new(
                        self.name,
                        EventKind::Close,
                        Action::CloseSession {
                            session: self.name,
                            cause: crate::error::CloseCause::PeerClosed,
                        },
                    ));
                    return;
                }
                Ok(n) => {
                    let packet = Packet::new(self.name, buf[..n].to_vec());
                    out.push(
                        Event::new(
                            self.name,
                            kind,
                            Action::Forward { session: self.name, direction, packet: packet.clone() },
                        )
                        .with_payload(packet),
                    );
                    return;
                }
                Err(e) => match classify_io_error(&e) {
                    IoOutcome::Retry => continue,
                    IoOutcome::WouldBlock => return,
                    IoOutcome::Close(cause) => {
                        out.push(Event::new(
                            self.name,
                            EventKind::Close,
                            Action::CloseSession { session: self.name, cause },
                        ));
                        return;
                    }
                },
            }
        }
    }

    /// Queue `packet`'s current bytes for `direction` and write as much as
    /// the socket currently accepts. Re-reads the packet at call time, so a
    /// front-end mutation made while the dispatcher was paused on this
    /// event is observed (§6). A partial write leaves the unsent tail
    /// queued, not dropped — §6's transparent relay requires every byte to
    /// arrive, in order; [`TcpSession::on_writable`] drains the rest once
    /// the socket signals writable again.
    pub fn forward(&mut self, direction: Direction, packet: &Packet) -> std::io::Result<()> {
        self.pending_mut(direction).extend(packet.bytes.iter().copied());
        self.drain(direction)
    }

    /// Resume writing a direction's queued tail once its socket signals
    /// writable. No-op if nothing is queued or the session has closed.
    pub fn on_writable(&mut self, fd: i32, out: &mut Vec<Event>) {
        if self.state == SessionState::Closed {
            return;
        }

        let direction = if fd == self.server_fd {
            Direction::ToServer
        } else if fd == self.client_fd {
            Direction::ToClient
        } else {
            return;
        };

        if let Err(e) = self.drain(direction) {
            out.push(Event::new(
                self.name,
                EventKind::Close,
                Action::CloseSession { session: self.name, cause: crate::error::CloseCause::Io(e.to_string()) },
            ));
        }
    }

    fn pending_mut(&mut self, direction: Direction) -> &mut VecDeque<u8> {
        match direction {
            Direction::ToServer => &mut self.pending_to_server,
            Direction::ToClient => &mut self.pending_to_client,
        }
    }

    /// Write as much of `direction`'s queued bytes as the socket accepts
    /// right now, leaving any remainder queued for the next writable
    /// notification.
    fn drain(&mut self, direction: Direction) -> std::io::Result<()> {
        let (stream, pending) = match direction {
            Direction::ToServer => (self.server.as_mut(), &mut self.pending_to_server),
            Direction::ToClient => (self.client.as_mut(), &mut self.pending_to_client),
        };
        let Some(stream) = stream else { return Ok(()) };

        while !pending.is_empty() {
            let (front, _) = pending.as_slices();
            match stream.write(front) {
                Ok(0) => break,
                Ok(n) => {
                    pending.drain(..n);
                }
                Err(e) => match classify_io_error(&e) {
                    IoOutcome::Retry => continue,
                    IoOutcome::WouldBlock => break,
                    IoOutcome::Close(_) => return Err(e),
                },
            }
        }
        Ok(())
    }

    /// Tear the session down. Idempotent: a second call is a no-op.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        self.client = None;
        self.server = None;
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NameGen;

    #[test]
    fn listener_with_port_zero_captures_assigned_port() {
        let mut gen = NameGen::new();
        let listener = TcpListener::bind(gen.next(), 0, Some("127.0.0.1".into()), 7).unwrap();
        assert_ne!(listener.local_port(), 0);
    }

    #[test]
    fn remote_port_zero_mirrors_local_port() {
        let mut gen = NameGen::new();
        let listener = TcpListener::bind(gen.next(), 0, Some("127.0.0.1".into()), 0).unwrap();
        assert_eq!(listener.target().1, listener.local_port());
    }

    #[test]
    fn missing_target_is_rejected() {
        let mut gen = NameGen::new();
        let result = TcpListener::bind(gen.next(), 0, None, 0);
        assert!(matches!(
            result,
            Err(crate::error::ListenerError::Configuration(ConfigurationError::MissingTarget))
        ));
    }

    #[test]
    fn describe_format() {
        let mut gen = NameGen::new();
        let listener = TcpListener::bind(gen.next(), 0, Some("10.0.0.1".into()), 9000).unwrap();
        let desc = listener.describe();
        assert!(desc.starts_with("<TCP Listener: "));
        assert!(desc.contains("10.0.0.1:9000"));
    }
}
