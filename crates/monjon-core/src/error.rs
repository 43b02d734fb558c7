// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! Error kinds, per §7 of the specification.
//!
//! The dispatcher never propagates errors out of `run()`/`step()` except
//! [`Interrupted`](DispatchError::Interrupted), which is a normal return, not
//! a failure. Everything else is converted to a `Close` action on the
//! affected source plus a log line — see [`classify_io_error`].

use std::io;

use crate::id::SourceName;

/// A listener was constructed with an invalid combination of parameters.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("listener requires at least one of remote host or remote port")]
    MissingTarget,

    #[error("unknown protocol '{0}': expecting 'tcp' or 'udp'")]
    UnknownProtocol(String),

    #[error("unknown event kind '{0}': expecting accept, client_recv, server_recv or close")]
    UnknownEventKind(String),
}

/// The OS refused to bind or listen on a socket.
#[derive(Debug, thiserror::Error)]
#[error("failed to bind listener: {source}")]
pub struct BindError {
    #[source]
    pub source: io::Error,
}

/// The OS refused to dial the session's target.
#[derive(Debug, thiserror::Error)]
#[error("failed to connect to target: {source}")]
pub struct ConnectError {
    #[source]
    pub source: io::Error,
}

/// Failure of the socket multiplexer itself (not of an individual socket).
#[derive(Debug, thiserror::Error)]
pub enum MultiplexError {
    #[error("interrupted")]
    Interrupted,

    #[error("multiplexer I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A breakpoint condition failed to evaluate.
///
/// Per §4.4 this is fail-safe, not fail-closed: the breakpoint still fires,
/// carrying this diagnostic as event context.
#[derive(Debug, Clone, thiserror::Error)]
#[error("condition evaluation failed: {0}")]
pub struct ConditionError(pub String);

/// Everything that can go wrong constructing a [`crate::tcp::TcpListener`].
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Bind(#[from] BindError),
}

/// Top-level dispatcher error surface.
///
/// The dispatcher's own methods return this for caller mistakes (operating
/// on an unknown source/breakpoint); it is distinct from the per-socket
/// errors below, which never leave `step()`/`run()`.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no such source: {0}")]
    UnknownSource(SourceName),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("failed to register source with multiplexer: {0}")]
    Multiplex(#[from] io::Error),
}

/// Why a session's I/O produced a [`crate::event::EventKind::Close`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CloseCause {
    /// A zero-length read: the peer shut its side down cleanly. Not an
    /// error, per §7 ("PeerClosed").
    PeerClosed,
    /// A send or receive failed with an OS error.
    Io(String),
    /// The operator or front-end asked for the session to be torn down.
    Requested,
}

impl std::fmt::Display for CloseCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseCause::PeerClosed => write!(f, "peer closed"),
            CloseCause::Io(msg) => write!(f, "I/O error: {msg}"),
            CloseCause::Requested => write!(f, "requested"),
        }
    }
}

/// Classifies a socket I/O error the way §7 requires: `Interrupted` is
/// retried by the caller, `WouldBlock` means "no more data this readiness
/// notification", and everything else becomes a [`CloseCause::Io`].
pub fn classify_io_error(err: &io::Error) -> IoOutcome {
    match err.kind() {
        io::ErrorKind::Interrupted => IoOutcome::Retry,
        io::ErrorKind::WouldBlock => IoOutcome::WouldBlock,
        _ => IoOutcome::Close(CloseCause::Io(err.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoOutcome {
    Retry,
    WouldBlock,
    Close(CloseCause),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[yare::parameterized(
        interrupted = { io::ErrorKind::Interrupted, IoOutcome::Retry },
        would_block = { io::ErrorKind::WouldBlock, IoOutcome::WouldBlock },
        connection_reset = { io::ErrorKind::ConnectionReset, IoOutcome::Close(CloseCause::Io(String::new())) },
        broken_pipe = { io::ErrorKind::BrokenPipe, IoOutcome::Close(CloseCause::Io(String::new())) },
    )]
    fn classifies_by_kind(kind: io::ErrorKind, expected: IoOutcome) {
        let outcome = classify_io_error(&io::Error::from(kind));
        match (outcome, expected) {
            (IoOutcome::Retry, IoOutcome::Retry) => {}
            (IoOutcome::WouldBlock, IoOutcome::WouldBlock) => {}
            (IoOutcome::Close(_), IoOutcome::Close(_)) => {}
            (got, want) => panic!("expected {want:?}, got {got:?}"),
        }
    }
}
