// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! The event and packet model, per §3 and Design Note §9.
//!
//! Design Note §9 calls for replacing "deferred actions held as callables"
//! with a tagged union the dispatcher switches on, rather than closures
//! capturing mutable source references. [`Action`] is that union.

use crate::error::CloseCause;
use crate::id::SourceName;

/// One of the four protocol-visible happenings a source can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EventKind {
    Accept,
    ClientRecv,
    ServerRecv,
    Close,
}

impl EventKind {
    /// Parse the §6 command-surface token for an event kind.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "accept" => Some(EventKind::Accept),
            "client_recv" => Some(EventKind::ClientRecv),
            "server_recv" => Some(EventKind::ServerRecv),
            "close" => Some(EventKind::Close),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            EventKind::Accept => "accept",
            EventKind::ClientRecv => "client_recv",
            EventKind::ServerRecv => "server_recv",
            EventKind::Close => "close",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Which peer a forwarded packet is travelling towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    /// Bytes read from the client, to be written to the server.
    ToServer,
    /// Bytes read from the server, to be written to the client.
    ToClient,
}

/// An immutable-to-consumers byte buffer produced by a recv event.
///
/// "Immutable" describes the contract with ordinary consumers; while the
/// dispatcher is paused on the [`Event`] that carries a `Packet`, the
/// front-end may replace `bytes` through [`crate::dispatcher::Dispatcher::stashed_packet_mut`]
/// (§6, scenario 3) — the replacement is observed because the deferred
/// [`Action::Forward`] re-reads the packet when it finally runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub bytes: Vec<u8>,
    pub session: SourceName,
}

impl Packet {
    pub fn new(session: SourceName, bytes: Vec<u8>) -> Self {
        Self { bytes, session }
    }
}

/// The deferred side effect bound to an [`Event`].
///
/// Every enqueued event carries exactly one `Action`; actions run at most
/// once, either immediately (no breakpoint matched) or after the operator
/// resumes a break (§4.5, "Resume semantics").
#[derive(Debug, Clone)]
pub enum Action {
    /// Construct and publish a new session for a listener that just
    /// accepted a connection. Deferred so a breakpoint on `Accept` can
    /// suspend before the session exists from the operator's perspective.
    AcceptPublish { listener: SourceName },

    /// Send `packet`'s current bytes to the session's peer in `direction`.
    Forward {
        session: SourceName,
        direction: Direction,
        packet: Packet,
    },

    /// Tear the session down: close both sockets, deregister, mark Closed.
    CloseSession {
        session: SourceName,
        cause: CloseCause,
    },
}

/// Opaque, front-end-supplied context attached to an event.
///
/// Used for two things only: carrying a [`CloseCause`] when a `Close` event
/// was triggered by an I/O error (§4.3, "Failure semantics"), and carrying
/// a condition-evaluator diagnostic when a breakpoint's condition raised
/// (§4.4, fail-safe firing).
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub close_cause: Option<CloseCause>,
    pub condition_error: Option<String>,
}

/// A debugger event: something that happened on a source, carrying the
/// action that will realise it.
#[derive(Debug, Clone)]
pub struct Event {
    pub source: SourceName,
    pub kind: EventKind,
    pub payload: Option<Packet>,
    pub context: EventContext,
    pub action: Action,
}

impl Event {
    pub fn new(source: SourceName, kind: EventKind, action: Action) -> Self {
        Self { source, kind, payload: None, context: EventContext::default(), action }
    }

    pub fn with_payload(mut self, payload: Packet) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = context;
        self
    }
}
