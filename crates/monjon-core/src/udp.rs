// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! UDP listener — structural stub.
//!
//! §4.3/§6 and Design Note §9(c): UDP proxying is specified structurally
//! (a single inbound socket, datagrams demultiplexed by (peer ip, peer
//! port) to per-flow outbound sockets) but the demultiplexing engine itself
//! is an explicit future extension (§1, "Out of scope"). This type exists
//! so `listen(..., protocol="udp")` has somewhere real to route to and so
//! the session-lookup table's shape is fixed now, rather than faking a
//! working implementation.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::event::Event;
use crate::id::SourceName;
use crate::source::SocketRef;

/// Error returned by every `UdpListener` operation until the datagram
/// engine is implemented.
#[derive(Debug, Clone, thiserror::Error)]
#[error("UDP proxying is not yet implemented")]
pub struct UdpNotImplemented;

pub struct UdpListener {
    pub name: SourceName,
    local_port: u16,
    remote_host: String,
    remote_port: u16,
    /// Keyed by (peer ip, peer port), per §6; always empty until the
    /// demultiplexing engine lands.
    _flows: HashMap<SocketAddr, SourceName>,
}

impl UdpListener {
    pub fn stub(name: SourceName, local_port: u16, remote_host: String, remote_port: u16) -> Self {
        Self { name, local_port, remote_host, remote_port, _flows: HashMap::new() }
    }

    pub fn describe(&self) -> String {
        format!("<UDP Listener: {} -> {}:{}>", self.local_port, self.remote_host, self.remote_port)
    }

    pub fn sockets(&self) -> Vec<SocketRef> {
        Vec::new()
    }

    /// No socket is ever registered for a stub listener, so the
    /// multiplexer never calls this; kept only to satisfy the `Source`
    /// enum's dispatch surface. Returns the typed "not yet" rather than
    /// `()` so the signature itself documents that a real call here would
    /// fail, not silently do nothing.
    pub fn on_readable(&mut self, _out: &mut Vec<Event>) -> Result<(), UdpNotImplemented> {
        Err(UdpNotImplemented)
    }
}
