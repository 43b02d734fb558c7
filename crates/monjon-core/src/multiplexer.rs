// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! The socket multiplexer, per §4.1.
//!
//! The contract is narrow on purpose: wait on two interest sets for a
//! bounded time and report which fds became ready. The choice of readiness
//! primitive must not leak past this trait — [`MioMultiplexer`] is one
//! implementation, modelled on `message-io`'s `TcpEventProcessor`, which
//! pairs a single `mio::Poll` with a `Registry` shared by every registered
//! resource and an `Events` buffer reused across polls.

use std::collections::HashSet;
use std::time::Duration;

use mio::{Events, Interest, Poll, Token};

use crate::error::MultiplexError;
use crate::id::SourceName;

/// A set of fds found to be readable and/or writable by one [`Multiplexer::poll`] call.
///
/// Entries are per-fd, not per-source: a session owns two sockets, and its
/// readability handler needs to know *which* one became ready to pick a
/// direction (§4.3). The dispatcher still indexes back to a `SourceName` to
/// find the owning [`crate::source::Source`].
#[derive(Debug, Default, Clone)]
pub struct PollOutcome {
    pub readable: Vec<(SourceName, i32)>,
    pub writable: Vec<(SourceName, i32)>,
}

impl PollOutcome {
    pub fn is_empty(&self) -> bool {
        self.readable.is_empty() && self.writable.is_empty()
    }
}

/// Waits on a set of registered sockets for readability/writability.
///
/// Registration is keyed by [`SourceName`] rather than raw fd: a source may
/// own more than one socket (a session owns two), so the multiplexer tracks
/// per-source tokens internally and folds multi-socket readiness back into
/// one `SourceName` entry per call, which is all the dispatcher needs to
/// look up the owning source.
pub trait Multiplexer {
    /// Register `fd` (owned by `source`) for the given interest.
    fn register(&mut self, source: SourceName, fd: i32, interest: Interest) -> std::io::Result<()>;

    /// Stop watching `fd`. A no-op if it was never registered.
    fn deregister(&mut self, fd: i32);

    /// Block for at most `timeout` (or forever if `None`, or return
    /// immediately if `Some(Duration::ZERO)`) waiting for readiness.
    ///
    /// Returns [`MultiplexError::Interrupted`] if the wait was interrupted
    /// by the operator (§4.1: "interruptible by the operator's interrupt
    /// signal; in that case it reports 'interrupted' without loss").
    fn poll(&mut self, timeout: Option<Duration>) -> Result<PollOutcome, MultiplexError>;
}

/// Default multiplexer, backed by `mio::Poll`.
pub struct MioMultiplexer {
    poll: Poll,
    events: Events,
    fd_to_token: std::collections::HashMap<i32, Token>,
    token_to_fd: std::collections::HashMap<Token, (i32, SourceName)>,
    next_token: usize,
    interrupted: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl MioMultiplexer {
    pub fn new(interrupted: std::sync::Arc<std::sync::atomic::AtomicBool>) -> std::io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
            fd_to_token: std::collections::HashMap::new(),
            token_to_fd: std::collections::HashMap::new(),
            next_token: 0,
            interrupted,
        })
    }
}

impl Multiplexer for MioMultiplexer {
    fn register(&mut self, source: SourceName, fd: i32, interest: Interest) -> std::io::Result<()> {
        let token = Token(self.next_token);
        self.next_token += 1;

        let mut source_fd = mio::unix::SourceFd(&fd);
        self.poll.registry().register(&mut source_fd, token, interest)?;

        self.fd_to_token.insert(fd, token);
        self.token_to_fd.insert(token, (fd, source));
        Ok(())
    }

    fn deregister(&mut self, fd: i32) {
        if let Some(token) = self.fd_to_token.remove(&fd) {
            self.token_to_fd.remove(&token);
            let mut source_fd = mio::unix::SourceFd(&fd);
            let _ = self.poll.registry().deregister(&mut source_fd);
        }
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<PollOutcome, MultiplexError> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                return Err(MultiplexError::Interrupted)
            }
            Err(e) => return Err(MultiplexError::Io(e)),
        }

        if self.interrupted.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(MultiplexError::Interrupted);
        }

        let mut outcome = PollOutcome::default();
        let mut seen_readable = HashSet::new();
        let mut seen_writable = HashSet::new();

        for event in self.events.iter() {
            let Some((fd, source)) = self.token_to_fd.get(&event.token()) else {
                continue;
            };
            if event.is_readable() && seen_readable.insert(*fd) {
                outcome.readable.push((*source, *fd));
            }
            if event.is_writable() && seen_writable.insert(*fd) {
                outcome.writable.push((*source, *fd));
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener as StdTcpListener;
    use std::os::unix::io::AsRawFd;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn reports_readability_for_registered_fd() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        let (mut server_side, _) = listener.accept().unwrap();
        server_side.set_nonblocking(true).unwrap();
        client.write_all(b"hi").unwrap();

        let mut mux = MioMultiplexer::new(Arc::new(AtomicBool::new(false))).unwrap();
        let source = SourceName(0);
        mux.register(source, server_side.as_raw_fd(), Interest::READABLE).unwrap();

        let outcome = mux.poll(Some(Duration::from_secs(5))).unwrap();
        assert!(outcome.readable.iter().any(|(s, _)| *s == source));
    }

    #[test]
    fn empty_registration_with_zero_timeout_returns_immediately() {
        let mut mux = MioMultiplexer::new(Arc::new(AtomicBool::new(false))).unwrap();
        let outcome = mux.poll(Some(Duration::ZERO)).unwrap();
        assert!(outcome.is_empty());
    }

    #[test]
    fn interrupt_flag_is_observed_after_poll_wakes() {
        let interrupted = Arc::new(AtomicBool::new(true));
        let mut mux = MioMultiplexer::new(interrupted).unwrap();
        let result = mux.poll(Some(Duration::from_millis(10)));
        assert!(matches!(result, Err(MultiplexError::Interrupted)));
    }
}
