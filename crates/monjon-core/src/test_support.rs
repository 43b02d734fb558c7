// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! Test doubles shared by this crate's unit tests.

use std::time::Duration;

use crate::error::MultiplexError;
use crate::id::SourceName;
use crate::multiplexer::{Multiplexer, PollOutcome};

/// A [`Multiplexer`] that never touches a real socket.
///
/// Registration is accepted and ignored; `poll` either reports "nothing
/// ready" (the default) or "interrupted" (`FakeMultiplexer::interrupting`),
/// which is all dispatcher tests need: the scenarios that matter to the
/// dispatcher exercise the queue and breakpoint paths directly, not
/// readiness dispatch.
pub struct FakeMultiplexer {
    interrupted: bool,
}

impl FakeMultiplexer {
    pub fn new() -> Self {
        Self { interrupted: false }
    }

    pub fn interrupting() -> Self {
        Self { interrupted: true }
    }
}

impl Default for FakeMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer for FakeMultiplexer {
    fn register(&mut self, _source: SourceName, _fd: i32, _interest: mio::Interest) -> std::io::Result<()> {
        Ok(())
    }

    fn deregister(&mut self, _fd: i32) {}

    fn poll(&mut self, _timeout: Option<Duration>) -> Result<PollOutcome, MultiplexError> {
        if self.interrupted {
            Err(MultiplexError::Interrupted)
        } else {
            Ok(PollOutcome::default())
        }
    }
}
