// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! The Monjon event dispatcher and TCP proxy engine.
//!
//! This crate is the single-threaded core described by the project's
//! specification: a socket multiplexer, a typed event/packet model, the
//! TCP listener and session sources that produce events, a breakpoint
//! registry, and the dispatcher that ties them together into a
//! run/step/stop debugger loop. It has no REPL, no command parser, and no
//! opinion about how a front-end presents itself — see [`listener::Listener`]
//! for that seam.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod breakpoint;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod id;
pub mod listener;
pub mod multiplexer;
pub mod source;
pub mod tcp;
pub mod udp;

#[cfg(test)]
pub(crate) mod test_support;

pub use breakpoint::{AlwaysTrueEvaluator, Breakpoint, BreakpointRegistry, ConditionEvaluator, Watchpoint, WatchpointRegistry};
pub use dispatcher::Dispatcher;
pub use event::{Action, Direction, Event, EventContext, EventKind, Packet};
pub use id::{BreakpointName, SourceName, WatchpointName};
pub use listener::{Listener, NullListener};
pub use multiplexer::{MioMultiplexer, Multiplexer, PollOutcome};
pub use source::{Source, SourceKind};
