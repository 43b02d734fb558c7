// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! The dispatcher, per §4.5 — the heart of the system.
//!
//! Owns every registered source, the breakpoint/watchpoint registries, the
//! FIFO event queue, the socket multiplexer, and the run/step/stop flags.
//! `run()`/`step()` implement the algorithm of §4.5 verbatim, including the
//! resume semantics (the stashed break event's action dispatches first on
//! the next `step`) and the single-event-per-`step` ordering guarantee.

use std::collections::HashMap;
use std::time::Duration;

use mio::Interest;
use tracing::{debug, error, warn};

use crate::breakpoint::{evaluate_condition, AlwaysTrueEvaluator, BreakpointRegistry, ConditionEvaluator, SetOutcome, WatchpointRegistry};
use crate::error::{CloseCause, DispatchError, MultiplexError};
use crate::event::{Action, Event, EventKind};
use crate::id::{BreakpointName, NameGen, SourceName, WatchpointName};
use crate::listener::{Listener, NullListener};
use crate::multiplexer::{Multiplexer, PollOutcome};
use crate::source::{Side, Source};
use crate::tcp::TcpSession;

/// How long a single multiplexer wait may block while the event queue is
/// empty. §4.5 step a: "query the multiplexer ... with a short finite
/// timeout (implementations should use poll-style readiness, not spin)."
/// Bounded rather than infinite so an interrupt flag flipped between
/// readiness notifications is still noticed promptly.
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

pub struct Dispatcher {
    sources: HashMap<SourceName, Source>,
    socket_to_source: HashMap<i32, SourceName>,
    breakpoints: BreakpointRegistry,
    watchpoints: WatchpointRegistry,
    queue: std::collections::VecDeque<Event>,
    multiplexer: Box<dyn Multiplexer>,
    listener: Box<dyn Listener>,
    evaluator: Box<dyn ConditionEvaluator>,
    names: NameGen,
    run_flag: bool,
    /// The break event the operator is inspecting. `None` outside a break.
    /// Resume semantics (§4.5): the next `step()` dispatches this event's
    /// action before consulting the queue at all.
    stashed: Option<Event>,
    /// Maps a session to the listener that spawned it, so a session close
    /// can update the listener's retained history without the session
    /// holding a back-reference (Design Note §9: "sessions do not
    /// reference the listener").
    session_owner: HashMap<SourceName, SourceName>,
}

impl Dispatcher {
    pub fn new(multiplexer: Box<dyn Multiplexer>) -> Self {
        Self {
            sources: HashMap::new(),
            socket_to_source: HashMap::new(),
            breakpoints: BreakpointRegistry::new(),
            watchpoints: WatchpointRegistry::new(),
            queue: std::collections::VecDeque::new(),
            multiplexer,
            listener: Box::new(NullListener),
            evaluator: Box::new(AlwaysTrueEvaluator),
            names: NameGen::new(),
            run_flag: false,
            stashed: None,
            session_owner: HashMap::new(),
        }
    }

    /// The next numeric name a newly constructed source should use.
    /// Sources are built outside the dispatcher (they need the name before
    /// they exist, to embed in their own logging) and handed to
    /// [`Dispatcher::register_source`] once built.
    pub fn alloc_name(&mut self) -> SourceName {
        self.names.next()
    }

    pub fn set_listener(&mut self, listener: Box<dyn Listener>) {
        self.listener = listener;
    }

    pub fn set_condition_evaluator(&mut self, evaluator: Box<dyn ConditionEvaluator>) {
        self.evaluator = evaluator;
    }

    /// §4.5: "assign/revoke name, maintain socket index, update front-end
    /// visible tables." The name itself was already assigned by
    /// [`Dispatcher::alloc_name`] before the source was constructed.
    pub fn register_source(&mut self, source: Source) -> Result<SourceName, DispatchError> {
        let name = source.name();
        for socket in source.sockets() {
            // A session's client/server sockets need writable interest too,
            // so a partial write's queued tail (tcp.rs's `pending_to_*`
            // buffers) can drain on the next writable notification; a
            // listening socket only ever accepts, so readable alone covers
            // it.
            let interest = match socket.side {
                Side::Listening => Interest::READABLE,
                Side::Client | Side::Server => Interest::READABLE | Interest::WRITABLE,
            };
            self.multiplexer.register(name, socket.fd, interest)?;
            self.socket_to_source.insert(socket.fd, name);
        }
        self.sources.insert(name, source);
        debug!(name = %name, "source registered");
        Ok(name)
    }

    /// §4.5 / §4.3 Close action: "deregisters the session from the
    /// dispatcher, closes both sockets, nullifies the session's socket
    /// references." Socket deregistration happens here, while the source's
    /// reported socket set is still accurate; callers close the returned
    /// source afterwards.
    pub fn deregister_source(&mut self, name: SourceName) -> Option<Source> {
        let source = self.sources.remove(&name)?;
        for socket in source.sockets() {
            self.multiplexer.deregister(socket.fd);
            self.socket_to_source.remove(&socket.fd);
        }
        debug!(name = %name, "source deregistered");
        Some(source)
    }

    pub fn queue_event(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    pub fn set_breakpoint(&mut self, source: SourceName, kind: EventKind, condition: String) -> crate::breakpoint::Breakpoint {
        match self.breakpoints.set(source, kind, condition) {
            SetOutcome::Created(bp) => {
                self.listener.on_set_breakpoint(&bp);
                bp
            }
            SetOutcome::Replaced { created, cleared } => {
                self.listener.on_set_breakpoint(&created);
                self.listener.on_clear_breakpoint(&cleared);
                created
            }
        }
    }

    pub fn clear_breakpoint(&mut self, name: BreakpointName) -> Option<crate::breakpoint::Breakpoint> {
        let bp = self.breakpoints.clear(name)?;
        self.listener.on_clear_breakpoint(&bp);
        Some(bp)
    }

    pub fn set_watchpoint(&mut self, source: SourceName, property: String, condition: String) -> crate::breakpoint::Watchpoint {
        self.watchpoints.set(source, property, condition)
    }

    pub fn clear_watchpoint(&mut self, name: WatchpointName) -> Option<crate::breakpoint::Watchpoint> {
        self.watchpoints.clear(name)
    }

    pub fn get_sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn get_source(&self, name: SourceName) -> Option<&Source> {
        self.sources.get(&name)
    }

    pub fn get_breakpoints(&self) -> impl Iterator<Item = &crate::breakpoint::Breakpoint> {
        self.breakpoints.iter()
    }

    pub fn get_watchpoints(&self) -> impl Iterator<Item = &crate::breakpoint::Watchpoint> {
        self.watchpoints.iter()
    }

    /// The event currently held at a break, if any — the `e` handle of §6.
    pub fn stashed_event(&self) -> Option<&Event> {
        self.stashed.as_ref()
    }

    /// Mutable access to the stashed event's payload, so a front-end can
    /// replace a packet's bytes before resuming (§6, scenario 3). Returns
    /// `None` outside a break.
    pub fn stashed_packet_mut(&mut self) -> Option<&mut crate::event::Packet> {
        self.stashed.as_mut()?.payload.as_mut()
    }

    pub fn is_running(&self) -> bool {
        self.run_flag
    }

    /// §4.5.3: clears the run flag. Cooperative — takes effect at the next
    /// `step()` boundary, not immediately.
    pub fn stop(&mut self) {
        self.run_flag = false;
    }

    /// §4.5.1: sets the run flag and steps until it clears or `step()`
    /// reports an interrupt.
    pub fn run(&mut self) {
        self.run_flag = true;
        while self.run_flag {
            if !self.step() {
                break;
            }
        }
    }

    /// §4.5.2, the step algorithm. Returns `false` only on interrupt.
    pub fn step(&mut self) -> bool {
        if let Some(event) = self.stashed.take() {
            self.execute_action(event.action);
            return true;
        }

        while self.queue.is_empty() {
            match self.multiplexer.poll(Some(POLL_TIMEOUT)) {
                Ok(outcome) => self.dispatch_readiness(&outcome),
                Err(MultiplexError::Interrupted) => return false,
                Err(MultiplexError::Io(e)) => {
                    error!(error = %e, "multiplexer failed");
                    return false;
                }
            }
        }

        let Some(event) = self.queue.pop_front() else { return true };

        if !self.sources.contains_key(&event.source) {
            debug!(source = %event.source, kind = %event.kind, "dropping stale event for deregistered source");
            return true;
        }

        if let Some(bp) = self.breakpoints.matching(&event).cloned() {
            let (fired, diag) = evaluate_condition(self.evaluator.as_ref(), &bp.condition, &event);
            if fired {
                let mut event = event;
                if let Some(diag) = diag {
                    event.context.condition_error = Some(diag);
                }
                self.evaluate_watchpoints(&event);
                self.run_flag = false;
                self.listener.on_break(&bp, &event);
                self.stashed = Some(event);
                return true;
            }
        }

        self.execute_action(event.action);
        true
    }

    /// §4.5, "Watchpoints on break": every watchpoint on the event's source
    /// is evaluated, and `on_watch` fires for each whose condition matches.
    /// Never suspends the loop.
    fn evaluate_watchpoints(&mut self, event: &Event) {
        let hits: Vec<(crate::breakpoint::Watchpoint, Option<String>)> = self
            .watchpoints
            .for_source(event.source)
            .filter_map(|w| {
                let (fired, _diag) = evaluate_condition(self.evaluator.as_ref(), &w.condition, event);
                fired.then(|| (w.clone(), self.evaluator.watch_value(&w.property, event)))
            })
            .collect();

        for (watchpoint, value) in hits {
            self.listener.on_watch(&watchpoint, value.as_deref(), event);
        }
    }

    /// Drain one multiplexer readiness report into zero or more queued
    /// events by calling each ready source's readability handler.
    fn dispatch_readiness(&mut self, outcome: &PollOutcome) {
        let mut produced = Vec::new();

        for (name, fd) in &outcome.readable {
            if let Some(source) = self.sources.get_mut(name) {
                source.on_readable(*fd, &mut produced);
            }
        }
        for (name, fd) in &outcome.writable {
            if let Some(source) = self.sources.get_mut(name) {
                source.on_writable(*fd, &mut produced);
            }
        }

        self.queue.extend(produced);
    }

    fn execute_action(&mut self, action: Action) {
        match action {
            Action::AcceptPublish { listener } => self.accept_publish(listener),
            Action::Forward { session, direction, packet } => self.forward(session, direction, &packet),
            Action::CloseSession { session, cause } => self.close_session(session, cause),
        }
    }

    /// §4.2: "the action that *publishes* the new session is deferred so
    /// that breakpoints on Accept can suspend before the session exists
    /// from the operator's perspective." Runs once, after any Accept
    /// breakpoint has released the event.
    fn accept_publish(&mut self, listener: SourceName) {
        let Some(Source::TcpListener(l)) = self.sources.get_mut(&listener) else {
            debug!(listener = %listener, "accept_publish: listener no longer registered");
            return;
        };

        let Some(stream) = l.take_pending_accept() else {
            return;
        };

        let (host, port) = {
            let (host, port) = l.target();
            (host.to_string(), port)
        };

        let name = self.names.next();
        match TcpSession::connect(name, stream, &host, port) {
            Ok(session) => {
                let description = session.describe();
                match self.register_source(Source::TcpSession(session)) {
                    Ok(_) => {
                        self.session_owner.insert(name, listener);
                        if let Some(Source::TcpListener(l)) = self.sources.get_mut(&listener) {
                            l.record_session(name, description);
                        }
                    }
                    Err(e) => error!(session = %name, error = %e, "failed to register accepted session"),
                }
            }
            Err(e) => warn!(listener = %listener, error = %e, "failed to connect accepted session to target"),
        }
    }

    /// §6: "the deferred send action re-reads the Packet on execution, so a
    /// mutated Packet is observed" — `packet` is read from the event at
    /// call time, after any front-end edit made while paused on the break.
    fn forward(&mut self, session: SourceName, direction: crate::event::Direction, packet: &crate::event::Packet) {
        let Some(Source::TcpSession(s)) = self.sources.get_mut(&session) else {
            debug!(session = %session, "forward: session no longer registered");
            return;
        };

        if let Err(e) = s.forward(direction, packet) {
            warn!(session = %session, error = %e, "send failed; queuing close");
            let cause = CloseCause::Io(e.to_string());
            self.queue_event(Event::new(session, EventKind::Close, Action::CloseSession { session, cause }));
        }
    }

    /// §4.3 Close action, idempotent: a session already removed from
    /// `sources` (a second Close racing the first) is a silent no-op.
    fn close_session(&mut self, session: SourceName, cause: CloseCause) {
        let Some(removed) = self.deregister_source(session) else {
            return;
        };

        if let Source::TcpSession(mut s) = removed {
            s.close();
        }

        if let Some(owner) = self.session_owner.remove(&session) {
            if let Some(Source::TcpListener(l)) = self.sources.get_mut(&owner) {
                l.mark_session_closed(session);
            }
        }

        debug!(session = %session, cause = %cause, "session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeMultiplexer;

    #[derive(Default)]
    struct RecordingListener {
        breaks: Vec<(BreakpointName, EventKind)>,
        sets: Vec<BreakpointName>,
        clears: Vec<BreakpointName>,
        watches: std::rc::Rc<std::cell::RefCell<Vec<(WatchpointName, Option<String>)>>>,
    }

    impl Listener for RecordingListener {
        fn on_break(&mut self, breakpoint: &crate::breakpoint::Breakpoint, event: &Event) {
            self.breaks.push((breakpoint.name, event.kind));
        }
        fn on_set_breakpoint(&mut self, breakpoint: &crate::breakpoint::Breakpoint) {
            self.sets.push(breakpoint.name);
        }
        fn on_clear_breakpoint(&mut self, breakpoint: &crate::breakpoint::Breakpoint) {
            self.clears.push(breakpoint.name);
        }
        fn on_watch(&mut self, watchpoint: &crate::breakpoint::Watchpoint, value: Option<&str>, _event: &Event) {
            self.watches.borrow_mut().push((watchpoint.name, value.map(String::from)));
        }
    }

    /// Reports a fixed value for every watched property, so a watchpoint
    /// test can assert on something more meaningful than `None`.
    struct FixedValueEvaluator;

    impl ConditionEvaluator for FixedValueEvaluator {
        fn evaluate(&self, _condition: &str, _event: &Event) -> Result<bool, crate::error::ConditionError> {
            Ok(true)
        }
        fn watch_value(&self, property: &str, _event: &Event) -> Option<String> {
            Some(format!("{property}=42"))
        }
    }

    fn harness() -> Dispatcher {
        Dispatcher::new(Box::new(FakeMultiplexer::new()))
    }

    fn no_op_event(source: SourceName, kind: EventKind) -> Event {
        Event::new(source, kind, Action::CloseSession { session: source, cause: CloseCause::Requested })
    }

    #[test]
    fn step_processes_exactly_one_queued_event() {
        let mut d = harness();
        let a = d.alloc_name();
        let b = d.alloc_name();
        d.queue_event(no_op_event(a, EventKind::Close));
        d.queue_event(no_op_event(b, EventKind::Close));

        assert_eq!(d.queue.len(), 2);
        d.step();
        assert_eq!(d.queue.len(), 1);
        d.step();
        assert_eq!(d.queue.len(), 0);
    }

    #[test]
    fn stale_event_for_deregistered_source_is_dropped() {
        let mut d = harness();
        let ghost = d.alloc_name();
        d.queue_event(no_op_event(ghost, EventKind::Close));
        assert!(d.step());
        assert!(d.queue.is_empty());
    }

    #[test]
    fn breakpoint_suspends_before_action_and_resumes_on_next_step() {
        let mut d = harness();
        d.set_listener(Box::new(RecordingListener::default()));
        let source = d.alloc_name();

        d.set_breakpoint(source, EventKind::Close, crate::breakpoint::DEFAULT_CONDITION.into());
        d.queue_event(no_op_event(source, EventKind::Close));

        // The event names a source that was never registered as a live
        // `Source`, only allocated a name; that's fine for this test since
        // `close_session`'s no-op path on an already-absent source is what
        // we are implicitly exercising after resume.
        d.run_flag = true;
        d.step();
        assert!(!d.run_flag, "a break must clear the run flag");
        assert!(d.stashed_event().is_some());

        d.step();
        assert!(d.stashed_event().is_none());
    }

    #[test]
    fn set_then_clear_breakpoint_round_trips_notifications() {
        let mut d = harness();
        d.set_listener(Box::new(RecordingListener::default()));
        let source = d.alloc_name();

        let bp = d.set_breakpoint(source, EventKind::Accept, crate::breakpoint::DEFAULT_CONDITION.into());
        d.clear_breakpoint(bp.name);

        assert_eq!(d.get_breakpoints().count(), 0);
    }

    #[test]
    fn watchpoint_fires_alongside_a_breakpoint_on_the_same_source() {
        let mut d = harness();
        let listener = RecordingListener::default();
        let watches = listener.watches.clone();
        d.set_listener(Box::new(listener));
        d.set_condition_evaluator(Box::new(FixedValueEvaluator));
        let source = d.alloc_name();

        d.set_breakpoint(source, EventKind::Close, crate::breakpoint::DEFAULT_CONDITION.into());
        let watchpoint = d.set_watchpoint(source, "bytes_sent".into(), crate::breakpoint::DEFAULT_CONDITION.into());
        d.queue_event(no_op_event(source, EventKind::Close));

        d.run_flag = true;
        d.step();
        assert!(!d.run_flag, "a break must clear the run flag");

        let recorded = watches.borrow();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], (watchpoint.name, Some("bytes_sent=42".to_string())));
    }

    #[test]
    fn register_then_deregister_leaves_tables_unchanged() {
        let mut d = harness();
        let before_sources = d.sources.len();
        let before_sockets = d.socket_to_source.len();

        let name = d.alloc_name();
        let listener = crate::tcp::TcpListener::bind(name, 0, Some("127.0.0.1".into()), 7).unwrap();
        d.register_source(Source::TcpListener(listener)).unwrap();
        d.deregister_source(name);

        assert_eq!(d.sources.len(), before_sources);
        assert_eq!(d.socket_to_source.len(), before_sockets);
    }

    #[test]
    fn interrupt_during_poll_returns_false_with_sources_intact() {
        let mut d = Dispatcher::new(Box::new(FakeMultiplexer::interrupting()));
        let name = d.alloc_name();
        let listener = crate::tcp::TcpListener::bind(name, 0, Some("127.0.0.1".into()), 7).unwrap();
        d.register_source(Source::TcpListener(listener)).unwrap();

        assert!(!d.step());
        assert_eq!(d.get_sources().count(), 1);
    }
}
