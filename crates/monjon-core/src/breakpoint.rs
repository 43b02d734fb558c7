// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2026 The Monjon Authors

//! The breakpoint registry, per §4.4.

use std::collections::HashMap;

use tracing::debug;

use crate::error::ConditionError;
use crate::event::{Event, EventKind};
use crate::id::{BreakpointName, NameGen, SourceName, WatchpointName};

/// The default, always-true condition, per §4.4: "If no evaluator is
/// supplied or condition is the literal `True`, the breakpoint fires
/// unconditionally."
pub const DEFAULT_CONDITION: &str = "True";

/// Evaluates an opaque breakpoint/watchpoint condition string against an
/// event.
///
/// The core embeds no expression language of its own (Design Note §9:
/// "condition expressions are opaque strings ... a pluggable capability
/// supplied by the front-end"); [`AlwaysTrueEvaluator`] is the only
/// evaluator the core ships, sufficient for breakpoints whose condition is
/// the default `"True"`.
pub trait ConditionEvaluator {
    fn evaluate(&self, condition: &str, event: &Event) -> Result<bool, ConditionError>;

    /// Resolve a watchpoint's `property` against `event`, for display in
    /// [`crate::listener::Listener::on_watch`]. The core ships no property
    /// language, so the default reports nothing; a front-end evaluator may
    /// override this to surface, e.g., packet length or peer address.
    fn watch_value(&self, _property: &str, _event: &Event) -> Option<String> {
        None
    }
}

/// Fires every breakpoint unconditionally, regardless of the stored
/// condition string. Installed when the front-end supplies no evaluator.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysTrueEvaluator;

impl ConditionEvaluator for AlwaysTrueEvaluator {
    fn evaluate(&self, _condition: &str, _event: &Event) -> Result<bool, ConditionError> {
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub name: BreakpointName,
    pub source: SourceName,
    pub kind: EventKind,
    pub condition: String,
}

#[derive(Debug, Clone)]
pub struct Watchpoint {
    pub name: WatchpointName,
    pub source: SourceName,
    pub property: String,
    pub condition: String,
}

/// Stores and looks up breakpoints keyed by (source, event kind).
///
/// §3 invariant: "a breakpoint exists in both the by-source index and the
/// by-name index or in neither" — every mutating method here maintains
/// both maps together, so that invariant can never observably break.
#[derive(Default)]
pub struct BreakpointRegistry {
    by_source: HashMap<(SourceName, EventKind), BreakpointName>,
    by_name: HashMap<BreakpointName, Breakpoint>,
    names: NameGen,
}

/// What happened as a result of [`BreakpointRegistry::set`]: a plain new
/// breakpoint, or one that replaced an existing breakpoint on the same
/// (source, kind) pair (which the caller must also report as cleared).
pub enum SetOutcome {
    Created(Breakpoint),
    Replaced { created: Breakpoint, cleared: Breakpoint },
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// §4.4: "If a breakpoint already exists for the same (source, kind),
    /// it is replaced and the old one notified as cleared."
    pub fn set(&mut self, source: SourceName, kind: EventKind, condition: String) -> SetOutcome {
        let name = self.names.next();
        let breakpoint = Breakpoint { name, source, kind, condition };

        let previous = self
            .by_source
            .insert((source, kind), name)
            .and_then(|old_name| self.by_name.remove(&old_name));

        self.by_name.insert(name, breakpoint.clone());
        debug!(name = %name, source = %source, kind = %kind, "breakpoint set");

        match previous {
            Some(cleared) => SetOutcome::Replaced { created: breakpoint, cleared },
            None => SetOutcome::Created(breakpoint),
        }
    }

    /// Clearing an already-cleared breakpoint is a no-op, per §4.4.
    pub fn clear(&mut self, name: BreakpointName) -> Option<Breakpoint> {
        let breakpoint = self.by_name.remove(&name)?;
        self.by_source.remove(&(breakpoint.source, breakpoint.kind));
        debug!(name = %name, "breakpoint cleared");
        Some(breakpoint)
    }

    pub fn matching(&self, event: &Event) -> Option<&Breakpoint> {
        let name = self.by_source.get(&(event.source, event.kind))?;
        self.by_name.get(name)
    }

    pub fn get(&self, name: BreakpointName) -> Option<&Breakpoint> {
        self.by_name.get(&name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.by_name.values()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.by_source.len(), self.by_name.len());
        self.by_name.len()
    }
}

#[derive(Default)]
pub struct WatchpointRegistry {
    watchpoints: HashMap<WatchpointName, Watchpoint>,
    names: NameGen,
}

impl WatchpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, source: SourceName, property: String, condition: String) -> Watchpoint {
        let name = self.names.next();
        let watchpoint = Watchpoint { name, source, property, condition };
        self.watchpoints.insert(name, watchpoint.clone());
        watchpoint
    }

    pub fn clear(&mut self, name: WatchpointName) -> Option<Watchpoint> {
        self.watchpoints.remove(&name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Watchpoint> {
        self.watchpoints.values()
    }

    /// Watchpoints belonging to `source`, evaluated ahead of a break per
    /// §4.5 ("Watchpoints on break").
    pub fn for_source(&self, source: SourceName) -> impl Iterator<Item = &Watchpoint> {
        self.watchpoints.values().filter(move |w| w.source == source)
    }
}

/// Resolve a breakpoint's condition against `evaluator`, falling back to
/// fail-open semantics (§4.4: "If evaluation raises, the breakpoint fires
/// and the error is passed as context").
pub fn evaluate_condition(
    evaluator: &dyn ConditionEvaluator,
    condition: &str,
    event: &Event,
) -> (bool, Option<String>) {
    if condition == DEFAULT_CONDITION {
        return (true, None);
    }
    match evaluator.evaluate(condition, event) {
        Ok(result) => (result, None),
        Err(err) => (true, Some(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SourceName;

    fn event(source: SourceName, kind: EventKind) -> Event {
        Event::new(
            source,
            kind,
            crate::event::Action::CloseSession {
                session: source,
                cause: crate::error::CloseCause::Requested,
            },
        )
    }

    #[test]
    fn set_then_clear_restores_prior_state() {
        let mut reg = BreakpointRegistry::new();
        let source = SourceName(0);
        let outcome = reg.set(source, EventKind::Accept, DEFAULT_CONDITION.into());
        let SetOutcome::Created(bp) = outcome else { panic!("expected Created") };
        assert_eq!(reg.len(), 1);

        reg.clear(bp.name);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn duplicate_set_replaces_and_reports_old() {
        let mut reg = BreakpointRegistry::new();
        let source = SourceName(0);
        reg.set(source, EventKind::Accept, DEFAULT_CONDITION.into());
        let outcome = reg.set(source, EventKind::Accept, "x == 1".into());
        assert!(matches!(outcome, SetOutcome::Replaced { .. }));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn matching_finds_by_source_and_kind() {
        let mut reg = BreakpointRegistry::new();
        let source = SourceName(3);
        reg.set(source, EventKind::ServerRecv, DEFAULT_CONDITION.into());

        let hit = event(source, EventKind::ServerRecv);
        assert!(reg.matching(&hit).is_some());

        let miss = event(source, EventKind::ClientRecv);
        assert!(reg.matching(&miss).is_none());
    }

    #[test]
    fn clearing_twice_is_a_no_op() {
        let mut reg = BreakpointRegistry::new();
        let outcome = reg.set(SourceName(0), EventKind::Close, DEFAULT_CONDITION.into());
        let SetOutcome::Created(bp) = outcome else { panic!("expected Created") };
        assert!(reg.clear(bp.name).is_some());
        assert!(reg.clear(bp.name).is_none());
    }

    #[test]
    fn default_condition_fires_without_evaluator() {
        let (fired, diag) = evaluate_condition(&AlwaysTrueEvaluator, DEFAULT_CONDITION, &event(SourceName(0), EventKind::Accept));
        assert!(fired);
        assert!(diag.is_none());
    }

    struct FailingEvaluator;
    impl ConditionEvaluator for FailingEvaluator {
        fn evaluate(&self, _condition: &str, _event: &Event) -> Result<bool, ConditionError> {
            Err(ConditionError("boom".into()))
        }
    }

    #[test]
    fn failing_evaluator_fails_open() {
        let (fired, diag) =
            evaluate_condition(&FailingEvaluator, "bogus", &event(SourceName(0), EventKind::Accept));
        assert!(fired, "a broken condition must not silently skip a break");
        assert_eq!(diag.as_deref(), Some("condition evaluation failed: boom"));
    }

    #[test]
    fn watchpoint_set_clear_and_iter_round_trip() {
        let mut reg = WatchpointRegistry::new();
        let source = SourceName(1);
        let w = reg.set(source, "bytes_sent".into(), DEFAULT_CONDITION.into());
        assert_eq!(reg.iter().count(), 1);
        assert_eq!(reg.for_source(source).count(), 1);
        assert_eq!(reg.for_source(SourceName(2)).count(), 0);

        let cleared = reg.clear(w.name);
        assert_eq!(cleared.map(|c| c.name), Some(w.name));
        assert_eq!(reg.iter().count(), 0);
        assert!(reg.clear(w.name).is_none());
    }
}
