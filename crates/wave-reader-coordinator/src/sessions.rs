//! Per-tab session table with command generations.

use std::collections::{BTreeMap, HashMap};

use wave_reader_core::{AnimationState, Session, Settings, TabId};

use crate::CoordinatorState;

/// Sessions keyed by tab, plus the generation of the last command
/// dispatched to each tab.
///
/// Generations come from one counter shared by every tab and start at 1, so
/// a tab's entry can be dropped with its session: an acknowledgment arriving
/// after a tab was closed or reset never matches a later dispatch.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: BTreeMap<TabId, Session>,
    next_generation: u64,
    generations: HashMap<TabId, u64>,
    in_flight: HashMap<TabId, usize>,
}

impl SessionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, tab: TabId) -> Option<&Session> {
        self.sessions.get(&tab)
    }

    pub fn get_mut(&mut self, tab: TabId) -> Option<&mut Session> {
        self.sessions.get_mut(&tab)
    }

    /// Sessions ordered by tab.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Claim the next generation for a command to `tab` and mark it in
    /// flight.
    pub fn dispatch(&mut self, tab: TabId) -> u64 {
        self.next_generation += 1;
        self.generations.insert(tab, self.next_generation);
        *self.in_flight.entry(tab).or_default() += 1;
        self.next_generation
    }

    /// Mark one command to `tab` acknowledged. Returns whether `generation`
    /// is still the latest for the tab.
    pub fn acknowledge(&mut self, tab: TabId, generation: u64) -> bool {
        if let Some(count) = self.in_flight.get_mut(&tab) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.in_flight.remove(&tab);
            }
        }
        self.is_current(tab, generation)
    }

    /// Whether `generation` is the latest dispatched to `tab`.
    #[must_use]
    pub fn is_current(&self, tab: TabId, generation: u64) -> bool {
        self.generations.get(&tab) == Some(&generation)
    }

    /// Whether any command to `tab` awaits acknowledgment.
    #[must_use]
    pub fn has_in_flight(&self, tab: TabId) -> bool {
        self.in_flight.contains_key(&tab)
    }

    /// Whether any command at all awaits acknowledgment.
    #[must_use]
    pub fn any_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Record a waving session, replacing whatever the tab had.
    pub fn start(&mut self, tab: TabId, selector: String, options: Settings, generation: u64) -> &Session {
        let session = Session::waving(tab, selector, options, generation);
        tracing::debug!(tab, session_id = %session.id, "session started");
        self.sessions.insert(tab, session);
        &self.sessions[&tab]
    }

    /// Move an existing session to `state`.
    pub fn set_state(&mut self, tab: TabId, state: AnimationState, generation: u64) {
        if let Some(session) = self.sessions.get_mut(&tab) {
            session.animation_state = state;
            session.generation = generation;
        }
    }

    /// Drop the tab's session. Commands still in flight become stale.
    pub fn remove(&mut self, tab: TabId) -> Option<Session> {
        self.generations.remove(&tab);
        self.in_flight.remove(&tab);
        self.sessions.remove(&tab)
    }

    /// Drop every session. Commands still in flight become stale.
    pub fn clear(&mut self) {
        self.generations.clear();
        self.in_flight.clear();
        self.sessions.clear();
    }

    /// Selectors of waving sessions, deduplicated.
    #[must_use]
    pub fn active_selectors(&self) -> Vec<String> {
        let mut selectors: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.animation_state == AnimationState::Waving)
            .map(|s| s.selector.clone())
            .collect();
        selectors.sort();
        selectors.dedup();
        selectors
    }

    /// Global state implied by the sessions.
    #[must_use]
    pub fn derived_state(&self) -> CoordinatorState {
        let any = |state: AnimationState| self.sessions.values().any(|s| s.animation_state == state);
        CoordinatorState::derived(any(AnimationState::Waving), any(AnimationState::Paused))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_dispatch_supersedes_older() {
        let mut table = SessionTable::new();
        let start = table.dispatch(1);
        let stop = table.dispatch(1);

        assert!(!table.acknowledge(1, start));
        assert!(table.has_in_flight(1));
        assert!(table.acknowledge(1, stop));
        assert!(!table.any_in_flight());
    }

    #[test]
    fn test_remove_makes_in_flight_stale() {
        let mut table = SessionTable::new();
        let generation = table.dispatch(4);
        table.start(4, "p".into(), Settings::default(), generation);

        let pending = table.dispatch(4);
        assert!(table.remove(4).is_some());
        assert!(!table.acknowledge(4, pending));
        assert!(table.get(4).is_none());
    }

    #[test]
    fn test_closed_tabs_leave_no_bookkeeping() {
        let mut table = SessionTable::new();
        let mut stale = Vec::new();
        for tab in 1..=50 {
            let generation = table.dispatch(tab);
            table.start(tab, "p".into(), Settings::default(), generation);
            stale.push((tab, table.dispatch(tab)));
            table.remove(tab);
        }

        assert!(table.generations.is_empty());
        assert!(!table.any_in_flight());
        for (tab, generation) in stale {
            assert!(!table.acknowledge(tab, generation));
        }

        let reopened = table.dispatch(7);
        assert!(table.acknowledge(7, reopened));
    }

    #[test]
    fn test_derived_state() {
        let mut table = SessionTable::new();
        assert_eq!(table.derived_state(), CoordinatorState::Ready);

        table.start(1, "p".into(), Settings::default(), 1);
        table.start(2, "li".into(), Settings::default(), 1);
        table.set_state(1, AnimationState::Paused, 2);
        assert_eq!(table.derived_state(), CoordinatorState::Waving);

        table.set_state(2, AnimationState::Stopped, 2);
        assert_eq!(table.derived_state(), CoordinatorState::Paused);
        assert!(table.active_selectors().is_empty());
    }

    #[test]
    fn test_clear_keeps_generations_monotonic() {
        let mut table = SessionTable::new();
        let before = table.dispatch(9);
        table.clear();
        assert!(!table.is_current(9, before));
        assert!(table.generations.is_empty());
        assert!(table.dispatch(9) > before);
    }
}
