//! Authoritative rule set and its synchronization with the observer.
//!
//! The store is the single writer of the rule map. Every mutation is pushed
//! to the connected observer as a [`RulesDiff`], with at most one diff in
//! flight: mutations that land while a diff is outstanding are coalesced
//! per rule id into the next one. A (re)connecting observer always receives
//! a full snapshot, which supersedes any partial backlog.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::FIRST_RULE_ID;
use crate::core::model::{Application, Rule, RuleId, RulePermission, RulesDiff, UNASSIGNED_RULE_ID};
use crate::observer::{DeliveryAck, RulesSink};

/// Which permissions to include when enumerating rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleFilter {
    pub allowed: bool,
    pub denied: bool,
}

impl RuleFilter {
    pub const ALL: Self = Self { allowed: true, denied: true };
    pub const ALLOWED: Self = Self { allowed: true, denied: false };
    pub const DENIED: Self = Self { allowed: false, denied: true };

    pub fn matches(&self, rule: &Rule) -> bool {
        match rule.permission {
            RulePermission::Allow => self.allowed,
            RulePermission::Deny => self.denied,
        }
    }
}

/// Rule ids touched since the in-flight diff was dispatched.
#[derive(Debug, Default)]
struct PendingChanges {
    updated: HashSet<RuleId>,
    removed: HashSet<RuleId>,
}

impl PendingChanges {
    fn mark_updated(&mut self, id: RuleId) {
        self.removed.remove(&id);
        self.updated.insert(id);
    }

    fn mark_removed(&mut self, id: RuleId) {
        self.updated.remove(&id);
        self.removed.insert(id);
    }

    fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }

    fn clear(&mut self) {
        self.updated.clear();
        self.removed.clear();
    }
}

#[derive(Debug, Default)]
struct SyncState {
    client_connected: bool,
    client_reconnected: bool,
    in_progress: bool,
    pending: PendingChanges,
}

#[derive(Debug)]
struct StoreState {
    rules: HashMap<RuleId, Rule>,
    by_path: HashMap<Application, RuleId>,
    next_id: RuleId,
    sync: SyncState,
}

impl StoreState {
    /// Insert or replace `rule`, resolving unassigned ids against the rule
    /// already stored for the same path. Returns the stored rule and the id
    /// of any other rule evicted because it owned the same path, or `None`
    /// if the rule's id leaves no room for a successor.
    fn upsert(&mut self, mut rule: Rule) -> Option<(Rule, Option<RuleId>)> {
        if rule.id == UNASSIGNED_RULE_ID {
            let existing = self
                .by_path
                .get(&rule.application)
                .and_then(|id| self.rules.get(id))
                .cloned();
            match existing {
                Some(existing) => {
                    let permission = rule.permission;
                    rule = existing;
                    rule.permission = permission;
                }
                None => {
                    rule.id = self.next_id;
                    self.next_id = self.next_id.checked_add(1)?;
                }
            }
        } else {
            let successor = rule.id.checked_add(1)?;
            self.next_id = self.next_id.max(successor);
        }

        let evicted = match self.by_path.get(&rule.application) {
            Some(&owner) if owner != rule.id => {
                self.rules.remove(&owner);
                Some(owner)
            }
            _ => None,
        };

        if let Some(previous) = self.rules.insert(rule.id, rule.clone()) {
            if previous.application != rule.application {
                self.by_path.remove(&previous.application);
            }
        }
        self.by_path.insert(rule.application.clone(), rule.id);

        Some((rule, evicted))
    }

    fn remove(&mut self, id: RuleId) -> Option<Rule> {
        let rule = self.rules.remove(&id)?;
        if self.by_path.get(&rule.application) == Some(&id) {
            self.by_path.remove(&rule.application);
        }
        Some(rule)
    }

    /// Record a mutation for the observer. Returns the diff to dispatch now,
    /// or `None` if nothing is connected or a diff is already in flight.
    fn schedule(&mut self, updated: &[RuleId], removed: &[RuleId]) -> Option<RulesDiff> {
        if !self.sync.client_connected {
            return None;
        }

        if self.sync.in_progress {
            for &id in updated {
                self.sync.pending.mark_updated(id);
            }
            for &id in removed {
                self.sync.pending.mark_removed(id);
            }
            return None;
        }

        self.sync.in_progress = true;
        Some(self.partial_diff(updated.iter().copied(), removed.iter().copied()))
    }

    fn partial_diff(
        &self,
        updated: impl IntoIterator<Item = RuleId>,
        removed: impl IntoIterator<Item = RuleId>,
    ) -> RulesDiff {
        let mut diff = RulesDiff {
            is_full: false,
            updated: updated
                .into_iter()
                .filter_map(|id| self.rules.get(&id).cloned())
                .collect(),
            removed: removed.into_iter().collect(),
        };
        diff.updated.sort_by_key(|rule| rule.id);
        diff.removed.sort_unstable();
        diff
    }

    fn full_diff(&self) -> RulesDiff {
        let mut updated: Vec<Rule> = self.rules.values().cloned().collect();
        updated.sort_by_key(|rule| rule.id);
        RulesDiff {
            is_full: true,
            updated,
            removed: Vec::new(),
        }
    }

    fn take_pending_diff(&mut self) -> RulesDiff {
        let pending = std::mem::take(&mut self.sync.pending);
        self.partial_diff(pending.updated, pending.removed)
    }
}

/// Owns the rule map and pushes coalesced diffs to the observer.
pub struct RuleStore {
    state: Mutex<StoreState>,
    sink: Arc<dyn RulesSink>,
}

impl RuleStore {
    pub fn new(sink: Arc<dyn RulesSink>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(StoreState {
                rules: HashMap::new(),
                by_path: HashMap::new(),
                next_id: FIRST_RULE_ID,
                sync: SyncState::default(),
            }),
            sink,
        })
    }

    /// Insert or replace a rule and return it as stored.
    ///
    /// A rule with id `0` is merged into the rule already stored for its
    /// application (only the permission changes), or gets a fresh id.
    /// Returns `None`, storing nothing, when the id space is exhausted.
    pub fn update_rule(self: &Arc<Self>, rule: Rule) -> Option<Rule> {
        let (stored, outgoing) = {
            let mut state = self.state.lock();
            let id = rule.id;
            let application = rule.application.clone();
            let Some((stored, evicted)) = state.upsert(rule) else {
                tracing::warn!("Rule id space exhausted, update for {application} (id {id}) dropped");
                return None;
            };
            let removed: Vec<RuleId> = evicted.into_iter().collect();
            let outgoing = state.schedule(&[stored.id], &removed);
            (stored, outgoing)
        };

        tracing::debug!(
            "Rule {} stored for {} ({:?})",
            stored.id,
            stored.application,
            stored.permission
        );
        if let Some(diff) = outgoing {
            self.dispatch(diff);
        }
        Some(stored)
    }

    /// Remove a rule. Unknown ids are ignored.
    pub fn remove_rule(self: &Arc<Self>, id: RuleId) -> Option<Rule> {
        let (removed, outgoing) = {
            let mut state = self.state.lock();
            let removed = state.remove(id)?;
            let outgoing = state.schedule(&[], &[id]);
            (removed, outgoing)
        };

        tracing::debug!("Rule {id} removed for {}", removed.application);
        if let Some(diff) = outgoing {
            self.dispatch(diff);
        }
        Some(removed)
    }

    /// Apply `mutator` to a stored rule and notify the observer.
    ///
    /// The rule's id and application are fixed; changes the mutator makes to
    /// them are discarded. Returns `false` if `id` is unknown.
    pub fn modify_in_place<F>(self: &Arc<Self>, id: RuleId, mutator: F) -> bool
    where
        F: FnOnce(&mut Rule),
    {
        let outgoing = {
            let mut state = self.state.lock();
            let Some(rule) = state.rules.get_mut(&id) else {
                return false;
            };
            let application = rule.application.clone();
            mutator(rule);
            rule.id = id;
            rule.application = application;
            state.schedule(&[id], &[])
        };

        if let Some(diff) = outgoing {
            self.dispatch(diff);
        }
        true
    }

    /// First stored rule satisfying `predicate`.
    pub fn matching<P>(&self, predicate: P) -> Option<Rule>
    where
        P: Fn(&Rule) -> bool,
    {
        self.state.lock().rules.values().find(|rule| predicate(rule)).cloned()
    }

    /// The rule stored for `application`, looked up by path.
    pub fn rule_for_application(&self, application: &Application) -> Option<Rule> {
        let state = self.state.lock();
        state
            .by_path
            .get(application)
            .and_then(|id| state.rules.get(id))
            .cloned()
    }

    pub fn get(&self, id: RuleId) -> Option<Rule> {
        self.state.lock().rules.get(&id).cloned()
    }

    /// Rules matching `filter`, ordered by id.
    pub fn rules(&self, filter: RuleFilter) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self
            .state
            .lock()
            .rules
            .values()
            .filter(|rule| filter.matches(rule))
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.id);
        rules
    }

    pub fn len(&self) -> usize {
        self.state.lock().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_client_connected(&self) -> bool {
        self.state.lock().sync.client_connected
    }

    /// An observer attached. It gets a full snapshot, now or as soon as the
    /// diff currently in flight completes.
    pub fn client_connected(self: &Arc<Self>) {
        let outgoing = {
            let mut state = self.state.lock();
            if state.sync.in_progress {
                state.sync.client_reconnected = true;
                None
            } else {
                state.sync.client_connected = true;
                state.sync.in_progress = true;
                Some(state.full_diff())
            }
        };

        match outgoing {
            Some(diff) => {
                tracing::info!("Observer connected, sending {} rules", diff.updated.len());
                self.dispatch(diff);
            }
            None => tracing::info!("Observer reconnected during sync, full resync deferred"),
        }
    }

    fn did_send(self: &Arc<Self>, delivered: bool) {
        let outgoing = {
            let mut state = self.state.lock();
            let sync = &mut state.sync;
            if sync.client_reconnected {
                sync.client_reconnected = false;
                sync.client_connected = true;
                sync.pending.clear();
                Some(state.full_diff())
            } else if !delivered {
                sync.client_connected = false;
                sync.in_progress = false;
                sync.pending.clear();
                tracing::warn!("Rules sync failed, observer treated as disconnected");
                None
            } else if sync.pending.is_empty() {
                sync.in_progress = false;
                None
            } else {
                Some(state.take_pending_diff())
            }
        };

        if let Some(diff) = outgoing {
            self.dispatch(diff);
        }
    }

    /// Hand `diff` to the sink. Must be called without the state lock held.
    fn dispatch(self: &Arc<Self>, diff: RulesDiff) {
        tracing::debug!(
            "Sending rules diff (full: {}, updated: {}, removed: {})",
            diff.is_full,
            diff.updated.len(),
            diff.removed.len()
        );
        let store = Arc::downgrade(self);
        let ack = DeliveryAck::delivery(move |delivered| {
            if let Some(store) = store.upgrade() {
                store.did_send(delivered);
            }
        });
        self.sink.deliver_rules_diff(diff, ack);
    }
}
