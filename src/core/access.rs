//! Per-connection access decisions.
//!
//! A check resolves against the stored rule for the application first. With
//! no rule, the filter mode decides: static modes synthesize a rule on the
//! spot, `Wait` asks the observer. Concurrent checks for the same unknown
//! application while an ask is outstanding share that single ask and are all
//! answered when it resolves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::model::{
    rule_permission_for_mode, AccessStatus, Application, FilterMode, Rule, RuleId, RulePermission,
};
use crate::core::rules::RuleStore;
use crate::observer::{Clock, PermissionPrompt, PermissionReply};

/// Callback receiving the eventual verdict of a `Wait` check.
pub type AccessCallback = Box<dyn FnOnce(AccessStatus) + Send>;

type PendingAsks = Mutex<HashMap<Application, Vec<AccessCallback>>>;

/// Evaluates access requests against the filter mode and the rule store.
pub struct AccessDecisionEngine {
    mode: AtomicU8,
    rules: Arc<RuleStore>,
    prompt: Arc<dyn PermissionPrompt>,
    clock: Arc<dyn Clock>,
    pending: Arc<PendingAsks>,
    abandoned_ask_permission: RulePermission,
}

impl AccessDecisionEngine {
    /// Build an engine and load `initial_rules` into the store.
    pub fn new(
        mode: FilterMode,
        initial_rules: Vec<Rule>,
        rules: Arc<RuleStore>,
        prompt: Arc<dyn PermissionPrompt>,
        clock: Arc<dyn Clock>,
        abandoned_ask_permission: RulePermission,
    ) -> Self {
        let count = initial_rules.len();
        for rule in initial_rules {
            rules.update_rule(rule);
        }
        tracing::info!("Access engine started in {mode:?} mode with {count} initial rules");

        Self {
            mode: AtomicU8::new(mode as u8),
            rules,
            prompt,
            clock,
            pending: Arc::new(Mutex::new(HashMap::new())),
            abandoned_ask_permission,
        }
    }

    pub fn set_mode(&self, mode: FilterMode) {
        let previous = FilterMode::from_u8(self.mode.swap(mode as u8, Ordering::Relaxed));
        if previous != mode {
            tracing::info!("Filter mode changed: {previous:?} -> {mode:?}");
        }
    }

    pub fn mode(&self) -> FilterMode {
        FilterMode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    pub fn update_rule(&self, rule: Rule) -> Option<Rule> {
        self.rules.update_rule(rule)
    }

    pub fn remove_rule(&self, id: RuleId) -> Option<Rule> {
        self.rules.remove_rule(id)
    }

    pub fn rule_for_application(&self, application: &Application) -> Option<Rule> {
        self.rules.rule_for_application(application)
    }

    /// Number of applications with an interactive ask outstanding.
    pub fn pending_asks(&self) -> usize {
        self.pending.lock().len()
    }

    /// Decide whether `application` may connect.
    ///
    /// Returns the verdict immediately. `Wait` means the decision is pending;
    /// `on_result` then fires exactly once with the final verdict. For any
    /// other return value `on_result` is dropped without being called.
    pub fn check_access<F>(&self, application: &Application, on_result: F) -> AccessStatus
    where
        F: FnOnce(AccessStatus) + Send + 'static,
    {
        let mode = self.mode();

        if let Some(rule) = self.rules.rule_for_application(application) {
            return self.apply_rule(mode, &rule);
        }

        if mode == FilterMode::Wait {
            return match self.ask(application, Box::new(on_result)) {
                Some(rule) => self.apply_rule(mode, &rule),
                None => AccessStatus::Wait,
            };
        }

        record_decision(&self.rules, self.clock.as_ref(), application, rule_permission_for_mode(mode))
    }

    /// Verdict from an existing rule. Allowed accesses refresh `last_access`.
    fn apply_rule(&self, mode: FilterMode, rule: &Rule) -> AccessStatus {
        if mode == FilterMode::AllAllow {
            return AccessStatus::Allow;
        }

        let status = rule.permission.access_status();
        if status == AccessStatus::Allow {
            let now = self.clock.now();
            self.rules.modify_in_place(rule.id, |rule| rule.last_access = Some(now));
        }
        status
    }

    /// Queue `on_result` and ask the observer unless an ask for the same
    /// application is already outstanding.
    ///
    /// Returns the rule instead if one was stored after the caller's lookup,
    /// dropping `on_result`. Replies store their rule before clearing the
    /// waiter list.
    fn ask(&self, application: &Application, on_result: AccessCallback) -> Option<Rule> {
        let first = {
            let mut pending = self.pending.lock();
            if !pending.contains_key(application) {
                if let Some(rule) = self.rules.rule_for_application(application) {
                    return Some(rule);
                }
            }
            let waiters = pending.entry(application.clone()).or_default();
            waiters.push(on_result);
            waiters.len() == 1
        };
        if !first {
            tracing::debug!("Ask already outstanding for {application}, queued");
            return None;
        }

        let rules = Arc::clone(&self.rules);
        let clock = Arc::clone(&self.clock);
        let pending = Arc::clone(&self.pending);
        let asked = application.clone();
        let fallback = self.abandoned_ask_permission;
        let reply = PermissionReply::new(fallback, move |permission| {
            tracing::info!("Permission for {asked}: {permission:?}");
            let status = record_decision(&rules, clock.as_ref(), &asked, permission);
            let waiters = pending.lock().remove(&asked).unwrap_or_default();
            for waiter in waiters {
                waiter(status);
            }
        });

        tracing::debug!("Asking observer about {application}");
        self.prompt.ask_permission(application, reply);
        None
    }
}

/// Store a freshly decided rule for `application` and return its verdict.
///
/// Allowed rules start with one access at the current time; denied rules
/// start without access history.
fn record_decision(
    rules: &Arc<RuleStore>,
    clock: &dyn Clock,
    application: &Application,
    permission: RulePermission,
) -> AccessStatus {
    let mut rule = Rule::new(permission, application.clone());
    if permission == RulePermission::Allow {
        rule = rule.with_access(clock.now(), 1);
    }
    rules.update_rule(rule);
    permission.access_status()
}
