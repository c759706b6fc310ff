//! Observer-side replica of the rule set.
//!
//! A UI that receives [`RulesDiff`]s applies them here to keep a local copy
//! it can list and filter without a round trip to the firewall core.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::core::model::{Rule, RuleId, RulesDiff};
use crate::core::rules::RuleFilter;

#[derive(Debug, Default)]
pub struct RuleMirror {
    rules: Mutex<HashMap<RuleId, Rule>>,
}

impl RuleMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a diff. A full diff replaces the whole mirror; a partial one
    /// upserts `updated` and erases `removed`.
    pub fn apply(&self, diff: RulesDiff) {
        let mut rules = self.rules.lock();
        if diff.is_full {
            rules.clear();
        }
        for rule in diff.updated {
            rules.insert(rule.id, rule);
        }
        for id in &diff.removed {
            rules.remove(id);
        }
        tracing::trace!(
            "Rule mirror applied {} diff, {} rules",
            if diff.is_full { "full" } else { "partial" },
            rules.len()
        );
    }

    /// Rules matching `filter`, ordered by id.
    pub fn rules(&self, filter: RuleFilter) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self
            .rules
            .lock()
            .values()
            .filter(|rule| filter.matches(rule))
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.id);
        rules
    }

    pub fn get(&self, id: RuleId) -> Option<Rule> {
        self.rules.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
