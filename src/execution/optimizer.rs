//! Rule-based plan optimizer with runtime rule toggles.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::plan::ExecutionPlan;

pub const RULE_CONSTANT_FOLDING: &str = "constant_folding";
pub const RULE_PREDICATE_PUSHDOWN: &str = "predicate_pushdown";
pub const RULE_INDEX_SELECTION: &str = "index_selection";
pub const RULE_JOIN_REORDERING: &str = "join_reordering";
pub const RULE_AGGREGATION_PUSHDOWN: &str = "aggregation_pushdown";

const ALL_RULES: &[&str] = &[
    RULE_CONSTANT_FOLDING,
    RULE_PREDICATE_PUSHDOWN,
    RULE_INDEX_SELECTION,
    RULE_JOIN_REORDERING,
    RULE_AGGREGATION_PUSHDOWN,
];

pub struct RuleBasedOptimizer {
    rules: RwLock<HashMap<String, bool>>,
}

impl RuleBasedOptimizer {
    /// All rules start enabled.
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(ALL_RULES.iter().map(|r| (r.to_string(), true)).collect()),
        }
    }

    /// Apply the enabled rules to a plan. With `index_selection`
    /// enabled the cost shrinks by a fixed factor and the plan is
    /// flagged optimized.
    pub fn optimize(&self, plan: &ExecutionPlan) -> ExecutionPlan {
        let mut optimized = plan.clone();
        if self.is_rule_enabled(RULE_INDEX_SELECTION) {
            optimized.cost_estimate *= 0.8;
            optimized.is_optimized = true;
        }
        optimized
    }

    pub fn enable_rule(&self, rule: &str) {
        if let Some(flag) = self.rules.write().get_mut(rule) {
            *flag = true;
        }
    }

    pub fn disable_rule(&self, rule: &str) {
        if let Some(flag) = self.rules.write().get_mut(rule) {
            *flag = false;
        }
    }

    pub fn is_rule_enabled(&self, rule: &str) -> bool {
        self.rules.read().get(rule).copied().unwrap_or(false)
    }

    /// Names of the currently enabled rules, in canonical order.
    pub fn enabled_rules(&self) -> Vec<String> {
        ALL_RULES
            .iter()
            .filter(|r| self.is_rule_enabled(r))
            .map(|r| r.to_string())
            .collect()
    }

    /// All known rule names.
    pub fn rule_names(&self) -> Vec<String> {
        ALL_RULES.iter().map(|r| r.to_string()).collect()
    }
}

impl Default for RuleBasedOptimizer {
    fn default() -> Self {
        Self::new()
    }
}
