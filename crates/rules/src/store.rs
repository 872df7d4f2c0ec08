//! Rule storage and retrieval in evaluation order.

use std::collections::HashMap;
use std::sync::RwLock;

use bankforge_core::CompanyId;

use crate::definition::{RuleDefinition, RuleValidationError};
use crate::rule::{MatchingRule, RuleId};

/// Read side of rule storage.
///
/// `active_rules` returns the company's active rules sorted by priority
/// descending, ties broken by rule id ascending. The ordering is part of the
/// contract: rule selection is first-match-wins, so a stable order is what
/// makes reconciliation reproducible.
pub trait RuleStore: Send + Sync {
    fn active_rules(&self, company_id: CompanyId) -> Vec<MatchingRule>;
}

#[derive(Debug, Clone)]
struct StoredRule {
    definition: RuleDefinition,
    compiled: MatchingRule,
}

/// In-memory rule store.
///
/// Intended for tests/dev. Rules are compiled once at activation;
/// deactivation flips the flag and keeps the entry, preserving audit history
/// for rules that already produced reconciliations.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<HashMap<CompanyId, Vec<StoredRule>>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate, compile, and activate a rule definition.
    ///
    /// A malformed definition is rejected here and never becomes active.
    pub fn activate(&self, definition: RuleDefinition) -> Result<RuleId, RuleValidationError> {
        let mut definition = definition;
        let compiled = definition.compile()?;
        definition.active = true;
        let rule_id = definition.id;

        let mut rules = self.rules.write().expect("rule store lock poisoned");
        let company_rules = rules.entry(definition.company_id).or_default();
        // Re-activating an existing rule replaces its definition.
        company_rules.retain(|stored| stored.definition.id != rule_id);
        company_rules.push(StoredRule {
            definition,
            compiled,
        });
        Ok(rule_id)
    }

    /// Deactivate a rule, retaining it for audit history.
    ///
    /// Returns false when the rule does not exist for this company.
    pub fn deactivate(&self, company_id: CompanyId, rule_id: RuleId) -> bool {
        let mut rules = self.rules.write().expect("rule store lock poisoned");
        let Some(company_rules) = rules.get_mut(&company_id) else {
            return false;
        };
        match company_rules
            .iter_mut()
            .find(|stored| stored.definition.id == rule_id)
        {
            Some(stored) => {
                stored.definition.active = false;
                true
            }
            None => false,
        }
    }

    /// Number of definitions held for a company, active or not.
    pub fn rule_count(&self, company_id: CompanyId) -> usize {
        self.rules
            .read()
            .expect("rule store lock poisoned")
            .get(&company_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl RuleStore for InMemoryRuleStore {
    fn active_rules(&self, company_id: CompanyId) -> Vec<MatchingRule> {
        let rules = self.rules.read().expect("rule store lock poisoned");
        let mut active: Vec<MatchingRule> = rules
            .get(&company_id)
            .map(|company_rules| {
                company_rules
                    .iter()
                    .filter(|stored| stored.definition.active)
                    .map(|stored| stored.compiled.clone())
                    .collect()
            })
            .unwrap_or_default();

        active.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        active
    }
}
