//! `bankforge-rules` - matching rules for bank transaction reconciliation.
//!
//! Rules are authored as loosely-typed definitions (strings + JSON values, the
//! shape the administrative surface stores). Activation compiles a definition
//! into a closed set of tagged variants, rejecting anything malformed with
//! [`RuleValidationError`] - evaluation itself is pure, total, and can no
//! longer encounter a malformed rule.

pub mod definition;
pub mod rule;
pub mod store;

pub use definition::{ActionDef, ConditionDef, RuleDefinition, RuleValidationError};
pub use rule::{
    Action, Clause, Condition, DatePredicate, Field, InvoiceSelector, MatchingRule,
    NumberPredicate, Predicate, RuleId, SplitAmount, SplitSpec, TextPredicate, select_rule,
};
pub use store::{InMemoryRuleStore, RuleStore};
