//! Compiled matching rules and their evaluation.
//!
//! Everything in this module is the *activated* form: operators are tagged
//! variants, regexes are compiled, percentages are basis points. Evaluation is
//! pure and total - a predicate applied to a field of the wrong kind is a
//! deterministic non-match, never an error, so legacy rules degrade safely.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use bankforge_banking::BankTransaction;
use bankforge_core::{AggregateId, CompanyId};

/// Matching rule identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub AggregateId);

impl RuleId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for RuleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Transaction field a condition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Description,
    Reference,
    Amount,
    OccurredAt,
    TransactionKind,
    Currency,
}

/// Text comparison, case-insensitive throughout.
///
/// Needles are lowercased at compile time; regexes are built with
/// case-insensitive matching.
#[derive(Debug, Clone)]
pub enum TextPredicate {
    Equals(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Matches(Regex),
}

impl TextPredicate {
    fn evaluate(&self, haystack: &str) -> bool {
        match self {
            TextPredicate::Equals(needle) => haystack.to_lowercase() == *needle,
            TextPredicate::Contains(needle) => haystack.to_lowercase().contains(needle.as_str()),
            TextPredicate::StartsWith(needle) => haystack.to_lowercase().starts_with(needle.as_str()),
            TextPredicate::EndsWith(needle) => haystack.to_lowercase().ends_with(needle.as_str()),
            TextPredicate::Matches(re) => re.is_match(haystack),
        }
    }
}

/// Numeric comparison against the transaction's absolute amount (minor units).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberPredicate {
    Equals(i64),
    GreaterThan(i64),
    LessThan(i64),
    /// Inclusive range.
    Between(i64, i64),
}

impl NumberPredicate {
    fn evaluate(&self, value: i64) -> bool {
        match *self {
            NumberPredicate::Equals(expected) => value == expected,
            NumberPredicate::GreaterThan(threshold) => value > threshold,
            NumberPredicate::LessThan(threshold) => value < threshold,
            NumberPredicate::Between(min, max) => value >= min && value <= max,
        }
    }
}

/// Calendar-date comparison against the transaction's business date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatePredicate {
    On(NaiveDate),
    Before(NaiveDate),
    After(NaiveDate),
    /// Inclusive range.
    Between(NaiveDate, NaiveDate),
}

impl DatePredicate {
    fn evaluate(&self, date: NaiveDate) -> bool {
        match *self {
            DatePredicate::On(expected) => date == expected,
            DatePredicate::Before(threshold) => date < threshold,
            DatePredicate::After(threshold) => date > threshold,
            DatePredicate::Between(min, max) => date >= min && date <= max,
        }
    }
}

/// A compiled comparison.
#[derive(Debug, Clone)]
pub enum Predicate {
    Text(TextPredicate),
    Number(NumberPredicate),
    Date(DatePredicate),
}

/// A single compiled condition: one field, one predicate.
#[derive(Debug, Clone)]
pub struct Condition {
    pub field: Field,
    pub predicate: Predicate,
}

impl Condition {
    /// Pure, total evaluation.
    ///
    /// A predicate kind that does not fit the field kind (e.g. a text
    /// comparison against `amount`) is a non-match, not an error.
    pub fn evaluate(&self, tx: &BankTransaction) -> bool {
        match &self.predicate {
            Predicate::Text(p) => match text_field(self.field, tx) {
                Some(value) => p.evaluate(value),
                None => false,
            },
            Predicate::Number(p) => match number_field(self.field, tx) {
                Some(value) => p.evaluate(value),
                None => false,
            },
            Predicate::Date(p) => match date_field(self.field, tx) {
                Some(value) => p.evaluate(value),
                None => false,
            },
        }
    }
}

fn text_field(field: Field, tx: &BankTransaction) -> Option<&str> {
    match field {
        Field::Description => Some(&tx.description),
        Field::Reference => Some(tx.reference.as_deref().unwrap_or("")),
        Field::TransactionKind => Some(tx.kind().as_str()),
        Field::Currency => Some(&tx.currency),
        Field::Amount | Field::OccurredAt => None,
    }
}

fn number_field(field: Field, tx: &BankTransaction) -> Option<i64> {
    match field {
        Field::Amount => Some(tx.absolute_amount()),
        _ => None,
    }
}

fn date_field(field: Field, tx: &BankTransaction) -> Option<NaiveDate> {
    match field {
        Field::OccurredAt => Some(tx.occurred_at.date_naive()),
        _ => None,
    }
}

/// A condition clause of a rule.
///
/// Clauses combine with AND semantics; an `AnyOf` clause holds when any one of
/// its members holds.
#[derive(Debug, Clone)]
pub enum Clause {
    One(Condition),
    AnyOf(Vec<Condition>),
}

impl Clause {
    pub fn evaluate(&self, tx: &BankTransaction) -> bool {
        match self {
            Clause::One(condition) => condition.evaluate(tx),
            Clause::AnyOf(members) => members.iter().any(|c| c.evaluate(tx)),
        }
    }
}

/// How `match_invoice` picks its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceSelector {
    /// Explicit invoice number, compared case-insensitively.
    Reference(String),
    /// Outstanding amount within the configured tolerance, nearest due date.
    ByAmountAndDueDate,
}

/// Amount of one split allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitAmount {
    /// Minor units.
    Fixed(i64),
    /// Basis points of the transaction's absolute amount (10_000 = 100%).
    Percent(u16),
}

/// One allocation of a `split` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSpec {
    /// Invoice number the allocation targets.
    pub invoice_reference: String,
    pub amount: SplitAmount,
}

/// A compiled action directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Mark reviewed; no reconciliation.
    Ignore,
    /// Tag for reporting; no reconciliation.
    Categorize { category: String },
    /// Allocate the full matched amount to one invoice.
    MatchInvoice { selector: InvoiceSelector },
    /// Allocate across several invoices; remainder stays unallocated.
    Split { allocations: Vec<SplitSpec> },
}

/// An activated matching rule.
///
/// Only ever produced by [`crate::RuleDefinition::compile`], so every variant
/// in here has already been validated.
#[derive(Debug, Clone)]
pub struct MatchingRule {
    pub id: RuleId,
    pub company_id: CompanyId,
    pub name: String,
    /// Higher evaluates first.
    pub priority: i32,
    pub clauses: Vec<Clause>,
    pub actions: Vec<Action>,
}

impl MatchingRule {
    /// True when every clause holds.
    ///
    /// A rule with no clauses matches every transaction - that is how
    /// catch-all "ignore" rules are written, and must stay that way.
    pub fn matches(&self, tx: &BankTransaction) -> bool {
        self.clauses.iter().all(|clause| clause.evaluate(tx))
    }
}

/// First-match rule selection.
///
/// `rules` must already be in evaluation order (priority descending, id
/// ascending - the order [`crate::RuleStore`] returns). The first rule whose
/// conditions hold wins and evaluation stops there; overlapping lower-priority
/// rules never fire.
pub fn select_rule<'a>(rules: &'a [MatchingRule], tx: &BankTransaction) -> Option<&'a MatchingRule> {
    let selected = rules.iter().find(|rule| rule.matches(tx));
    if let Some(rule) = selected {
        tracing::debug!(
            rule_id = %rule.id,
            rule_name = %rule.name,
            transaction_id = %tx.id,
            "matching rule selected"
        );
    }
    selected
}
