//! Authored rule definitions and their activation-time compilation.
//!
//! Definitions keep the loosely-typed shape the administrative surface stores
//! (string field/operator names, JSON comparison values). [`RuleDefinition::compile`]
//! turns one into a [`MatchingRule`] or rejects it - an unknown field, operator,
//! or action kind never reaches evaluation.

use chrono::NaiveDate;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use bankforge_core::CompanyId;

use crate::rule::{
    Action, Clause, Condition, DatePredicate, Field, InvoiceSelector, MatchingRule,
    NumberPredicate, Predicate, RuleId, SplitAmount, SplitSpec, TextPredicate,
};

/// Upper bound on regex pattern length, guarding against pathological
/// patterns reaching the compiler.
const MAX_REGEX_LEN: usize = 500;

/// Basis points in 100%.
const FULL_PERCENT_BPS: u32 = 10_000;

/// Why a definition failed to activate.
///
/// These surface to the rule author at edit time; evaluation never sees them.
#[derive(Debug, Error)]
pub enum RuleValidationError {
    #[error("rule name must not be empty")]
    EmptyName,

    #[error("rule must declare at least one action")]
    EmptyActions,

    #[error("unknown condition field: {0}")]
    UnknownField(String),

    #[error("unknown condition operator: {0}")]
    UnknownOperator(String),

    #[error("condition value for '{operator}' must be {expected}")]
    InvalidConditionValue {
        operator: String,
        expected: &'static str,
    },

    #[error("regex pattern too long: {len} bytes (max {max})")]
    RegexTooLong { len: usize, max: usize },

    #[error("invalid regex pattern: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("unknown action kind: {0}")]
    UnknownAction(String),

    #[error("invalid parameters for action '{action}': {detail}")]
    InvalidActionParams { action: String, detail: String },

    #[error("split percentages sum to {total_basis_points} bps, exceeding 100%")]
    PercentOverflow { total_basis_points: u32 },

    #[error("split fixed amounts must be positive")]
    NonPositiveAmount,
}

/// One authored condition.
///
/// Conditions sharing an `or_group` tag are OR'd together; untagged conditions
/// must each hold on their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDef {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or_group: Option<u32>,
}

/// One authored action directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDef {
    pub action: String,
    #[serde(default)]
    pub params: JsonValue,
}

/// A matching rule as authored and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: RuleId,
    pub company_id: CompanyId,
    pub name: String,
    /// Empty list = catch-all: the rule matches every transaction.
    #[serde(default)]
    pub conditions: Vec<ConditionDef>,
    pub actions: Vec<ActionDef>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub active: bool,
}

impl RuleDefinition {
    /// Validate and compile into the activated form.
    ///
    /// Structural problems are rejected here, once, so evaluation stays total.
    /// Known operators paired with a field of the wrong kind still compile -
    /// they evaluate to a non-match, which is how legacy rules degrade.
    pub fn compile(&self) -> Result<MatchingRule, RuleValidationError> {
        if self.name.trim().is_empty() {
            return Err(RuleValidationError::EmptyName);
        }
        if self.actions.is_empty() {
            return Err(RuleValidationError::EmptyActions);
        }

        let mut clauses: Vec<Clause> = Vec::new();
        // Maps an or_group tag to the index of its clause in `clauses`,
        // preserving first-appearance order.
        let mut group_slots: Vec<(u32, usize)> = Vec::new();

        for def in &self.conditions {
            let condition = compile_condition(def)?;
            match def.or_group {
                None => clauses.push(Clause::One(condition)),
                Some(tag) => {
                    if let Some(&(_, slot)) = group_slots.iter().find(|(g, _)| *g == tag) {
                        match &mut clauses[slot] {
                            Clause::AnyOf(members) => members.push(condition),
                            Clause::One(_) => unreachable!("group slots always hold AnyOf"),
                        }
                    } else {
                        group_slots.push((tag, clauses.len()));
                        clauses.push(Clause::AnyOf(vec![condition]));
                    }
                }
            }
        }

        let actions = self
            .actions
            .iter()
            .map(compile_action)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MatchingRule {
            id: self.id,
            company_id: self.company_id,
            name: self.name.clone(),
            priority: self.priority,
            clauses,
            actions,
        })
    }
}

fn compile_condition(def: &ConditionDef) -> Result<Condition, RuleValidationError> {
    let field = parse_field(&def.field)?;
    let predicate = parse_predicate(&def.operator, &def.value)?;
    Ok(Condition { field, predicate })
}

fn parse_field(name: &str) -> Result<Field, RuleValidationError> {
    match name {
        "description" => Ok(Field::Description),
        "reference" => Ok(Field::Reference),
        "amount" => Ok(Field::Amount),
        "occurred_at" => Ok(Field::OccurredAt),
        "transaction_kind" => Ok(Field::TransactionKind),
        "currency" => Ok(Field::Currency),
        other => Err(RuleValidationError::UnknownField(other.to_string())),
    }
}

fn parse_predicate(operator: &str, value: &JsonValue) -> Result<Predicate, RuleValidationError> {
    match operator {
        // `equals` dispatches on the value: strings compare as text,
        // integers as minor-unit amounts.
        "equals" => {
            if let Some(s) = value.as_str() {
                Ok(Predicate::Text(TextPredicate::Equals(s.to_lowercase())))
            } else if let Some(n) = value.as_i64() {
                Ok(Predicate::Number(NumberPredicate::Equals(n)))
            } else {
                Err(RuleValidationError::InvalidConditionValue {
                    operator: operator.to_string(),
                    expected: "a string or an integer amount in minor units",
                })
            }
        }
        "contains" => Ok(Predicate::Text(TextPredicate::Contains(
            string_value(operator, value)?.to_lowercase(),
        ))),
        "starts_with" => Ok(Predicate::Text(TextPredicate::StartsWith(
            string_value(operator, value)?.to_lowercase(),
        ))),
        "ends_with" => Ok(Predicate::Text(TextPredicate::EndsWith(
            string_value(operator, value)?.to_lowercase(),
        ))),
        "matches" => {
            let pattern = string_value(operator, value)?;
            if pattern.len() > MAX_REGEX_LEN {
                return Err(RuleValidationError::RegexTooLong {
                    len: pattern.len(),
                    max: MAX_REGEX_LEN,
                });
            }
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()?;
            Ok(Predicate::Text(TextPredicate::Matches(regex)))
        }
        "greater_than" => Ok(Predicate::Number(NumberPredicate::GreaterThan(
            integer_value(operator, value)?,
        ))),
        "less_than" => Ok(Predicate::Number(NumberPredicate::LessThan(
            integer_value(operator, value)?,
        ))),
        "between" => parse_between(operator, value),
        "on" => Ok(Predicate::Date(DatePredicate::On(date_value(
            operator, value,
        )?))),
        "before" => Ok(Predicate::Date(DatePredicate::Before(date_value(
            operator, value,
        )?))),
        "after" => Ok(Predicate::Date(DatePredicate::After(date_value(
            operator, value,
        )?))),
        other => Err(RuleValidationError::UnknownOperator(other.to_string())),
    }
}

/// `between` takes `[min, max]` - two integers for amounts, or two ISO dates.
fn parse_between(operator: &str, value: &JsonValue) -> Result<Predicate, RuleValidationError> {
    let invalid = || RuleValidationError::InvalidConditionValue {
        operator: operator.to_string(),
        expected: "an array of two integers or two ISO dates",
    };

    let items = value.as_array().ok_or_else(|| invalid())?;
    let [low, high] = items.as_slice() else {
        return Err(invalid());
    };

    match (low, high) {
        (JsonValue::Number(_), JsonValue::Number(_)) => {
            let min = low.as_i64().ok_or_else(|| invalid())?;
            let max = high.as_i64().ok_or_else(|| invalid())?;
            Ok(Predicate::Number(NumberPredicate::Between(min, max)))
        }
        (JsonValue::String(min), JsonValue::String(max)) => {
            let min = parse_date(operator, min)?;
            let max = parse_date(operator, max)?;
            Ok(Predicate::Date(DatePredicate::Between(min, max)))
        }
        _ => Err(invalid()),
    }
}

fn string_value<'a>(
    operator: &str,
    value: &'a JsonValue,
) -> Result<&'a str, RuleValidationError> {
    value
        .as_str()
        .ok_or_else(|| RuleValidationError::InvalidConditionValue {
            operator: operator.to_string(),
            expected: "a string",
        })
}

fn integer_value(operator: &str, value: &JsonValue) -> Result<i64, RuleValidationError> {
    value
        .as_i64()
        .ok_or_else(|| RuleValidationError::InvalidConditionValue {
            operator: operator.to_string(),
            expected: "an integer amount in minor units",
        })
}

fn date_value(operator: &str, value: &JsonValue) -> Result<NaiveDate, RuleValidationError> {
    parse_date(operator, string_value(operator, value)?)
}

fn parse_date(operator: &str, s: &str) -> Result<NaiveDate, RuleValidationError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
        RuleValidationError::InvalidConditionValue {
            operator: operator.to_string(),
            expected: "an ISO date (YYYY-MM-DD)",
        }
    })
}

fn compile_action(def: &ActionDef) -> Result<Action, RuleValidationError> {
    match def.action.as_str() {
        "ignore" => Ok(Action::Ignore),
        "categorize" => {
            let category = def
                .params
                .get("category")
                .and_then(JsonValue::as_str)
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| RuleValidationError::InvalidActionParams {
                    action: def.action.clone(),
                    detail: "requires a non-empty 'category' string".to_string(),
                })?;
            Ok(Action::Categorize {
                category: category.to_string(),
            })
        }
        "match_invoice" => match def.params.get("reference") {
            None => Ok(Action::MatchInvoice {
                selector: InvoiceSelector::ByAmountAndDueDate,
            }),
            Some(reference) => {
                let reference = reference.as_str().filter(|r| !r.trim().is_empty()).ok_or_else(
                    || RuleValidationError::InvalidActionParams {
                        action: def.action.clone(),
                        detail: "'reference' must be a non-empty string".to_string(),
                    },
                )?;
                Ok(Action::MatchInvoice {
                    selector: InvoiceSelector::Reference(reference.to_string()),
                })
            }
        },
        "split" => compile_split(def),
        other => Err(RuleValidationError::UnknownAction(other.to_string())),
    }
}

fn compile_split(def: &ActionDef) -> Result<Action, RuleValidationError> {
    let params_err = |detail: &str| RuleValidationError::InvalidActionParams {
        action: def.action.clone(),
        detail: detail.to_string(),
    };

    let allocations = def
        .params
        .get("allocations")
        .and_then(JsonValue::as_array)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| params_err("requires a non-empty 'allocations' array"))?;

    let mut specs = Vec::with_capacity(allocations.len());
    let mut total_bps: u32 = 0;

    for entry in allocations {
        let invoice_reference = entry
            .get("invoice")
            .and_then(JsonValue::as_str)
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| params_err("each allocation requires a non-empty 'invoice' reference"))?
            .to_string();

        let fixed = entry.get("amount");
        let percent = entry.get("percent");

        let amount = match (fixed, percent) {
            (Some(_), Some(_)) => {
                return Err(params_err("an allocation takes 'amount' or 'percent', not both"));
            }
            (None, None) => {
                return Err(params_err("each allocation requires 'amount' or 'percent'"));
            }
            (Some(value), None) => {
                let minor = value
                    .as_i64()
                    .ok_or_else(|| params_err("'amount' must be an integer in minor units"))?;
                if minor <= 0 {
                    return Err(RuleValidationError::NonPositiveAmount);
                }
                SplitAmount::Fixed(minor)
            }
            (None, Some(value)) => {
                let percent = value
                    .as_f64()
                    .ok_or_else(|| params_err("'percent' must be a number"))?;
                let bps = (percent * 100.0).round();
                if !(bps > 0.0 && bps <= f64::from(FULL_PERCENT_BPS)) {
                    return Err(params_err("'percent' must be within (0, 100]"));
                }
                let bps = bps as u32;
                total_bps += bps;
                SplitAmount::Percent(bps as u16)
            }
        };

        specs.push(SplitSpec {
            invoice_reference,
            amount,
        });
    }

    if total_bps > FULL_PERCENT_BPS {
        return Err(RuleValidationError::PercentOverflow {
            total_basis_points: total_bps,
        });
    }

    Ok(Action::Split { allocations: specs })
}
