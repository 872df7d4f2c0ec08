//! Action execution: winning rule + transaction -> proposed disposition.
//!
//! This stage is pure and side-effect-free. It reads an open-invoice snapshot
//! and produces a proposal; nothing is persisted and no balance is trusted
//! beyond the snapshot - the allocator re-validates everything at commit.

use serde::{Deserialize, Serialize};

use bankforge_banking::BankTransaction;
use bankforge_invoicing::OpenInvoice;
use bankforge_rules::{Action, InvoiceSelector, MatchingRule, SplitAmount, SplitSpec};

use crate::reconciliation::ReconciliationSplit;

const FULL_PERCENT_BPS: i128 = 10_000;

/// Tie-break among equally-plausible invoices in the amount/due-date
/// heuristic, applied after (amount distance, due-date distance) ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Oldest invoice wins (identifiers are time-ordered).
    LowestInvoiceId,
    /// Largest outstanding balance wins; identity decides beyond that.
    LargestOutstanding,
}

/// Matching policy for the invoice heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPolicy {
    /// Maximum distance between an invoice's outstanding balance and the
    /// matched amount, in minor units. Zero means exact-amount matches only.
    pub amount_tolerance: i64,
    pub tie_break: TieBreak,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            amount_tolerance: 0,
            tie_break: TieBreak::LowestInvoiceId,
        }
    }
}

/// A proposed allocation, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationProposal {
    /// The portion of the transaction being allocated.
    pub matched_amount: i64,
    pub splits: Vec<ReconciliationSplit>,
    /// Category tag from a `categorize` directive on the same rule, if any.
    pub category: Option<String>,
}

/// Outcome of executing a rule's actions against one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Reviewed, no reconciliation.
    Ignore,
    /// Tagged for reporting, no reconciliation.
    Categorize { category: String },
    /// Propose an allocation; the allocator validates and commits it.
    Allocate(AllocationProposal),
    /// The rule fired but its allocation could not be resolved; the
    /// transaction stays unmatched for manual handling.
    Unmatched { reason: String },
}

/// Execute a rule's action directives in order.
///
/// `ignore` short-circuits. A `categorize` tag is remembered and rides along
/// with a later allocation. The first allocation directive wins; later ones
/// are not consulted.
pub fn execute_actions(
    rule: &MatchingRule,
    tx: &BankTransaction,
    open_invoices: &[OpenInvoice],
    policy: &MatchPolicy,
) -> Disposition {
    let mut category: Option<String> = None;
    let mut proposal: Option<AllocationProposal> = None;

    for action in &rule.actions {
        match action {
            Action::Ignore => return Disposition::Ignore,
            Action::Categorize { category: tag } => {
                if category.is_none() {
                    category = Some(tag.clone());
                }
            }
            Action::MatchInvoice { selector } if proposal.is_none() => {
                match propose_single(selector, tx, open_invoices, policy) {
                    Ok(p) => proposal = Some(p),
                    Err(reason) => return Disposition::Unmatched { reason },
                }
            }
            Action::Split { allocations } if proposal.is_none() => {
                match propose_split(allocations, tx, open_invoices) {
                    Ok(p) => proposal = Some(p),
                    Err(reason) => return Disposition::Unmatched { reason },
                }
            }
            Action::MatchInvoice { .. } | Action::Split { .. } => {}
        }
    }

    match (proposal, category) {
        (Some(mut p), category) => {
            p.category = category;
            Disposition::Allocate(p)
        }
        (None, Some(category)) => Disposition::Categorize { category },
        // Compilation guarantees at least one action, so reaching here means
        // the rule was allocation-free and ignore-free with no category.
        (None, None) => Disposition::Unmatched {
            reason: "rule produced no disposition".to_string(),
        },
    }
}

fn ensure_credit(tx: &BankTransaction) -> Result<i64, String> {
    if !tx.is_credit() || tx.amount == 0 {
        return Err("debit transaction cannot fund invoice allocations".to_string());
    }
    Ok(tx.absolute_amount())
}

/// `match_invoice`: one allocation for the full matched amount, capped at the
/// target's outstanding balance (partial settlement of a larger invoice).
fn propose_single(
    selector: &InvoiceSelector,
    tx: &BankTransaction,
    open_invoices: &[OpenInvoice],
    policy: &MatchPolicy,
) -> Result<AllocationProposal, String> {
    let matched_amount = ensure_credit(tx)?;

    let target = match selector {
        InvoiceSelector::Reference(reference) => open_invoices
            .iter()
            .find(|invoice| invoice.reference.eq_ignore_ascii_case(reference))
            .ok_or_else(|| format!("no open invoice with reference '{reference}'"))?,
        InvoiceSelector::ByAmountAndDueDate => {
            select_by_amount_and_due_date(matched_amount, tx, open_invoices, policy)
                .ok_or_else(|| "no open invoice within amount tolerance".to_string())?
        }
    };

    let allocated = matched_amount.min(target.outstanding);
    Ok(AllocationProposal {
        matched_amount,
        splits: vec![ReconciliationSplit {
            invoice_id: target.invoice_id,
            allocated_amount: allocated,
            invoice_version: target.version,
            payment_id: None,
        }],
        category: None,
    })
}

/// The secondary matching heuristic: outstanding balance within tolerance,
/// nearest due date to the transaction date, then the configured tie-break.
fn select_by_amount_and_due_date<'a>(
    matched_amount: i64,
    tx: &BankTransaction,
    open_invoices: &'a [OpenInvoice],
    policy: &MatchPolicy,
) -> Option<&'a OpenInvoice> {
    let tx_date = tx.occurred_at.date_naive();

    open_invoices
        .iter()
        .filter(|invoice| {
            (invoice.outstanding - matched_amount).abs() <= policy.amount_tolerance
        })
        .min_by_key(|invoice| {
            let amount_distance = (invoice.outstanding - matched_amount).abs();
            let due_distance = (invoice.due_date.date_naive() - tx_date).num_days().abs();
            let tie = match policy.tie_break {
                TieBreak::LowestInvoiceId => 0,
                // Negate so that a larger outstanding sorts first.
                TieBreak::LargestOutstanding => -invoice.outstanding,
            };
            (amount_distance, due_distance, tie, invoice.invoice_id)
        })
}

/// `split`: several allocations, fixed minor units or basis points of the
/// transaction amount. The remainder stays unallocated; it is never forced
/// onto a target.
fn propose_split(
    allocations: &[SplitSpec],
    tx: &BankTransaction,
    open_invoices: &[OpenInvoice],
) -> Result<AllocationProposal, String> {
    let matched_amount = ensure_credit(tx)?;

    let mut splits = Vec::with_capacity(allocations.len());
    let mut total: i64 = 0;

    for spec in allocations {
        let target = open_invoices
            .iter()
            .find(|invoice| invoice.reference.eq_ignore_ascii_case(&spec.invoice_reference))
            .ok_or_else(|| {
                format!("no open invoice with reference '{}'", spec.invoice_reference)
            })?;

        let amount = match spec.amount {
            SplitAmount::Fixed(minor) => minor,
            SplitAmount::Percent(bps) => {
                ((matched_amount as i128 * i128::from(bps)) / FULL_PERCENT_BPS) as i64
            }
        };
        if amount <= 0 {
            return Err(format!(
                "allocation for '{}' resolves to a non-positive amount",
                spec.invoice_reference
            ));
        }

        total = total
            .checked_add(amount)
            .ok_or_else(|| "allocation total overflow".to_string())?;
        if total > matched_amount {
            return Err("split allocations exceed transaction amount".to_string());
        }

        splits.push(ReconciliationSplit {
            invoice_id: target.invoice_id,
            allocated_amount: amount,
            invoice_version: target.version,
            payment_id: None,
        });
    }

    Ok(AllocationProposal {
        matched_amount,
        splits,
        category: None,
    })
}
