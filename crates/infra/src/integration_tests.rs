//! Integration tests for the full reconciliation pipeline.
//!
//! Tests: transaction -> rule selection -> action execution -> proposal ->
//! commit -> state machine, over the in-memory stores.
//!
//! Verifies:
//! - first-match rule selection by priority
//! - money conservation through commit
//! - balance re-validation and concurrent-commit behavior
//! - company isolation

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use bankforge_banking::{BankAccount, BankAccountId, BankTransaction, TransactionId};
use bankforge_core::{AggregateId, CompanyId, DomainError};
use bankforge_invoicing::InvoiceId;
use bankforge_reconciliation::{MatchPolicy, ReconciliationId, ReconciliationStatus};
use bankforge_rules::{ActionDef, ConditionDef, InMemoryRuleStore, RuleDefinition, RuleId};

use crate::allocator::SplitAllocator;
use crate::bank_accounts::{BankAccountStore, InMemoryBankAccounts};
use crate::coordinator::{Outcome, ReconciliationCoordinator};
use crate::error::AllocationError;
use crate::invoice_ledger::{InMemoryInvoiceLedger, InvoiceLedger};
use crate::reconciliations::{InMemoryReconciliationStore, ReconciliationStore};

struct Harness {
    company_id: CompanyId,
    account_id: BankAccountId,
    rules: Arc<InMemoryRuleStore>,
    invoices: Arc<InMemoryInvoiceLedger>,
    accounts: Arc<InMemoryBankAccounts>,
    reconciliations: Arc<InMemoryReconciliationStore>,
    coordinator: Arc<ReconciliationCoordinator>,
}

fn harness() -> Harness {
    harness_with_policy(MatchPolicy::default())
}

fn harness_with_policy(policy: MatchPolicy) -> Harness {
    let company_id = CompanyId::new();
    let rules = Arc::new(InMemoryRuleStore::new());
    let invoices = Arc::new(InMemoryInvoiceLedger::new());
    let accounts = Arc::new(InMemoryBankAccounts::new());
    let reconciliations = Arc::new(InMemoryReconciliationStore::new());

    let account_id = BankAccountId::new(AggregateId::new());
    accounts.add_account(BankAccount {
        id: account_id,
        company_id,
        name: "Operating".to_string(),
        currency: "EUR".to_string(),
        current_balance: 10_000_00,
    });

    let coordinator = Arc::new(ReconciliationCoordinator::new(
        rules.clone(),
        invoices.clone(),
        accounts.clone(),
        reconciliations.clone(),
        policy,
    ));

    Harness {
        company_id,
        account_id,
        rules,
        invoices,
        accounts,
        reconciliations,
        coordinator,
    }
}

impl Harness {
    fn transaction(&self, amount: i64, description: &str) -> BankTransaction {
        BankTransaction {
            id: TransactionId::new(AggregateId::new()),
            company_id: self.company_id,
            bank_account_id: self.account_id,
            amount,
            currency: "EUR".to_string(),
            occurred_at: Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap(),
            description: description.to_string(),
            reference: None,
        }
    }

    fn open_invoice(&self, reference: &str, total: i64) -> InvoiceId {
        self.invoices
            .open(
                self.company_id,
                reference,
                total,
                Utc.with_ymd_and_hms(2026, 1, 20, 0, 0, 0).unwrap(),
            )
            .unwrap()
    }

    fn activate(&self, definition: RuleDefinition) -> RuleId {
        self.rules.activate(definition).unwrap()
    }

    fn definition(&self, name: &str, priority: i32) -> RuleDefinition {
        RuleDefinition {
            id: RuleId::new(AggregateId::new()),
            company_id: self.company_id,
            name: name.to_string(),
            conditions: vec![],
            actions: vec![],
            priority,
            active: true,
        }
    }

    fn bank_balance(&self) -> i64 {
        self.accounts
            .current_balance(self.company_id, self.account_id)
            .unwrap()
    }

    fn status(&self, reconciliation_id: ReconciliationId) -> ReconciliationStatus {
        self.reconciliations
            .get(self.company_id, reconciliation_id)
            .unwrap()
            .status()
    }
}

fn condition(field: &str, operator: &str, value: serde_json::Value) -> ConditionDef {
    ConditionDef {
        field: field.to_string(),
        operator: operator.to_string(),
        value,
        or_group: None,
    }
}

fn action(kind: &str, params: serde_json::Value) -> ActionDef {
    ActionDef {
        action: kind.to_string(),
        params,
    }
}

#[test]
fn higher_priority_rule_wins_over_broader_match() {
    let h = harness();
    h.open_invoice("INV-RENT", 1_500_00);

    // R1: priority 10, description contains "RENT", matches the invoice.
    let mut r1 = h.definition("rent", 10);
    r1.conditions = vec![condition("description", "contains", json!("RENT"))];
    r1.actions = vec![action("match_invoice", json!({"reference": "INV-RENT"}))];
    h.activate(r1);

    // R2: priority 5, amount > 0, would ignore.
    let mut r2 = h.definition("all credits", 5);
    r2.conditions = vec![condition("amount", "greater_than", json!(0))];
    r2.actions = vec![action("ignore", json!(null))];
    h.activate(r2);

    let tx = h.transaction(1_500_00, "RENT JAN");
    let outcome = h.coordinator.process(h.company_id, &tx).unwrap();

    // R1 must win: the outcome is a proposal, not R2's ignore.
    let Outcome::Proposed {
        reconciliation_id, ..
    } = outcome
    else {
        panic!("expected proposal from the RENT rule, got {outcome:?}");
    };
    let recon = h
        .reconciliations
        .get(h.company_id, reconciliation_id)
        .unwrap();
    assert_eq!(recon.matched_amount(), 1_500_00);
}

#[test]
fn full_lifecycle_proposal_commit_post() {
    let h = harness();
    let invoice_id = h.open_invoice("INV-1001", 1_500_00);

    let mut rule = h.definition("rent", 10);
    rule.conditions = vec![condition("description", "contains", json!("RENT"))];
    rule.actions = vec![action("match_invoice", json!({"reference": "INV-1001"}))];
    h.activate(rule);

    let tx = h.transaction(1_500_00, "RENT JAN");
    let outcome = h.coordinator.process(h.company_id, &tx).unwrap();
    let Outcome::Proposed {
        reconciliation_id, ..
    } = outcome
    else {
        panic!("expected proposal, got {outcome:?}");
    };
    assert_eq!(h.status(reconciliation_id), ReconciliationStatus::Proposed);
    // Proposal alone moves no money.
    assert_eq!(h.bank_balance(), 10_000_00);
    assert_eq!(
        h.invoices.outstanding(h.company_id, invoice_id),
        Some(1_500_00)
    );

    let payments = h.coordinator.confirm(h.company_id, reconciliation_id).unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, 1_500_00);
    assert_eq!(payments[0].invoice_id, invoice_id);
    assert_eq!(h.status(reconciliation_id), ReconciliationStatus::Confirmed);
    assert_eq!(h.invoices.outstanding(h.company_id, invoice_id), Some(0));
    assert_eq!(h.bank_balance(), 11_500_00);

    h.coordinator.post(h.company_id, reconciliation_id).unwrap();
    assert_eq!(h.status(reconciliation_id), ReconciliationStatus::Posted);

    // Posting is one-way.
    let err = h
        .coordinator
        .post(h.company_id, reconciliation_id)
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidTransition { .. }));
}

#[test]
fn catch_all_ignore_rule_matches_everything() {
    let h = harness();
    let mut rule = h.definition("default ignore", -100);
    rule.actions = vec![action("ignore", json!(null))];
    let rule_id = h.activate(rule);

    let outcome = h
        .coordinator
        .process(h.company_id, &h.transaction(-42_17, "BANK FEE"))
        .unwrap();
    assert_eq!(outcome, Outcome::Ignored { rule_id });
}

#[test]
fn categorize_tags_without_reconciliation() {
    let h = harness();
    let mut rule = h.definition("fees", 1);
    rule.conditions = vec![condition("description", "contains", json!("FEE"))];
    rule.actions = vec![action("categorize", json!({"category": "bank-fees"}))];
    let rule_id = h.activate(rule);

    let outcome = h
        .coordinator
        .process(h.company_id, &h.transaction(-10_00, "MONTHLY FEE"))
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Categorized {
            rule_id,
            category: "bank-fees".to_string()
        }
    );
    assert!(
        h.reconciliations
            .by_status(h.company_id, ReconciliationStatus::Proposed)
            .is_empty()
    );
}

#[test]
fn no_matching_rule_leaves_transaction_unmatched() {
    let h = harness();
    let mut rule = h.definition("rent only", 10);
    rule.conditions = vec![condition("description", "contains", json!("RENT"))];
    rule.actions = vec![action("ignore", json!(null))];
    h.activate(rule);

    let outcome = h
        .coordinator
        .process(h.company_id, &h.transaction(100_00, "GROCERIES"))
        .unwrap();
    assert_eq!(outcome, Outcome::Unmatched { reason: None });
}

#[test]
fn split_allocation_commits_across_invoices() {
    let h = harness();
    let invoice_a = h.open_invoice("INV-A", 2_000_00);
    let invoice_b = h.open_invoice("INV-B", 2_000_00);

    let mut rule = h.definition("project settlement", 10);
    rule.conditions = vec![condition("description", "contains", json!("SETTLEMENT"))];
    rule.actions = vec![action(
        "split",
        json!({"allocations": [
            {"invoice": "INV-A", "percent": 60},
            {"invoice": "INV-B", "percent": 40},
        ]}),
    )];
    h.activate(rule);

    let tx = h.transaction(1_000_00, "Q1 SETTLEMENT");
    let Outcome::Proposed {
        reconciliation_id, ..
    } = h.coordinator.process(h.company_id, &tx).unwrap()
    else {
        panic!("expected proposal");
    };

    let payments = h.coordinator.confirm(h.company_id, reconciliation_id).unwrap();
    let amounts: Vec<i64> = payments.iter().map(|p| p.amount).collect();
    assert_eq!(amounts, vec![600_00, 400_00]);
    assert_eq!(amounts.iter().sum::<i64>(), 1_000_00);
    assert_eq!(
        h.invoices.outstanding(h.company_id, invoice_a),
        Some(1_400_00)
    );
    assert_eq!(
        h.invoices.outstanding(h.company_id, invoice_b),
        Some(1_600_00)
    );
    // One transaction, one balance advance, regardless of split count.
    assert_eq!(h.bank_balance(), 11_000_00);
}

#[test]
fn insufficient_invoice_balance_rejects_whole_proposal() {
    let h = harness();
    let invoice_id = h.open_invoice("INV-SMALL", 300_00);

    // Fixed split of 500.00 against an invoice with 300.00 outstanding: the
    // proposal is formed, the commit must reject it.
    let mut rule = h.definition("overshoot", 10);
    rule.actions = vec![action(
        "split",
        json!({"allocations": [{"invoice": "INV-SMALL", "amount": 500_00}]}),
    )];
    h.activate(rule);

    let tx = h.transaction(500_00, "PAYMENT");
    let Outcome::Proposed {
        reconciliation_id, ..
    } = h.coordinator.process(h.company_id, &tx).unwrap()
    else {
        panic!("expected proposal");
    };

    let err = h
        .coordinator
        .confirm(h.company_id, reconciliation_id)
        .unwrap_err();
    assert!(matches!(
        err,
        AllocationError::BalanceInsufficient {
            outstanding: 300_00,
            requested: 500_00,
            ..
        }
    ));

    // Whole proposal rejected atomically: no payment, no balance change.
    assert_eq!(h.status(reconciliation_id), ReconciliationStatus::Rejected);
    assert!(h.invoices.payments(h.company_id).is_empty());
    assert_eq!(
        h.invoices.outstanding(h.company_id, invoice_id),
        Some(300_00)
    );
    assert_eq!(h.bank_balance(), 10_000_00);

    // The rejection reason is recorded for the review queue.
    let recon = h
        .reconciliations
        .get(h.company_id, reconciliation_id)
        .unwrap();
    assert!(recon.rejection_reason().unwrap().contains("insufficient"));
}

#[test]
fn concurrent_commits_on_one_invoice_yield_one_success_one_conflict() {
    let h = harness();
    let invoice_id = h.open_invoice("INV-SHARED", 1_000_00);

    let mut rule = h.definition("shared target", 10);
    rule.actions = vec![action("match_invoice", json!({"reference": "INV-SHARED"}))];
    h.activate(rule);

    // Two transactions of 600.00 both propose against the same invoice
    // before either commits, so both carry the same invoice version.
    let tx1 = h.transaction(600_00, "PAYMENT ONE");
    let tx2 = h.transaction(600_00, "PAYMENT TWO");
    let recon_ids: Vec<ReconciliationId> = [&tx1, &tx2]
        .iter()
        .map(|tx| {
            match h.coordinator.process(h.company_id, tx).unwrap() {
                Outcome::Proposed {
                    reconciliation_id, ..
                } => reconciliation_id,
                other => panic!("expected proposal, got {other:?}"),
            }
        })
        .collect();

    let handles: Vec<_> = recon_ids
        .iter()
        .map(|&reconciliation_id| {
            let coordinator = h.coordinator.clone();
            let company_id = h.company_id;
            std::thread::spawn(move || coordinator.confirm(company_id, reconciliation_id))
        })
        .collect();

    let results: Vec<Result<_, AllocationError>> =
        handles.into_iter().map(|t| t.join().unwrap()).collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(AllocationError::ConcurrentConflict { invoice_id: i }) if *i == invoice_id
            )
        })
        .count();
    assert_eq!(successes, 1, "exactly one commit must win");
    assert_eq!(conflicts, 1, "the loser must see a concurrent conflict");

    // The invoice balance was applied once, not twice.
    assert_eq!(
        h.invoices.outstanding(h.company_id, invoice_id),
        Some(400_00)
    );
    assert_eq!(h.invoices.payments(h.company_id).len(), 1);
    // Only the winning transaction advanced the bank balance.
    assert_eq!(h.bank_balance(), 10_600_00);
}

#[test]
fn conflicted_proposal_can_be_reproposed_after_reopen() {
    let h = harness();
    h.open_invoice("INV-X", 1_000_00);

    let mut rule = h.definition("target", 10);
    rule.actions = vec![action("match_invoice", json!({"reference": "INV-X"}))];
    h.activate(rule);

    let tx1 = h.transaction(600_00, "FIRST");
    let tx2 = h.transaction(600_00, "SECOND");
    let Outcome::Proposed {
        reconciliation_id: first,
        ..
    } = h.coordinator.process(h.company_id, &tx1).unwrap()
    else {
        panic!("expected proposal");
    };
    let Outcome::Proposed {
        reconciliation_id: second,
        ..
    } = h.coordinator.process(h.company_id, &tx2).unwrap()
    else {
        panic!("expected proposal");
    };

    h.coordinator.confirm(h.company_id, first).unwrap();
    let err = h.coordinator.confirm(h.company_id, second).unwrap_err();
    assert!(err.is_transient());
    // The conflicted proposal is still proposed, not rejected.
    assert_eq!(h.status(second), ReconciliationStatus::Proposed);

    // Recovery: reject, reopen, process again against fresh balances.
    h.coordinator
        .reject(h.company_id, second, "stale proposal after conflict")
        .unwrap();
    h.coordinator.reopen(h.company_id, second).unwrap();
    assert_eq!(h.status(second), ReconciliationStatus::Reopened);

    let Outcome::Proposed {
        reconciliation_id: third,
        ..
    } = h.coordinator.process(h.company_id, &tx2).unwrap()
    else {
        panic!("expected a fresh proposal");
    };
    let payments = h.coordinator.confirm(h.company_id, third).unwrap();
    // Fresh proposal allocates against the refreshed outstanding (400.00).
    assert_eq!(payments[0].amount, 400_00);
}

#[test]
fn commit_replay_is_idempotent() {
    let h = harness();
    h.open_invoice("INV-1", 1_000_00);

    let mut rule = h.definition("target", 10);
    rule.actions = vec![action("match_invoice", json!({"reference": "INV-1"}))];
    h.activate(rule);

    let tx = h.transaction(1_000_00, "PAYMENT");
    let Outcome::Proposed {
        reconciliation_id, ..
    } = h.coordinator.process(h.company_id, &tx).unwrap()
    else {
        panic!("expected proposal");
    };
    let reconciliation = h
        .reconciliations
        .get(h.company_id, reconciliation_id)
        .unwrap();

    // Drive the allocator directly twice with the same proposal, as a
    // retried commit would after a crash between payments and confirmation.
    let allocator = SplitAllocator::new(h.invoices.clone(), h.accounts.clone());
    let now = Utc::now();
    let first = allocator.commit(&reconciliation, now).unwrap();
    let second = allocator.commit(&reconciliation, now + Duration::seconds(5)).unwrap();

    assert_eq!(first, second);
    assert_eq!(h.invoices.payments(h.company_id).len(), 1);
    assert_eq!(h.bank_balance(), 11_000_00);
}

#[test]
fn transaction_cannot_be_processed_twice_while_live() {
    let h = harness();
    h.open_invoice("INV-1", 1_000_00);
    let mut rule = h.definition("target", 10);
    rule.actions = vec![action("match_invoice", json!({"reference": "INV-1"}))];
    h.activate(rule);

    let tx = h.transaction(1_000_00, "PAYMENT");
    h.coordinator.process(h.company_id, &tx).unwrap();
    let err = h.coordinator.process(h.company_id, &tx).unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
}

#[test]
fn company_boundary_is_checked_at_the_api() {
    let h = harness();
    let other_company = CompanyId::new();
    let tx = h.transaction(100_00, "PAYMENT");
    let err = h.coordinator.process(other_company, &tx).unwrap_err();
    assert!(matches!(err, DomainError::InvariantViolation(_)));
}

#[test]
fn heuristic_matching_settles_the_amount_matched_invoice() {
    let h = harness_with_policy(MatchPolicy {
        amount_tolerance: 1_00,
        ..MatchPolicy::default()
    });
    h.open_invoice("INV-NEAR", 1_000_00);
    h.open_invoice("INV-FAR", 5_000_00);

    let mut rule = h.definition("auto match", 10);
    rule.conditions = vec![condition("transaction_kind", "equals", json!("credit"))];
    rule.actions = vec![action("match_invoice", json!({}))];
    h.activate(rule);

    let tx = h.transaction(1_000_00, "INCOMING");
    let Outcome::Proposed {
        reconciliation_id, ..
    } = h.coordinator.process(h.company_id, &tx).unwrap()
    else {
        panic!("expected proposal");
    };

    let payments = h.coordinator.confirm(h.company_id, reconciliation_id).unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, 1_000_00);
}
