//! Per-transaction orchestration of the reconciliation pipeline.

use std::sync::Arc;

use chrono::Utc;

use bankforge_banking::BankTransaction;
use bankforge_core::{Aggregate, AggregateId, CompanyId, DomainError};
use bankforge_invoicing::Payment;
use bankforge_reconciliation::{
    ConfirmAllocation, Disposition, MatchPolicy, PostReconciliation, ProposeAllocation,
    Reconciliation, ReconciliationCommand, ReconciliationId, RejectProposal, ReopenProposal,
    execute_actions,
};
use bankforge_rules::{RuleId, RuleStore, select_rule};

use crate::allocator::SplitAllocator;
use crate::bank_accounts::BankAccountStore;
use crate::error::AllocationError;
use crate::invoice_ledger::InvoiceLedger;
use crate::reconciliations::ReconciliationStore;

/// What processing one transaction produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A rule marked the transaction reviewed; no reconciliation.
    Ignored { rule_id: RuleId },
    /// A rule tagged the transaction for reporting; no reconciliation.
    Categorized { rule_id: RuleId, category: String },
    /// A proposed reconciliation is waiting for confirmation.
    Proposed {
        reconciliation_id: ReconciliationId,
        category: Option<String>,
    },
    /// No rule matched, or the winning rule's allocation did not resolve;
    /// the transaction is left for manual handling.
    Unmatched { reason: Option<String> },
}

/// Drives a transaction through rule selection, action execution, and the
/// reconciliation state machine.
///
/// Every call takes the company id explicitly; it is checked against the
/// records once, here at the boundary.
pub struct ReconciliationCoordinator {
    rules: Arc<dyn RuleStore>,
    invoices: Arc<dyn InvoiceLedger>,
    reconciliations: Arc<dyn ReconciliationStore>,
    allocator: SplitAllocator,
    policy: MatchPolicy,
}

impl ReconciliationCoordinator {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        invoices: Arc<dyn InvoiceLedger>,
        accounts: Arc<dyn BankAccountStore>,
        reconciliations: Arc<dyn ReconciliationStore>,
        policy: MatchPolicy,
    ) -> Self {
        let allocator = SplitAllocator::new(invoices.clone(), accounts);
        Self {
            rules,
            invoices,
            reconciliations,
            allocator,
            policy,
        }
    }

    /// Match one transaction and, when a rule proposes an allocation,
    /// persist the proposal.
    ///
    /// Rule evaluation is pure; nothing locks until a later `confirm`.
    pub fn process(
        &self,
        company_id: CompanyId,
        transaction: &BankTransaction,
    ) -> Result<Outcome, DomainError> {
        if transaction.company_id != company_id {
            return Err(DomainError::invariant(
                "transaction does not belong to this company",
            ));
        }
        if self
            .reconciliations
            .for_transaction(company_id, transaction.id)
            .is_some()
        {
            return Err(DomainError::conflict(
                "transaction is already under reconciliation",
            ));
        }

        let rules = self.rules.active_rules(company_id);
        let Some(rule) = select_rule(&rules, transaction) else {
            tracing::debug!(transaction_id = %transaction.id, "no matching rule");
            return Ok(Outcome::Unmatched { reason: None });
        };

        let open_invoices = self.invoices.open_invoices(company_id);
        match execute_actions(rule, transaction, &open_invoices, &self.policy) {
            Disposition::Ignore => Ok(Outcome::Ignored { rule_id: rule.id }),
            Disposition::Categorize { category } => Ok(Outcome::Categorized {
                rule_id: rule.id,
                category,
            }),
            Disposition::Unmatched { reason } => {
                tracing::warn!(
                    rule_id = %rule.id,
                    transaction_id = %transaction.id,
                    %reason,
                    "rule matched but allocation did not resolve"
                );
                Ok(Outcome::Unmatched {
                    reason: Some(reason),
                })
            }
            Disposition::Allocate(proposal) => {
                let reconciliation_id = ReconciliationId::new(AggregateId::new());
                let mut reconciliation = Reconciliation::empty(reconciliation_id);
                let cmd = ProposeAllocation {
                    company_id,
                    reconciliation_id,
                    bank_account_id: transaction.bank_account_id,
                    transaction_id: transaction.id,
                    transaction_amount: transaction.amount,
                    matched_amount: proposal.matched_amount,
                    splits: proposal.splits,
                    occurred_at: Utc::now(),
                };
                let events =
                    reconciliation.handle(&ReconciliationCommand::ProposeAllocation(cmd))?;
                for event in &events {
                    reconciliation.apply(event);
                }
                self.reconciliations.put(company_id, reconciliation);

                tracing::info!(
                    rule_id = %rule.id,
                    transaction_id = %transaction.id,
                    %reconciliation_id,
                    "allocation proposed"
                );
                Ok(Outcome::Proposed {
                    reconciliation_id,
                    category: proposal.category,
                })
            }
        }
    }

    /// Commit a proposed reconciliation: payments, bank balance, `confirmed`.
    ///
    /// A money-conservation or balance failure rejects the proposal and is
    /// recorded on it; a concurrent conflict leaves it `proposed` so the
    /// caller can re-propose against fresh balances.
    pub fn confirm(
        &self,
        company_id: CompanyId,
        reconciliation_id: ReconciliationId,
    ) -> Result<Vec<Payment>, AllocationError> {
        let mut reconciliation = self
            .reconciliations
            .get(company_id, reconciliation_id)
            .ok_or(DomainError::NotFound)?;

        let now = Utc::now();
        match self.allocator.commit(&reconciliation, now) {
            Ok(payments) => {
                let cmd = ConfirmAllocation {
                    company_id,
                    reconciliation_id,
                    payments: payments.iter().map(|p| p.id).collect(),
                    occurred_at: now,
                };
                let events = reconciliation
                    .handle(&ReconciliationCommand::ConfirmAllocation(cmd))
                    .map_err(AllocationError::Domain)?;
                for event in &events {
                    reconciliation.apply(event);
                }
                self.reconciliations.put(company_id, reconciliation);
                Ok(payments)
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    %reconciliation_id,
                    error = %err,
                    "commit hit concurrent allocation, proposal left intact"
                );
                Err(err)
            }
            Err(err) => {
                tracing::warn!(
                    %reconciliation_id,
                    error = %err,
                    "allocation rejected"
                );
                let cmd = RejectProposal {
                    company_id,
                    reconciliation_id,
                    reason: err.to_string(),
                    occurred_at: now,
                };
                if let Ok(events) =
                    reconciliation.handle(&ReconciliationCommand::RejectProposal(cmd))
                {
                    for event in &events {
                        reconciliation.apply(event);
                    }
                    self.reconciliations.put(company_id, reconciliation);
                }
                Err(err)
            }
        }
    }

    /// Reject a proposed reconciliation with an explicit reason.
    pub fn reject(
        &self,
        company_id: CompanyId,
        reconciliation_id: ReconciliationId,
        reason: impl Into<String>,
    ) -> Result<(), DomainError> {
        let mut reconciliation = self
            .reconciliations
            .get(company_id, reconciliation_id)
            .ok_or(DomainError::NotFound)?;
        let cmd = RejectProposal {
            company_id,
            reconciliation_id,
            reason: reason.into(),
            occurred_at: Utc::now(),
        };
        let events = reconciliation.handle(&ReconciliationCommand::RejectProposal(cmd))?;
        for event in &events {
            reconciliation.apply(event);
        }
        self.reconciliations.put(company_id, reconciliation);
        Ok(())
    }

    /// Close a rejected reconciliation; its transaction is unmatched again
    /// and can be re-processed.
    pub fn reopen(
        &self,
        company_id: CompanyId,
        reconciliation_id: ReconciliationId,
    ) -> Result<(), DomainError> {
        let mut reconciliation = self
            .reconciliations
            .get(company_id, reconciliation_id)
            .ok_or(DomainError::NotFound)?;
        let cmd = ReopenProposal {
            company_id,
            reconciliation_id,
            occurred_at: Utc::now(),
        };
        let events = reconciliation.handle(&ReconciliationCommand::ReopenProposal(cmd))?;
        for event in &events {
            reconciliation.apply(event);
        }
        self.reconciliations.put(company_id, reconciliation);
        Ok(())
    }

    /// Post a confirmed reconciliation for period close. One-way.
    pub fn post(
        &self,
        company_id: CompanyId,
        reconciliation_id: ReconciliationId,
    ) -> Result<(), DomainError> {
        let mut reconciliation = self
            .reconciliations
            .get(company_id, reconciliation_id)
            .ok_or(DomainError::NotFound)?;
        let cmd = PostReconciliation {
            company_id,
            reconciliation_id,
            occurred_at: Utc::now(),
        };
        let events = reconciliation.handle(&ReconciliationCommand::PostReconciliation(cmd))?;
        for event in &events {
            reconciliation.apply(event);
        }
        self.reconciliations.put(company_id, reconciliation);

        tracing::info!(%reconciliation_id, "reconciliation posted");
        Ok(())
    }
}
