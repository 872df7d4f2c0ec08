//! The split allocator: validate a proposed allocation and commit it.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use bankforge_core::{DomainError, ExpectedVersion};
use bankforge_invoicing::{Payment, PaymentSource};
use bankforge_reconciliation::{Reconciliation, ReconciliationStatus};

use crate::bank_accounts::BankAccountStore;
use crate::error::AllocationError;
use crate::invoice_ledger::{InvoiceLedger, PaymentClaim};

/// Commits proposed allocations as payments plus a bank balance advance.
///
/// The commit is keyed by the reconciliation's transaction: payments are
/// idempotent per (transaction, invoice) and the balance advance is
/// idempotent per transaction, so retrying a commit that failed half-way
/// never double-creates payments or double-advances the balance.
pub struct SplitAllocator {
    invoices: Arc<dyn InvoiceLedger>,
    accounts: Arc<dyn BankAccountStore>,
}

impl SplitAllocator {
    pub fn new(invoices: Arc<dyn InvoiceLedger>, accounts: Arc<dyn BankAccountStore>) -> Self {
        Self { invoices, accounts }
    }

    /// Validate and commit one proposed reconciliation.
    ///
    /// Re-runs the money-conservation checks (they were enforced at
    /// proposal, but commit trusts nothing it did not read itself), then
    /// applies all payment claims atomically and advances the bank balance
    /// exactly once for the transaction. Any error means nothing was
    /// persisted by this call.
    pub fn commit(
        &self,
        reconciliation: &Reconciliation,
        paid_at: DateTime<Utc>,
    ) -> Result<Vec<Payment>, AllocationError> {
        if reconciliation.status() != ReconciliationStatus::Proposed {
            return Err(AllocationError::Domain(DomainError::transition(
                reconciliation.status().as_str(),
                ReconciliationStatus::Confirmed.as_str(),
            )));
        }

        let company_id = reconciliation
            .company_id()
            .ok_or_else(|| DomainError::invariant("reconciliation without company"))?;
        let bank_account_id = reconciliation
            .bank_account_id()
            .ok_or_else(|| DomainError::invariant("reconciliation without bank account"))?;
        let transaction_id = reconciliation
            .transaction_id()
            .ok_or_else(|| DomainError::invariant("reconciliation without transaction"))?;

        let transaction_amount = reconciliation.transaction_amount();
        if transaction_amount <= 0 {
            return Err(AllocationError::exceeds(
                "debit transaction cannot fund invoice allocations",
            ));
        }
        if reconciliation.matched_amount() > transaction_amount.saturating_abs() {
            return Err(AllocationError::exceeds(format!(
                "matched amount {} exceeds transaction amount {}",
                reconciliation.matched_amount(),
                transaction_amount.saturating_abs()
            )));
        }
        if reconciliation.split_total() > reconciliation.matched_amount() {
            return Err(AllocationError::exceeds(format!(
                "split total {} exceeds matched amount {}",
                reconciliation.split_total(),
                reconciliation.matched_amount()
            )));
        }

        // The account is looked up before payments are applied so the
        // advance afterwards cannot fail on a missing account.
        if self
            .accounts
            .current_balance(company_id, bank_account_id)
            .is_none()
        {
            return Err(AllocationError::AccountNotFound {
                account_id: bank_account_id,
            });
        }

        let claims: Vec<PaymentClaim> = reconciliation
            .splits()
            .iter()
            .map(|split| PaymentClaim {
                invoice_id: split.invoice_id,
                amount: split.allocated_amount,
                expected_version: ExpectedVersion::Exact(split.invoice_version),
                source: PaymentSource {
                    transaction_id,
                    invoice_id: split.invoice_id,
                },
                paid_at,
            })
            .collect();

        let payments = self.invoices.apply_allocation(company_id, &claims)?;

        let balance = self.accounts.advance_once(
            company_id,
            bank_account_id,
            transaction_id,
            transaction_amount,
        )?;

        tracing::info!(
            reconciliation_id = %reconciliation.id_typed(),
            transaction_id = %transaction_id,
            payment_count = payments.len(),
            bank_balance = balance,
            "allocation committed"
        );

        Ok(payments)
    }
}
