use thiserror::Error;

use bankforge_banking::BankAccountId;
use bankforge_core::DomainError;
use bankforge_invoicing::InvoiceId;

/// Allocation commit error.
///
/// These are the failure modes of taking a proposed allocation past
/// `proposed`. Commit failures are transactional: when one of these comes
/// back, nothing was persisted.
///
/// ## Error Categories
///
/// - **ExceedsAvailable**: the proposal itself does not conserve money
///   (split total over matched amount, matched amount over the transaction,
///   or a debit transaction funding allocations)
/// - **BalanceInsufficient**: an invoice's outstanding balance dropped below
///   a split's amount between proposal and commit; re-propose against the
///   refreshed balance
/// - **ConcurrentConflict**: version contention on a shared invoice;
///   transient, retry with fresh balances
/// - **InvoiceNotFound / AccountNotFound**: the proposal references records
///   the company does not have
/// - **Domain**: a domain invariant surfaced during commit
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("allocation exceeds available amount: {detail}")]
    ExceedsAvailable { detail: String },

    #[error(
        "invoice {invoice_id} balance insufficient: outstanding {outstanding}, requested {requested}"
    )]
    BalanceInsufficient {
        invoice_id: InvoiceId,
        outstanding: i64,
        requested: i64,
    },

    #[error("concurrent allocation conflict on invoice {invoice_id}")]
    ConcurrentConflict { invoice_id: InvoiceId },

    #[error("invoice {invoice_id} not found for company")]
    InvoiceNotFound { invoice_id: InvoiceId },

    #[error("bank account {account_id} not found for company")]
    AccountNotFound { account_id: BankAccountId },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl AllocationError {
    pub fn exceeds(detail: impl Into<String>) -> Self {
        Self::ExceedsAvailable {
            detail: detail.into(),
        }
    }

    /// Transient errors are safe to retry once balances are refreshed;
    /// everything else needs a changed proposal.
    pub fn is_transient(&self) -> bool {
        matches!(self, AllocationError::ConcurrentConflict { .. })
    }
}
