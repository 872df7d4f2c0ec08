//! Bank account balance tracking with exactly-once advancement.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use bankforge_banking::{BankAccount, BankAccountId, TransactionId};
use bankforge_core::{CompanyId, DomainError};

use crate::error::AllocationError;

/// Company-scoped bank account storage.
///
/// `advance_once` is commutative (plain addition), so it needs no
/// coordination with the invoice commit - only the exactly-once guarantee,
/// which is keyed by transaction id: however many splits a transaction
/// produced and however often a commit is retried, the balance moves once.
pub trait BankAccountStore: Send + Sync {
    fn current_balance(&self, company_id: CompanyId, account_id: BankAccountId) -> Option<i64>;

    /// Advance the account's balance by `amount`, once per `transaction_id`.
    ///
    /// Returns the balance after the call; a replay returns the unchanged
    /// balance.
    fn advance_once(
        &self,
        company_id: CompanyId,
        account_id: BankAccountId,
        transaction_id: TransactionId,
        amount: i64,
    ) -> Result<i64, AllocationError>;
}

#[derive(Debug)]
struct AccountEntry {
    account: BankAccount,
    applied: HashSet<TransactionId>,
}

/// In-memory bank account store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryBankAccounts {
    accounts: RwLock<HashMap<(CompanyId, BankAccountId), AccountEntry>>,
}

impl InMemoryBankAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, account: BankAccount) {
        let mut accounts = self.accounts.write().expect("bank account lock poisoned");
        accounts.insert(
            (account.company_id, account.id),
            AccountEntry {
                account,
                applied: HashSet::new(),
            },
        );
    }
}

impl BankAccountStore for InMemoryBankAccounts {
    fn current_balance(&self, company_id: CompanyId, account_id: BankAccountId) -> Option<i64> {
        let accounts = self.accounts.read().expect("bank account lock poisoned");
        accounts
            .get(&(company_id, account_id))
            .map(|entry| entry.account.current_balance)
    }

    fn advance_once(
        &self,
        company_id: CompanyId,
        account_id: BankAccountId,
        transaction_id: TransactionId,
        amount: i64,
    ) -> Result<i64, AllocationError> {
        let mut accounts = self.accounts.write().expect("bank account lock poisoned");
        let entry = accounts
            .get_mut(&(company_id, account_id))
            .ok_or(AllocationError::AccountNotFound { account_id })?;

        if entry.applied.contains(&transaction_id) {
            return Ok(entry.account.current_balance);
        }

        let advanced = entry
            .account
            .current_balance
            .checked_add(amount)
            .ok_or_else(|| {
                AllocationError::Domain(DomainError::invariant("bank balance overflow"))
            })?;
        entry.account.current_balance = advanced;
        entry.applied.insert(transaction_id);
        Ok(advanced)
    }
}
