use serde::{Deserialize, Serialize};

use bankforge_core::{AggregateId, CompanyId, Entity};

/// Bank account identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BankAccountId(pub AggregateId);

impl BankAccountId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BankAccountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A company bank account with its running balance.
///
/// `current_balance` advances by the transaction amount exactly once per
/// committed transaction; the store enforces the exactly-once part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: BankAccountId,
    pub company_id: CompanyId,
    pub name: String,
    /// ISO currency code of the account.
    pub currency: String,
    /// Running balance in smallest currency unit.
    pub current_balance: i64,
}

impl Entity for BankAccount {
    type Id = BankAccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
