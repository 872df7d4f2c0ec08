use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bankforge_core::{AggregateId, CompanyId};

use crate::account::BankAccountId;

/// Bank transaction identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub AggregateId);

impl TransactionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Direction of a transaction, derived from the sign of its amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Incoming money (positive amount).
    Credit,
    /// Outgoing money (negative amount).
    Debit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Credit => "credit",
            TransactionKind::Debit => "debit",
        }
    }
}

/// An imported bank transaction.
///
/// Supplied by the bank import subsystem and **immutable once imported** - the
/// reconciliation pipeline only reads it. Amounts are signed minor units
/// (cents); positive is a credit, negative a debit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: TransactionId,
    pub company_id: CompanyId,
    pub bank_account_id: BankAccountId,
    /// Signed amount in smallest currency unit.
    pub amount: i64,
    /// ISO currency code (e.g. "EUR").
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
    pub description: String,
    /// Free-text bank reference (end-to-end id, remittance info).
    pub reference: Option<String>,
}

impl BankTransaction {
    pub fn kind(&self) -> TransactionKind {
        if self.amount >= 0 {
            TransactionKind::Credit
        } else {
            TransactionKind::Debit
        }
    }

    pub fn is_credit(&self) -> bool {
        self.kind() == TransactionKind::Credit
    }

    pub fn is_debit(&self) -> bool {
        self.kind() == TransactionKind::Debit
    }

    /// Magnitude of the amount in minor units.
    ///
    /// Saturates on `i64::MIN` rather than wrapping; imported amounts never
    /// reach that range in practice.
    pub fn absolute_amount(&self) -> i64 {
        self.amount.saturating_abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankforge_core::AggregateId;

    fn test_transaction(amount: i64) -> BankTransaction {
        BankTransaction {
            id: TransactionId::new(AggregateId::new()),
            company_id: CompanyId::new(),
            bank_account_id: BankAccountId::new(AggregateId::new()),
            amount,
            currency: "EUR".to_string(),
            occurred_at: Utc::now(),
            description: "SEPA CREDIT".to_string(),
            reference: None,
        }
    }

    #[test]
    fn sign_determines_kind() {
        assert_eq!(test_transaction(1_500_00).kind(), TransactionKind::Credit);
        assert_eq!(test_transaction(-300_00).kind(), TransactionKind::Debit);
        assert!(test_transaction(0).is_credit());
    }

    #[test]
    fn absolute_amount_strips_sign() {
        assert_eq!(test_transaction(-300_00).absolute_amount(), 300_00);
        assert_eq!(test_transaction(300_00).absolute_amount(), 300_00);
    }
}
