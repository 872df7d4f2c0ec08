use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bankforge_banking::TransactionId;
use bankforge_core::{AggregateId, CompanyId, Entity};

use crate::invoice::InvoiceId;

/// Payment identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub AggregateId);

impl PaymentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Where a payment came from.
///
/// One bank transaction may fund several invoices (split allocation), so the
/// idempotency key is the (transaction, invoice) pair: replaying a commit finds
/// the existing payment instead of creating a second one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentSource {
    pub transaction_id: TransactionId,
    pub invoice_id: InvoiceId,
}

/// A payment applied to an invoice by a confirmed reconciliation split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    /// Amount in smallest currency unit, always positive.
    pub amount: i64,
    pub paid_at: DateTime<Utc>,
    pub source: PaymentSource,
}

impl Entity for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankforge_core::AggregateId;

    #[test]
    fn source_keys_differ_per_invoice_of_the_same_transaction() {
        let tx = TransactionId::new(AggregateId::new());
        let a = PaymentSource {
            transaction_id: tx,
            invoice_id: InvoiceId::new(AggregateId::new()),
        };
        let b = PaymentSource {
            transaction_id: tx,
            invoice_id: InvoiceId::new(AggregateId::new()),
        };
        assert_ne!(a, b);
    }
}
