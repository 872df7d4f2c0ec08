//! Reconciliation record storage.

use std::collections::HashMap;
use std::sync::RwLock;

use bankforge_banking::TransactionId;
use bankforge_core::CompanyId;
use bankforge_reconciliation::{Reconciliation, ReconciliationId, ReconciliationStatus};

/// Company-scoped reconciliation storage, queryable by status and
/// transaction.
pub trait ReconciliationStore: Send + Sync {
    fn get(&self, company_id: CompanyId, id: ReconciliationId) -> Option<Reconciliation>;

    fn put(&self, company_id: CompanyId, reconciliation: Reconciliation);

    /// All reconciliations in `status`, ordered by id for reproducible
    /// batch review.
    fn by_status(&self, company_id: CompanyId, status: ReconciliationStatus)
    -> Vec<Reconciliation>;

    /// The live (non-reopened) reconciliation of a transaction, if any.
    fn for_transaction(
        &self,
        company_id: CompanyId,
        transaction_id: TransactionId,
    ) -> Option<Reconciliation>;
}

/// In-memory reconciliation store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryReconciliationStore {
    records: RwLock<HashMap<(CompanyId, ReconciliationId), Reconciliation>>,
}

impl InMemoryReconciliationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReconciliationStore for InMemoryReconciliationStore {
    fn get(&self, company_id: CompanyId, id: ReconciliationId) -> Option<Reconciliation> {
        let records = self.records.read().expect("reconciliation lock poisoned");
        records.get(&(company_id, id)).cloned()
    }

    fn put(&self, company_id: CompanyId, reconciliation: Reconciliation) {
        let mut records = self.records.write().expect("reconciliation lock poisoned");
        records.insert((company_id, reconciliation.id_typed()), reconciliation);
    }

    fn by_status(
        &self,
        company_id: CompanyId,
        status: ReconciliationStatus,
    ) -> Vec<Reconciliation> {
        let records = self.records.read().expect("reconciliation lock poisoned");
        let mut matching: Vec<Reconciliation> = records
            .iter()
            .filter(|((company, _), record)| *company == company_id && record.status() == status)
            .map(|(_, record)| record.clone())
            .collect();
        matching.sort_by_key(Reconciliation::id_typed);
        matching
    }

    fn for_transaction(
        &self,
        company_id: CompanyId,
        transaction_id: TransactionId,
    ) -> Option<Reconciliation> {
        let records = self.records.read().expect("reconciliation lock poisoned");
        records
            .iter()
            .filter(|((company, _), record)| {
                *company == company_id
                    && record.transaction_id() == Some(transaction_id)
                    && record.status() != ReconciliationStatus::Reopened
            })
            .map(|(_, record)| record.clone())
            .next()
    }
}
