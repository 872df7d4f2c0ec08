//! Invoice store contract and its in-memory reference implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use bankforge_core::{Aggregate, AggregateId, AggregateRoot, CompanyId, ExpectedVersion};
use bankforge_invoicing::{
    Invoice, InvoiceCommand, InvoiceId, OpenInvoice, OpenInvoiceCmd, Payment, PaymentId,
    PaymentSource, RegisterPayment,
};

use crate::error::AllocationError;

/// One split's demand on an invoice at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentClaim {
    pub invoice_id: InvoiceId,
    /// Positive amount in smallest currency unit.
    pub amount: i64,
    /// Invoice version captured when the proposal was built.
    pub expected_version: ExpectedVersion,
    /// Idempotency key: replaying a claim returns the existing payment.
    pub source: PaymentSource,
    pub paid_at: DateTime<Utc>,
}

/// Company-scoped invoice storage.
///
/// ## Commit Semantics
///
/// `apply_allocation` is the serialization point of the whole subsystem. It
/// must, atomically per call:
///
/// - re-read every claimed invoice and check the claim's `expected_version`
///   against it (stale version -> `ConcurrentConflict`, nothing persisted)
/// - re-check outstanding balance >= claim amount (`BalanceInsufficient`)
/// - apply all payments or none
/// - treat a claim whose `source` already has a payment as a replay,
///   returning the existing payment instead of creating a second one
///
/// Rule evaluation and proposal building stay lock-free; this is the only
/// place that needs per-invoice mutual exclusion.
pub trait InvoiceLedger: Send + Sync {
    /// Snapshot of invoices that can currently accept payments.
    fn open_invoices(&self, company_id: CompanyId) -> Vec<OpenInvoice>;

    /// Outstanding balance of one invoice, if it exists for this company.
    fn outstanding(&self, company_id: CompanyId, invoice_id: InvoiceId) -> Option<i64>;

    /// Validate and apply a batch of payment claims, all-or-nothing.
    ///
    /// Returned payments align with `claims`.
    fn apply_allocation(
        &self,
        company_id: CompanyId,
        claims: &[PaymentClaim],
    ) -> Result<Vec<Payment>, AllocationError>;
}

#[derive(Debug, Default)]
struct Ledger {
    invoices: HashMap<(CompanyId, InvoiceId), Invoice>,
    payments: HashMap<(CompanyId, PaymentSource), Payment>,
}

/// In-memory invoice ledger.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryInvoiceLedger {
    inner: RwLock<Ledger>,
}

impl InMemoryInvoiceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an invoice and return its id.
    pub fn open(
        &self,
        company_id: CompanyId,
        reference: &str,
        total_amount: i64,
        due_date: DateTime<Utc>,
    ) -> Result<InvoiceId, AllocationError> {
        let invoice_id = InvoiceId::new(AggregateId::new());
        let mut invoice = Invoice::empty(invoice_id);
        let events = invoice.handle(&InvoiceCommand::OpenInvoice(OpenInvoiceCmd {
            company_id,
            invoice_id,
            reference: reference.to_string(),
            total_amount,
            due_date,
            occurred_at: Utc::now(),
        }))?;
        for event in &events {
            invoice.apply(event);
        }

        let mut ledger = self.inner.write().expect("invoice ledger lock poisoned");
        ledger.invoices.insert((company_id, invoice_id), invoice);
        Ok(invoice_id)
    }

    /// All payments recorded for a company, in no particular order.
    pub fn payments(&self, company_id: CompanyId) -> Vec<Payment> {
        let ledger = self.inner.read().expect("invoice ledger lock poisoned");
        ledger
            .payments
            .iter()
            .filter(|((company, _), _)| *company == company_id)
            .map(|(_, payment)| payment.clone())
            .collect()
    }
}

impl InvoiceLedger for InMemoryInvoiceLedger {
    fn open_invoices(&self, company_id: CompanyId) -> Vec<OpenInvoice> {
        let ledger = self.inner.read().expect("invoice ledger lock poisoned");
        let mut snapshots: Vec<OpenInvoice> = ledger
            .invoices
            .iter()
            .filter(|((company, _), _)| *company == company_id)
            .filter_map(|(_, invoice)| invoice.open_snapshot())
            .collect();
        // Deterministic order for matching.
        snapshots.sort_by_key(|snapshot| snapshot.invoice_id);
        snapshots
    }

    fn outstanding(&self, company_id: CompanyId, invoice_id: InvoiceId) -> Option<i64> {
        let ledger = self.inner.read().expect("invoice ledger lock poisoned");
        ledger
            .invoices
            .get(&(company_id, invoice_id))
            .map(Invoice::outstanding_amount)
    }

    fn apply_allocation(
        &self,
        company_id: CompanyId,
        claims: &[PaymentClaim],
    ) -> Result<Vec<Payment>, AllocationError> {
        let mut ledger = self.inner.write().expect("invoice ledger lock poisoned");

        // Phase 1: validate every claim against current state. Nothing is
        // written until the whole batch passes.
        enum Planned {
            Replay(Payment),
            Fresh,
        }

        let mut plan: Vec<Planned> = Vec::with_capacity(claims.len());
        for claim in claims {
            if let Some(existing) = ledger.payments.get(&(company_id, claim.source)) {
                plan.push(Planned::Replay(existing.clone()));
                continue;
            }

            let invoice = ledger
                .invoices
                .get(&(company_id, claim.invoice_id))
                .ok_or(AllocationError::InvoiceNotFound {
                    invoice_id: claim.invoice_id,
                })?;

            if !claim.expected_version.matches(invoice.version()) {
                return Err(AllocationError::ConcurrentConflict {
                    invoice_id: claim.invoice_id,
                });
            }

            let outstanding = invoice.outstanding_amount();
            if outstanding < claim.amount {
                return Err(AllocationError::BalanceInsufficient {
                    invoice_id: claim.invoice_id,
                    outstanding,
                    requested: claim.amount,
                });
            }

            plan.push(Planned::Fresh);
        }

        // Phase 2: compute updated invoices on clones, still without
        // mutating the ledger, so a late domain error loses nothing.
        let mut updates: Vec<(InvoiceId, Invoice, Payment)> = Vec::new();
        let mut results: Vec<Payment> = Vec::with_capacity(claims.len());

        for (claim, planned) in claims.iter().zip(plan) {
            match planned {
                Planned::Replay(payment) => results.push(payment),
                Planned::Fresh => {
                    let mut invoice = ledger
                        .invoices
                        .get(&(company_id, claim.invoice_id))
                        .cloned()
                        .ok_or(AllocationError::InvoiceNotFound {
                            invoice_id: claim.invoice_id,
                        })?;
                    let events =
                        invoice.handle(&InvoiceCommand::RegisterPayment(RegisterPayment {
                            company_id,
                            invoice_id: claim.invoice_id,
                            amount: claim.amount,
                            occurred_at: claim.paid_at,
                        }))?;
                    for event in &events {
                        invoice.apply(event);
                    }

                    let payment = Payment {
                        id: PaymentId::new(AggregateId::new()),
                        company_id,
                        invoice_id: claim.invoice_id,
                        amount: claim.amount,
                        paid_at: claim.paid_at,
                        source: claim.source,
                    };
                    results.push(payment.clone());
                    updates.push((claim.invoice_id, invoice, payment));
                }
            }
        }

        // Phase 3: write everything back.
        for (invoice_id, invoice, payment) in updates {
            ledger.invoices.insert((company_id, invoice_id), invoice);
            ledger
                .payments
                .insert((company_id, payment.source), payment);
        }

        Ok(results)
    }
}
