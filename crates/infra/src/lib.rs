//! Infrastructure layer: collaborator stores, the split allocator, and the
//! reconciliation coordinator.
//!
//! Store traits make no storage assumptions; the in-memory implementations
//! here are the tests/dev reference, with SQL backends slotting in behind the
//! same contracts.

pub mod allocator;
pub mod bank_accounts;
pub mod coordinator;
pub mod error;
pub mod invoice_ledger;
pub mod reconciliations;

pub use allocator::SplitAllocator;
pub use bank_accounts::{BankAccountStore, InMemoryBankAccounts};
pub use coordinator::{Outcome, ReconciliationCoordinator};
pub use error::AllocationError;
pub use invoice_ledger::{InMemoryInvoiceLedger, InvoiceLedger, PaymentClaim};
pub use reconciliations::{InMemoryReconciliationStore, ReconciliationStore};

#[cfg(test)]
mod integration_tests;
