//! `bankforge-banking` - bank accounts and imported bank transactions.
//!
//! Transactions arrive from the statement-import subsystem and are immutable
//! here; accounts carry the running balance the reconciliation commit advances.

pub mod account;
pub mod transaction;

pub use account::{BankAccount, BankAccountId};
pub use transaction::{BankTransaction, TransactionId, TransactionKind};
