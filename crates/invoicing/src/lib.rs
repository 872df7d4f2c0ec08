//! `bankforge-invoicing` - invoices and the payments reconciliation produces.
//!
//! The wider invoicing product owns invoice authoring; this crate carries the
//! slice reconciliation needs: outstanding balances, payment registration, and
//! the idempotent payment records confirmed splits generate.

pub mod invoice;
pub mod payment;

pub use invoice::{
    Invoice, InvoiceCommand, InvoiceEvent, InvoiceId, InvoiceOpened, InvoiceStatus, InvoiceVoided,
    OpenInvoice, OpenInvoiceCmd, PaymentRegistered, RegisterPayment, VoidInvoice,
};
pub use payment::{Payment, PaymentId, PaymentSource};
