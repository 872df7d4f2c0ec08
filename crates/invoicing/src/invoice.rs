use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bankforge_core::{Aggregate, AggregateId, AggregateRoot, CompanyId, DomainError, Event};

/// Invoice identifier (company-scoped via `company_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Invoice status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Open,
    Paid,
    Void,
}

/// Read-only snapshot of a payable invoice.
///
/// The action executor matches against these; `version` is carried into split
/// proposals and re-checked by the commit path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInvoice {
    pub invoice_id: InvoiceId,
    pub reference: String,
    /// Outstanding balance in smallest currency unit.
    pub outstanding: i64,
    pub due_date: DateTime<Utc>,
    pub version: u64,
}

/// Aggregate root: Invoice.
///
/// Carries only what reconciliation needs - totals and payments. Line items,
/// taxes, and numbering live with the invoicing product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    company_id: Option<CompanyId>,
    /// Human-facing invoice number (e.g. "INV-2041"), used by explicit
    /// rule selectors.
    reference: String,
    status: InvoiceStatus,
    due_date: Option<DateTime<Utc>>,
    total_amount: i64,
    total_paid: i64,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            company_id: None,
            reference: String::new(),
            status: InvoiceStatus::Open,
            due_date: None,
            total_amount: 0,
            total_paid: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.company_id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn total_amount(&self) -> i64 {
        self.total_amount
    }

    pub fn total_paid(&self) -> i64 {
        self.total_paid
    }

    pub fn outstanding_amount(&self) -> i64 {
        (self.total_amount - self.total_paid).max(0)
    }

    /// Invariant: cannot pay a void or settled invoice.
    pub fn can_accept_payment(&self) -> bool {
        self.status != InvoiceStatus::Void && self.outstanding_amount() > 0
    }

    /// Snapshot for matching, or `None` when the invoice cannot take payments.
    pub fn open_snapshot(&self) -> Option<OpenInvoice> {
        if !self.created || !self.can_accept_payment() {
            return None;
        }
        Some(OpenInvoice {
            invoice_id: self.id,
            reference: self.reference.clone(),
            outstanding: self.outstanding_amount(),
            due_date: self.due_date.unwrap_or_default(),
            version: self.version,
        })
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInvoiceCmd {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub reference: String,
    /// Total in smallest currency unit.
    pub total_amount: i64,
    pub due_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    /// Payment amount in smallest currency unit.
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: VoidInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidInvoice {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    OpenInvoice(OpenInvoiceCmd),
    RegisterPayment(RegisterPayment),
    VoidInvoice(VoidInvoice),
}

/// Event: InvoiceOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceOpened {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub reference: String,
    pub total_amount: i64,
    pub due_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub amount: i64,
    pub new_total_paid: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceVoided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceVoided {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceOpened(InvoiceOpened),
    PaymentRegistered(PaymentRegistered),
    InvoiceVoided(InvoiceVoided),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceOpened(_) => "invoicing.invoice.opened",
            InvoiceEvent::PaymentRegistered(_) => "invoicing.invoice.payment_registered",
            InvoiceEvent::InvoiceVoided(_) => "invoicing.invoice.voided",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceOpened(e) => e.occurred_at,
            InvoiceEvent::PaymentRegistered(e) => e.occurred_at,
            InvoiceEvent::InvoiceVoided(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceOpened(e) => {
                self.id = e.invoice_id;
                self.company_id = Some(e.company_id);
                self.reference = e.reference.clone();
                self.due_date = Some(e.due_date);
                self.total_amount = e.total_amount;
                self.total_paid = 0;
                self.status = InvoiceStatus::Open;
                self.created = true;
            }
            InvoiceEvent::PaymentRegistered(e) => {
                self.total_paid = e.new_total_paid;
                if self.total_paid >= self.total_amount {
                    self.status = InvoiceStatus::Paid;
                }
            }
            InvoiceEvent::InvoiceVoided(_) => {
                self.status = InvoiceStatus::Void;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::OpenInvoice(cmd) => self.handle_open(cmd),
            InvoiceCommand::RegisterPayment(cmd) => self.handle_register_payment(cmd),
            InvoiceCommand::VoidInvoice(cmd) => self.handle_void(cmd),
        }
    }
}

impl Invoice {
    fn ensure_company(&self, company_id: CompanyId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.company_id != Some(company_id) {
            return Err(DomainError::invariant("company mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenInvoiceCmd) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }
        if cmd.reference.trim().is_empty() {
            return Err(DomainError::validation("invoice reference must not be empty"));
        }
        if cmd.total_amount <= 0 {
            return Err(DomainError::validation("invoice total must be positive"));
        }

        Ok(vec![InvoiceEvent::InvoiceOpened(InvoiceOpened {
            company_id: cmd.company_id,
            invoice_id: cmd.invoice_id,
            reference: cmd.reference.clone(),
            total_amount: cmd.total_amount,
            due_date: cmd.due_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register_payment(
        &self,
        cmd: &RegisterPayment,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;

        if !self.can_accept_payment() {
            return Err(DomainError::invariant(
                "cannot register payment on void or fully paid invoice",
            ));
        }

        if cmd.amount <= 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        let new_total_paid = self
            .total_paid
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::invariant("payment total overflow"))?;

        if new_total_paid > self.total_amount {
            return Err(DomainError::invariant("cannot overpay invoice"));
        }

        Ok(vec![InvoiceEvent::PaymentRegistered(PaymentRegistered {
            company_id: cmd.company_id,
            invoice_id: cmd.invoice_id,
            amount: cmd.amount,
            new_total_paid,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_void(&self, cmd: &VoidInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(cmd.company_id)?;

        if self.status == InvoiceStatus::Void {
            return Err(DomainError::conflict("invoice is already void"));
        }

        Ok(vec![InvoiceEvent::InvoiceVoided(InvoiceVoided {
            company_id: cmd.company_id,
            invoice_id: cmd.invoice_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankforge_core::AggregateId;

    fn test_company_id() -> CompanyId {
        CompanyId::new()
    }

    fn test_invoice_id() -> InvoiceId {
        InvoiceId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn opened_invoice(company_id: CompanyId, total: i64) -> Invoice {
        let invoice_id = test_invoice_id();
        let mut invoice = Invoice::empty(invoice_id);
        let cmd = OpenInvoiceCmd {
            company_id,
            invoice_id,
            reference: "INV-1001".to_string(),
            total_amount: total,
            due_date: test_time(),
            occurred_at: test_time(),
        };
        let events = invoice.handle(&InvoiceCommand::OpenInvoice(cmd)).unwrap();
        invoice.apply(&events[0]);
        invoice
    }

    #[test]
    fn open_invoice_emits_opened_event() {
        let company_id = test_company_id();
        let invoice = opened_invoice(company_id, 200_00);

        assert_eq!(invoice.status(), InvoiceStatus::Open);
        assert_eq!(invoice.total_amount(), 200_00);
        assert_eq!(invoice.outstanding_amount(), 200_00);
        assert_eq!(invoice.reference(), "INV-1001");
        assert_eq!(invoice.version(), 1);
    }

    #[test]
    fn partial_payment_keeps_invoice_open() {
        let company_id = test_company_id();
        let mut invoice = opened_invoice(company_id, 200_00);

        let cmd = RegisterPayment {
            company_id,
            invoice_id: invoice.id_typed(),
            amount: 50_00,
            occurred_at: test_time(),
        };
        let events = invoice
            .handle(&InvoiceCommand::RegisterPayment(cmd))
            .unwrap();
        invoice.apply(&events[0]);

        assert_eq!(invoice.status(), InvoiceStatus::Open);
        assert_eq!(invoice.outstanding_amount(), 150_00);
    }

    #[test]
    fn paying_to_total_marks_invoice_paid() {
        let company_id = test_company_id();
        let mut invoice = opened_invoice(company_id, 200_00);

        let cmd = RegisterPayment {
            company_id,
            invoice_id: invoice.id_typed(),
            amount: 200_00,
            occurred_at: test_time(),
        };
        let events = invoice
            .handle(&InvoiceCommand::RegisterPayment(cmd))
            .unwrap();
        invoice.apply(&events[0]);

        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert_eq!(invoice.outstanding_amount(), 0);
        assert!(invoice.open_snapshot().is_none());
    }

    #[test]
    fn cannot_overpay_invoice() {
        let company_id = test_company_id();
        let invoice = opened_invoice(company_id, 200_00);

        let cmd = RegisterPayment {
            company_id,
            invoice_id: invoice.id_typed(),
            amount: 200_01,
            occurred_at: test_time(),
        };
        let err = invoice
            .handle(&InvoiceCommand::RegisterPayment(cmd))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("cannot overpay invoice") => {}
            other => panic!("expected overpay invariant violation, got {other:?}"),
        }
    }

    #[test]
    fn cannot_pay_void_invoice() {
        let company_id = test_company_id();
        let mut invoice = opened_invoice(company_id, 200_00);

        let cmd_void = VoidInvoice {
            company_id,
            invoice_id: invoice.id_typed(),
            reason: Some("customer dispute".to_string()),
            occurred_at: test_time(),
        };
        let events = invoice.handle(&InvoiceCommand::VoidInvoice(cmd_void)).unwrap();
        invoice.apply(&events[0]);
        assert_eq!(invoice.status(), InvoiceStatus::Void);

        let cmd_pay = RegisterPayment {
            company_id,
            invoice_id: invoice.id_typed(),
            amount: 50_00,
            occurred_at: test_time(),
        };
        let err = invoice
            .handle(&InvoiceCommand::RegisterPayment(cmd_pay))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn snapshot_carries_version_for_commit_checks() {
        let company_id = test_company_id();
        let mut invoice = opened_invoice(company_id, 300_00);
        let snap = invoice.open_snapshot().unwrap();
        assert_eq!(snap.outstanding, 300_00);
        assert_eq!(snap.version, 1);

        let cmd = RegisterPayment {
            company_id,
            invoice_id: invoice.id_typed(),
            amount: 100_00,
            occurred_at: test_time(),
        };
        let events = invoice
            .handle(&InvoiceCommand::RegisterPayment(cmd))
            .unwrap();
        invoice.apply(&events[0]);

        // A payment bumps the version; a stale snapshot no longer matches.
        let refreshed = invoice.open_snapshot().unwrap();
        assert_eq!(refreshed.version, 2);
        assert_ne!(snap.version, refreshed.version);
    }
}
