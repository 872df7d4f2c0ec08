use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bankforge_banking::{BankAccountId, TransactionId};
use bankforge_core::{
    Aggregate, AggregateId, AggregateRoot, CompanyId, DomainError, Event, ValueObject,
};
use bankforge_invoicing::{InvoiceId, PaymentId};

/// Reconciliation identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReconciliationId(pub AggregateId);

impl ReconciliationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ReconciliationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Reconciliation lifecycle.
///
/// `proposed -> confirmed -> posted`, with `proposed -> rejected` and
/// `rejected -> reopened` as the recovery path. Posting is one-way:
/// correcting a posted reconciliation takes an explicit reversing entry,
/// never an in-place edit. A reopened reconciliation is closed for audit and
/// its transaction is back in the unmatched pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationStatus {
    Proposed,
    Confirmed,
    Posted,
    Rejected,
    Reopened,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Proposed => "proposed",
            ReconciliationStatus::Confirmed => "confirmed",
            ReconciliationStatus::Posted => "posted",
            ReconciliationStatus::Rejected => "rejected",
            ReconciliationStatus::Reopened => "reopened",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconciliationStatus::Posted | ReconciliationStatus::Reopened
        )
    }
}

/// One allocation of a reconciliation to an invoice.
///
/// `invoice_version` is the invoice's version at proposal time; the commit
/// path re-checks it so allocations racing on the same invoice cannot both
/// pass the balance check against a stale read. Splits are immutable once the
/// reconciliation is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSplit {
    pub invoice_id: InvoiceId,
    /// Positive amount in smallest currency unit.
    pub allocated_amount: i64,
    pub invoice_version: u64,
    pub payment_id: Option<PaymentId>,
}

impl ValueObject for ReconciliationSplit {}

/// Aggregate root: Reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    id: ReconciliationId,
    company_id: Option<CompanyId>,
    bank_account_id: Option<BankAccountId>,
    transaction_id: Option<TransactionId>,
    /// Signed amount of the matched transaction, captured at proposal.
    transaction_amount: i64,
    /// The portion of the transaction being allocated.
    matched_amount: i64,
    splits: Vec<ReconciliationSplit>,
    status: ReconciliationStatus,
    rejection_reason: Option<String>,
    version: u64,
    created: bool,
}

impl Reconciliation {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ReconciliationId) -> Self {
        Self {
            id,
            company_id: None,
            bank_account_id: None,
            transaction_id: None,
            transaction_amount: 0,
            matched_amount: 0,
            splits: Vec::new(),
            status: ReconciliationStatus::Proposed,
            rejection_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReconciliationId {
        self.id
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.company_id
    }

    pub fn bank_account_id(&self) -> Option<BankAccountId> {
        self.bank_account_id
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    pub fn transaction_amount(&self) -> i64 {
        self.transaction_amount
    }

    pub fn matched_amount(&self) -> i64 {
        self.matched_amount
    }

    pub fn status(&self) -> ReconciliationStatus {
        self.status
    }

    pub fn splits(&self) -> &[ReconciliationSplit] {
        &self.splits
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn split_total(&self) -> i64 {
        self.splits.iter().map(|s| s.allocated_amount).sum()
    }

    /// The part of `matched_amount` intentionally left unallocated.
    ///
    /// Tracked explicitly: rounding residue from percentage splits lands
    /// here, never silently dropped.
    pub fn unallocated_remainder(&self) -> i64 {
        self.matched_amount - self.split_total()
    }
}

impl AggregateRoot for Reconciliation {
    type Id = ReconciliationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ProposeAllocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposeAllocation {
    pub company_id: CompanyId,
    pub reconciliation_id: ReconciliationId,
    pub bank_account_id: BankAccountId,
    pub transaction_id: TransactionId,
    pub transaction_amount: i64,
    pub matched_amount: i64,
    pub splits: Vec<ReconciliationSplit>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmAllocation.
///
/// `payments` aligns with the proposal's splits, one payment per split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmAllocation {
    pub company_id: CompanyId,
    pub reconciliation_id: ReconciliationId,
    pub payments: Vec<PaymentId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectProposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectProposal {
    pub company_id: CompanyId,
    pub reconciliation_id: ReconciliationId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostReconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReconciliation {
    pub company_id: CompanyId,
    pub reconciliation_id: ReconciliationId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReopenProposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReopenProposal {
    pub company_id: CompanyId,
    pub reconciliation_id: ReconciliationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationCommand {
    ProposeAllocation(ProposeAllocation),
    ConfirmAllocation(ConfirmAllocation),
    RejectProposal(RejectProposal),
    PostReconciliation(PostReconciliation),
    ReopenProposal(ReopenProposal),
}

/// Event: AllocationProposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationProposed {
    pub company_id: CompanyId,
    pub reconciliation_id: ReconciliationId,
    pub bank_account_id: BankAccountId,
    pub transaction_id: TransactionId,
    pub transaction_amount: i64,
    pub matched_amount: i64,
    pub splits: Vec<ReconciliationSplit>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AllocationConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationConfirmed {
    pub company_id: CompanyId,
    pub reconciliation_id: ReconciliationId,
    pub payments: Vec<PaymentId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProposalRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRejected {
    pub company_id: CompanyId,
    pub reconciliation_id: ReconciliationId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReconciliationPosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPosted {
    pub company_id: CompanyId,
    pub reconciliation_id: ReconciliationId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProposalReopened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalReopened {
    pub company_id: CompanyId,
    pub reconciliation_id: ReconciliationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationEvent {
    AllocationProposed(AllocationProposed),
    AllocationConfirmed(AllocationConfirmed),
    ProposalRejected(ProposalRejected),
    ReconciliationPosted(ReconciliationPosted),
    ProposalReopened(ProposalReopened),
}

impl Event for ReconciliationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReconciliationEvent::AllocationProposed(_) => "reconciliation.allocation.proposed",
            ReconciliationEvent::AllocationConfirmed(_) => "reconciliation.allocation.confirmed",
            ReconciliationEvent::ProposalRejected(_) => "reconciliation.proposal.rejected",
            ReconciliationEvent::ReconciliationPosted(_) => "reconciliation.posted",
            ReconciliationEvent::ProposalReopened(_) => "reconciliation.proposal.reopened",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReconciliationEvent::AllocationProposed(e) => e.occurred_at,
            ReconciliationEvent::AllocationConfirmed(e) => e.occurred_at,
            ReconciliationEvent::ProposalRejected(e) => e.occurred_at,
            ReconciliationEvent::ReconciliationPosted(e) => e.occurred_at,
            ReconciliationEvent::ProposalReopened(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Reconciliation {
    type Command = ReconciliationCommand;
    type Event = ReconciliationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReconciliationEvent::AllocationProposed(e) => {
                self.id = e.reconciliation_id;
                self.company_id = Some(e.company_id);
                self.bank_account_id = Some(e.bank_account_id);
                self.transaction_id = Some(e.transaction_id);
                self.transaction_amount = e.transaction_amount;
                self.matched_amount = e.matched_amount;
                self.splits = e.splits.clone();
                self.status = ReconciliationStatus::Proposed;
                self.created = true;
            }
            ReconciliationEvent::AllocationConfirmed(e) => {
                for (split, payment_id) in self.splits.iter_mut().zip(&e.payments) {
                    split.payment_id = Some(*payment_id);
                }
                self.status = ReconciliationStatus::Confirmed;
            }
            ReconciliationEvent::ProposalRejected(e) => {
                self.rejection_reason = Some(e.reason.clone());
                self.status = ReconciliationStatus::Rejected;
            }
            ReconciliationEvent::ReconciliationPosted(_) => {
                self.status = ReconciliationStatus::Posted;
            }
            ReconciliationEvent::ProposalReopened(_) => {
                self.status = ReconciliationStatus::Reopened;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReconciliationCommand::ProposeAllocation(cmd) => self.handle_propose(cmd),
            ReconciliationCommand::ConfirmAllocation(cmd) => self.handle_confirm(cmd),
            ReconciliationCommand::RejectProposal(cmd) => self.handle_reject(cmd),
            ReconciliationCommand::PostReconciliation(cmd) => self.handle_post(cmd),
            ReconciliationCommand::ReopenProposal(cmd) => self.handle_reopen(cmd),
        }
    }
}

impl Reconciliation {
    fn ensure_company(&self, company_id: CompanyId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.company_id != Some(company_id) {
            return Err(DomainError::invariant("company mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, company_id: CompanyId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_company(company_id)
    }

    fn ensure_status(
        &self,
        expected: ReconciliationStatus,
        to: ReconciliationStatus,
    ) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::transition(self.status.as_str(), to.as_str()));
        }
        Ok(())
    }

    fn handle_propose(&self, cmd: &ProposeAllocation) -> Result<Vec<ReconciliationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("reconciliation already exists"));
        }

        // Only credit transactions fund invoice allocations; a debit cannot
        // fund a credit allocation.
        if cmd.transaction_amount <= 0 {
            return Err(DomainError::invariant(
                "debit transaction cannot fund invoice allocations",
            ));
        }
        if cmd.matched_amount <= 0 {
            return Err(DomainError::validation("matched amount must be positive"));
        }
        if cmd.matched_amount > cmd.transaction_amount.saturating_abs() {
            return Err(DomainError::invariant(
                "matched amount exceeds transaction amount",
            ));
        }
        if cmd.splits.is_empty() {
            return Err(DomainError::validation(
                "proposal must allocate to at least one invoice",
            ));
        }

        let mut total: i64 = 0;
        for (idx, split) in cmd.splits.iter().enumerate() {
            if split.allocated_amount <= 0 {
                return Err(DomainError::validation(
                    "split allocation must be positive",
                ));
            }
            if split.payment_id.is_some() {
                return Err(DomainError::validation(
                    "proposed split must not carry a payment",
                ));
            }
            if cmd.splits[..idx]
                .iter()
                .any(|earlier| earlier.invoice_id == split.invoice_id)
            {
                return Err(DomainError::validation(
                    "proposal allocates twice to the same invoice",
                ));
            }
            total = total
                .checked_add(split.allocated_amount)
                .ok_or_else(|| DomainError::invariant("allocation total overflow"))?;
        }

        if total > cmd.matched_amount {
            return Err(DomainError::invariant(
                "allocations exceed matched amount",
            ));
        }

        Ok(vec![ReconciliationEvent::AllocationProposed(
            AllocationProposed {
                company_id: cmd.company_id,
                reconciliation_id: cmd.reconciliation_id,
                bank_account_id: cmd.bank_account_id,
                transaction_id: cmd.transaction_id,
                transaction_amount: cmd.transaction_amount,
                matched_amount: cmd.matched_amount,
                splits: cmd.splits.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_confirm(&self, cmd: &ConfirmAllocation) -> Result<Vec<ReconciliationEvent>, DomainError> {
        self.ensure_exists(cmd.company_id)?;
        self.ensure_status(ReconciliationStatus::Proposed, ReconciliationStatus::Confirmed)?;

        if cmd.payments.len() != self.splits.len() {
            return Err(DomainError::validation(
                "confirmation must carry one payment per split",
            ));
        }

        Ok(vec![ReconciliationEvent::AllocationConfirmed(
            AllocationConfirmed {
                company_id: cmd.company_id,
                reconciliation_id: cmd.reconciliation_id,
                payments: cmd.payments.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_reject(&self, cmd: &RejectProposal) -> Result<Vec<ReconciliationEvent>, DomainError> {
        self.ensure_exists(cmd.company_id)?;
        self.ensure_status(ReconciliationStatus::Proposed, ReconciliationStatus::Rejected)?;

        Ok(vec![ReconciliationEvent::ProposalRejected(ProposalRejected {
            company_id: cmd.company_id,
            reconciliation_id: cmd.reconciliation_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post(&self, cmd: &PostReconciliation) -> Result<Vec<ReconciliationEvent>, DomainError> {
        self.ensure_exists(cmd.company_id)?;
        self.ensure_status(ReconciliationStatus::Confirmed, ReconciliationStatus::Posted)?;

        Ok(vec![ReconciliationEvent::ReconciliationPosted(
            ReconciliationPosted {
                company_id: cmd.company_id,
                reconciliation_id: cmd.reconciliation_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_reopen(&self, cmd: &ReopenProposal) -> Result<Vec<ReconciliationEvent>, DomainError> {
        self.ensure_exists(cmd.company_id)?;
        self.ensure_status(ReconciliationStatus::Rejected, ReconciliationStatus::Reopened)?;

        Ok(vec![ReconciliationEvent::ProposalReopened(ProposalReopened {
            company_id: cmd.company_id,
            reconciliation_id: cmd.reconciliation_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
