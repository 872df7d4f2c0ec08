//! `bankforge-reconciliation` - the reconciliation state machine and action
//! execution.
//!
//! A [`Reconciliation`] tracks one transaction's allocation from proposal to
//! posting. Action execution is pure: it turns a winning rule and an
//! open-invoice snapshot into a proposed allocation without touching any
//! store - persistence and balance validation belong to the allocator.

pub mod action;
pub mod reconciliation;

pub use action::{AllocationProposal, Disposition, MatchPolicy, TieBreak, execute_actions};
pub use reconciliation::{
    AllocationConfirmed, AllocationProposed, ConfirmAllocation, PostReconciliation,
    ProposalRejected, ProposalReopened, ProposeAllocation, Reconciliation, ReconciliationCommand,
    ReconciliationEvent, ReconciliationId, ReconciliationPosted, ReconciliationSplit,
    ReconciliationStatus, RejectProposal, ReopenProposal,
};
