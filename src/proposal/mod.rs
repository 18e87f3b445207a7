//! Carrier proposals: data model and ledger

pub mod ledger;
pub mod types;

pub use ledger::{ProposalKey, ProposalLedger, RankedProposal};
pub use types::{
    NegotiationEntry, NegotiationStatus, PriceBreakdown, Proposal, ProposalDraft,
    ProposalResponse, ProposalStatus, ServiceAddOns, VigilanceCheck,
};
