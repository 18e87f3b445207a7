//! Proposal data model

use crate::error::{BrokerError, Result};
use crate::scoring::ProposalScores;
use crate::types::{Actor, CarrierId, OrderId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of one proposal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Negotiating,
    Accepted,
    Rejected,
    Timeout,
    Withdrawn,
}

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Accepted
                | ProposalStatus::Rejected
                | ProposalStatus::Timeout
                | ProposalStatus::Withdrawn
        )
    }

    /// Eligible for ranking and best-offer queries
    pub fn is_selectable(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Pending | ProposalStatus::Negotiating | ProposalStatus::Accepted
        )
    }
}

/// Outcome of a single negotiation round
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Pending,
    Accepted,
    Rejected,
    Countered,
}

/// One entry in the append-only negotiation history
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NegotiationEntry {
    pub proposed_price: f64,
    pub counter_price: Option<f64>,
    pub proposed_by: Actor,
    pub message: String,
    pub status: NegotiationStatus,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time compliance verdict from the external vigilance collaborator.
/// Immutable once attached to a proposal submission.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct VigilanceCheck {
    pub kbis: bool,
    pub insurance: bool,
    pub license: bool,
    pub blacklist_clean: bool,
    pub overall: bool,
    pub checked_at: DateTime<Utc>,
}

impl VigilanceCheck {
    pub fn passing(checked_at: DateTime<Utc>) -> Self {
        Self {
            kbis: true,
            insurance: true,
            license: true,
            blacklist_clean: true,
            overall: true,
            checked_at,
        }
    }
}

/// Price decomposition supplied by the carrier
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceBreakdown {
    pub base: f64,
    pub fuel: f64,
    pub services: f64,
    pub taxes: f64,
    pub discount: f64,
}

/// Service add-ons offered with a proposal
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceAddOns {
    pub tailgate: bool,
    pub pallet_jack: bool,
    pub insurance: bool,
    pub adr: bool,
    pub temperature_controlled: bool,
}

/// Terminal response recorded on a proposal
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalResponse {
    pub status: ProposalStatus,
    pub reason: String,
    pub responded_by: Actor,
}

/// What a carrier submits; the ledger turns this into a full [`Proposal`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalDraft {
    pub carrier_id: CarrierId,
    pub carrier_name: String,
    pub proposed_price: f64,
    #[serde(default)]
    pub price_breakdown: PriceBreakdown,
    pub vehicle_type: Option<String>,
    pub driver_name: Option<String>,
    #[serde(default)]
    pub services: ServiceAddOns,
    pub estimated_pickup_date: Option<DateTime<Utc>>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
}

/// One carrier's offer against a session.
///
/// Keyed by `(session_id, carrier_id)`; a carrier holds at most one active
/// proposal per session, resubmission replaces the row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub session_id: SessionId,
    pub order_id: OrderId,
    pub carrier_id: CarrierId,
    pub carrier_name: String,

    pub proposed_price: f64,
    pub price_breakdown: PriceBreakdown,
    pub vehicle_type: Option<String>,
    pub driver_name: Option<String>,
    pub services: ServiceAddOns,
    pub estimated_pickup_date: Option<DateTime<Utc>>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,

    pub status: ProposalStatus,
    pub scores: ProposalScores,

    pub negotiation_history: Vec<NegotiationEntry>,
    pub max_negotiation_rounds: u32,

    pub vigilance: Option<VigilanceCheck>,

    pub response: Option<ProposalResponse>,
    pub submitted_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// Negotiation round count, always the length of the history
    pub fn current_round(&self) -> u32 {
        self.negotiation_history.len() as u32
    }

    pub fn can_negotiate(&self) -> bool {
        matches!(
            self.status,
            ProposalStatus::Pending | ProposalStatus::Negotiating
        ) && self.current_round() < self.max_negotiation_rounds
    }

    pub fn vigilance_passed(&self) -> bool {
        self.vigilance.map(|v| v.overall).unwrap_or(false)
    }

    /// Append one negotiation entry. Errors once the round cap is reached
    /// or the proposal is terminal; never a silent no-op.
    pub fn add_negotiation(&mut self, entry: NegotiationEntry) -> Result<u32> {
        if self.status.is_terminal() {
            return Err(BrokerError::InvalidTransition(format!(
                "cannot negotiate proposal in status {:?}",
                self.status
            )));
        }
        if self.current_round() >= self.max_negotiation_rounds {
            return Err(BrokerError::RoundCapExceeded {
                round: self.current_round(),
                max: self.max_negotiation_rounds,
            });
        }

        self.negotiation_history.push(entry);
        if self.status == ProposalStatus::Pending {
            self.status = ProposalStatus::Negotiating;
        }
        Ok(self.current_round())
    }

    /// Accept this proposal. Gated on the compliance snapshot.
    pub fn accept(&mut self, by: Actor, reason: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(BrokerError::InvalidTransition(format!(
                "cannot accept proposal in status {:?}",
                self.status
            )));
        }
        if !self.vigilance_passed() {
            return Err(BrokerError::ComplianceBlocked(self.carrier_id.0.clone()));
        }

        self.status = ProposalStatus::Accepted;
        self.responded_at = Some(Utc::now());
        self.response = Some(ProposalResponse {
            status: ProposalStatus::Accepted,
            reason: reason.into(),
            responded_by: by,
        });
        Ok(())
    }

    pub fn reject(&mut self, by: Actor, reason: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(BrokerError::InvalidTransition(format!(
                "cannot reject proposal in status {:?}",
                self.status
            )));
        }
        self.status = ProposalStatus::Rejected;
        self.responded_at = Some(Utc::now());
        self.response = Some(ProposalResponse {
            status: ProposalStatus::Rejected,
            reason: reason.into(),
            responded_by: by,
        });
        Ok(())
    }

    /// Deadline elapsed without a terminal response
    pub fn expire(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(BrokerError::InvalidTransition(format!(
                "cannot expire proposal in status {:?}",
                self.status
            )));
        }
        self.status = ProposalStatus::Timeout;
        self.responded_at = Some(Utc::now());
        self.response = Some(ProposalResponse {
            status: ProposalStatus::Timeout,
            reason: "No response within deadline".to_string(),
            responded_by: Actor::Engine,
        });
        Ok(())
    }

    pub fn withdraw(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(BrokerError::InvalidTransition(format!(
                "cannot withdraw proposal in status {:?}",
                self.status
            )));
        }
        self.status = ProposalStatus::Withdrawn;
        self.responded_at = Some(Utc::now());
        self.response = Some(ProposalResponse {
            status: ProposalStatus::Withdrawn,
            reason: reason.into(),
            responded_by: Actor::Carrier,
        });
        Ok(())
    }
}
