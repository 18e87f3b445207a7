//! Negotiation engine
//!
//! Applies counter-offer rules to proposals through the ledger, enforcing
//! the round cap. Every transition appends one negotiation history entry;
//! entries are never mutated in place.

use crate::config::NegotiationSettings;
use crate::error::Result;
use crate::proposal::{
    NegotiationEntry, NegotiationStatus, ProposalKey, ProposalLedger,
};
use crate::types::Actor;
use chrono::Utc;
use std::sync::Arc;

/// A counter-offer produced by the engine
#[derive(Clone, Debug, PartialEq)]
pub struct CounterOffer {
    pub counter_price: f64,
    pub message: String,
}

/// What the engine decided for a proposal
#[derive(Clone, Debug, PartialEq)]
pub enum EvaluationOutcome {
    Accepted { reason: String },
    Rejected { reason: String },
    Countered { offer: CounterOffer, round: u32 },
    Pending { reason: String },
}

/// Engine applying counter-offer rules per proposal
pub struct NegotiationEngine {
    ledger: Arc<ProposalLedger>,
}

impl NegotiationEngine {
    pub fn new(ledger: Arc<ProposalLedger>) -> Self {
        Self { ledger }
    }

    /// Evaluate a freshly submitted proposal: auto-accept, auto-reject,
    /// counter, or leave pending for a manual decision.
    pub async fn evaluate(
        &self,
        key: &ProposalKey,
        reference_price: f64,
        settings: &NegotiationSettings,
    ) -> Result<EvaluationOutcome> {
        let settings = settings.clone();
        self.ledger
            .update(key, move |proposal| {
                let excess = excess_percent(proposal.proposed_price, reference_price);

                if excess <= settings.auto_accept_threshold {
                    if proposal.vigilance_passed() {
                        let reason = format!(
                            "Price within threshold ({:+.1}% vs reference)",
                            excess
                        );
                        proposal.accept(Actor::Engine, reason.clone())?;
                        tracing::info!("Auto-accepted proposal from {}", proposal.carrier_id);
                        return Ok(EvaluationOutcome::Accepted { reason });
                    }
                    // Good price, but acceptance is gated on compliance
                    return Ok(EvaluationOutcome::Pending {
                        reason: "Awaiting compliance clearance".to_string(),
                    });
                }

                if excess > settings.max_price_increase {
                    let reason = format!(
                        "Price too high ({:+.1}%, max {:+.1}%)",
                        excess, settings.max_price_increase
                    );
                    proposal.reject(Actor::Engine, reason.clone())?;
                    tracing::info!("Auto-rejected proposal from {}", proposal.carrier_id);
                    return Ok(EvaluationOutcome::Rejected { reason });
                }

                if proposal.can_negotiate() {
                    if let Some(offer) = generate_counter_offer(
                        proposal.proposed_price,
                        reference_price,
                        settings.max_price_increase,
                    ) {
                        let round = proposal.add_negotiation(NegotiationEntry {
                            proposed_price: proposal.proposed_price,
                            counter_price: Some(offer.counter_price),
                            proposed_by: Actor::Engine,
                            message: offer.message.clone(),
                            status: NegotiationStatus::Pending,
                            timestamp: Utc::now(),
                        })?;
                        tracing::info!(
                            "Countered proposal from {} at {} (round {})",
                            proposal.carrier_id,
                            offer.counter_price,
                            round
                        );
                        return Ok(EvaluationOutcome::Countered { offer, round });
                    }
                }

                Ok(EvaluationOutcome::Pending {
                    reason: "Awaiting manual decision".to_string(),
                })
            })
            .await
    }

    /// Handle the carrier's answer to an engine counter-offer
    pub async fn respond_to_counter(
        &self,
        key: &ProposalKey,
        carrier_price: f64,
        reference_price: f64,
        settings: &NegotiationSettings,
    ) -> Result<EvaluationOutcome> {
        let settings = settings.clone();
        self.ledger
            .update(key, move |proposal| {
                let excess = excess_percent(carrier_price, reference_price);

                if excess <= settings.auto_accept_threshold {
                    proposal.proposed_price = carrier_price;
                    proposal.add_negotiation(NegotiationEntry {
                        proposed_price: carrier_price,
                        counter_price: Some(carrier_price),
                        proposed_by: Actor::Engine,
                        message: "Counter-offer accepted".to_string(),
                        status: NegotiationStatus::Accepted,
                        timestamp: Utc::now(),
                    })?;
                    let reason = format!("Counter-offer accepted at {:.2}", carrier_price);
                    proposal.accept(Actor::Engine, reason.clone())?;
                    return Ok(EvaluationOutcome::Accepted { reason });
                }

                if excess > settings.max_price_increase {
                    let reason = format!(
                        "Counter-offer rejected - price too high ({:+.1}%)",
                        excess
                    );
                    proposal.add_negotiation(NegotiationEntry {
                        proposed_price: carrier_price,
                        counter_price: None,
                        proposed_by: Actor::Engine,
                        message: reason.clone(),
                        status: NegotiationStatus::Rejected,
                        timestamp: Utc::now(),
                    })?;
                    proposal.reject(Actor::Engine, reason.clone())?;
                    return Ok(EvaluationOutcome::Rejected { reason });
                }

                if proposal.can_negotiate() {
                    if let Some(offer) = generate_counter_offer(
                        carrier_price,
                        reference_price,
                        settings.max_price_increase,
                    ) {
                        let round = proposal.add_negotiation(NegotiationEntry {
                            proposed_price: carrier_price,
                            counter_price: Some(offer.counter_price),
                            proposed_by: Actor::Engine,
                            message: offer.message.clone(),
                            status: NegotiationStatus::Countered,
                            timestamp: Utc::now(),
                        })?;
                        return Ok(EvaluationOutcome::Countered { offer, round });
                    }
                }

                Ok(EvaluationOutcome::Pending {
                    reason: "Negotiation round cap reached - manual decision required"
                        .to_string(),
                })
            })
            .await
    }

    /// Manual counter-offer from an operator
    pub async fn counter_manually(
        &self,
        key: &ProposalKey,
        counter_price: f64,
        message: String,
    ) -> Result<u32> {
        self.ledger
            .update(key, move |proposal| {
                proposal.add_negotiation(NegotiationEntry {
                    proposed_price: proposal.proposed_price,
                    counter_price: Some(counter_price),
                    proposed_by: Actor::User,
                    message,
                    status: NegotiationStatus::Pending,
                    timestamp: Utc::now(),
                })
            })
            .await
    }

    /// Explicit terminal response on a proposal
    pub async fn respond(
        &self,
        key: &ProposalKey,
        accept: bool,
        by: Actor,
        reason: String,
    ) -> Result<()> {
        self.ledger
            .update(key, move |proposal| {
                if accept {
                    proposal.accept(by, reason)
                } else {
                    proposal.reject(by, reason)
                }
            })
            .await
    }

    /// Deadline elapsed: any non-terminal proposal times out
    pub async fn expire(&self, key: &ProposalKey) -> Result<()> {
        self.ledger.update(key, |proposal| proposal.expire()).await
    }
}

fn excess_percent(price: f64, reference: f64) -> f64 {
    if reference <= 0.0 {
        return 0.0;
    }
    (price / reference - 1.0) * 100.0
}

/// Counter-offer rule: no counter at or below reference; clamp to the max
/// allowed price when above it; otherwise meet in the middle.
pub fn generate_counter_offer(
    proposed_price: f64,
    reference_price: f64,
    max_price_increase: f64,
) -> Option<CounterOffer> {
    if proposed_price <= reference_price {
        return None;
    }

    let max_allowed = reference_price * (1.0 + max_price_increase / 100.0);
    let counter_price = if proposed_price > max_allowed {
        max_allowed
    } else {
        (reference_price + proposed_price) / 2.0
    };
    let counter_price = (counter_price * 100.0).round() / 100.0;

    let message = if proposed_price > max_allowed {
        format!(
            "Your proposal exceeds our budget. We can accept up to {:.2}.",
            counter_price
        )
    } else {
        format!("We can offer {:.2} for this transport.", counter_price)
    };

    Some(CounterOffer {
        counter_price,
        message,
    })
}
