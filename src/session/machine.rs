//! Session state machine
//!
//! Drives one session along Pending -> Analyzing -> Broadcasting ->
//! Negotiating -> {Closed, Failed}, coordinating the ledger and the
//! broadcast orchestrator at each edge. All session writes go through the
//! store's per-key lock, so two concurrent transitions cannot both
//! succeed.

use crate::broadcast::{BroadcastOrchestrator, DispatchReport, OrderSummary};
use crate::config::{BrokerConfig, SelectionCriterion};
use crate::error::{BrokerError, Result};
use crate::negotiation::EvaluationOutcome;
use crate::proposal::{Proposal, ProposalLedger};
use crate::types::{Actor, SessionId};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::store::SessionStore;
use super::types::{Selection, SessionStatus};

pub struct SessionStateMachine {
    store: Arc<SessionStore>,
    ledger: Arc<ProposalLedger>,
    orchestrator: Arc<BroadcastOrchestrator>,
    config: BrokerConfig,
}

impl SessionStateMachine {
    pub fn new(
        store: Arc<SessionStore>,
        ledger: Arc<ProposalLedger>,
        orchestrator: Arc<BroadcastOrchestrator>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            orchestrator,
            config,
        }
    }

    /// Pending -> Analyzing
    pub async fn begin_analysis(&self, session_id: &SessionId) -> Result<()> {
        self.store
            .update(session_id, |s| {
                s.transition_to(SessionStatus::Analyzing, Utc::now())
            })
            .await
    }

    /// Analyzing -> Broadcasting: build and dispatch the session's campaign
    pub async fn start_broadcast(
        &self,
        session_id: &SessionId,
        order: &OrderSummary,
    ) -> Result<DispatchReport> {
        let session = self
            .store
            .update(session_id, |s| {
                s.transition_to(SessionStatus::Broadcasting, Utc::now())?;
                Ok(s.clone())
            })
            .await?;

        let broadcast_started = Utc::now();
        let campaign_id = self
            .orchestrator
            .build_campaign(session_id, order, &session.shortlist, &self.config.channels)
            .await?;
        let report = self.orchestrator.dispatch(&campaign_id, order).await?;

        let now = Utc::now();
        self.store
            .update(session_id, |s| {
                s.campaign_id = Some(campaign_id.clone());
                s.metrics.broadcast_time_ms =
                    Some((now - broadcast_started).num_milliseconds());
                s.record_event(
                    "broadcast_dispatched",
                    Actor::Engine,
                    Some(serde_json::json!({
                        "campaign_id": campaign_id.0,
                        "sent": report.sent,
                        "failed": report.failed,
                    })),
                    now,
                );
                Ok(())
            })
            .await?;
        Ok(report)
    }

    /// Register a submitted proposal on the session. Returns whether the
    /// session advanced Broadcasting -> Negotiating: it does on the first
    /// sufficiently-scored offer, or on any offer once the minimum
    /// response window has elapsed.
    pub async fn record_proposal(
        &self,
        session_id: &SessionId,
        proposal: &Proposal,
    ) -> Result<bool> {
        let auto_advance_score = self.config.auto_advance_score;
        let min_window = chrono::Duration::minutes(self.config.min_response_window_minutes);
        let carrier = proposal.carrier_id.0.clone();
        let price = proposal.proposed_price;
        let overall = proposal.scores.overall;

        self.store
            .update(session_id, move |s| {
                if !s.is_open() {
                    return Err(BrokerError::SessionClosed(s.session_id.0.clone()));
                }
                let now = Utc::now();
                s.proposals_received += 1;
                if s.metrics.first_response_ms.is_none() {
                    s.metrics.first_response_ms =
                        Some((now - s.created_at).num_milliseconds());
                }
                s.record_event(
                    "proposal_received",
                    Actor::Carrier,
                    Some(serde_json::json!({
                        "carrier_id": carrier,
                        "price": price,
                        "overall_score": overall,
                    })),
                    now,
                );

                let mut advanced = false;
                if s.status == SessionStatus::Broadcasting {
                    let window_elapsed = now - s.created_at >= min_window;
                    if overall >= auto_advance_score || window_elapsed {
                        s.transition_to(SessionStatus::Negotiating, now)?;
                        advanced = true;
                    }
                }
                Ok(advanced)
            })
            .await
    }

    /// Record what the negotiation engine decided for a proposal
    pub async fn record_evaluation(
        &self,
        session_id: &SessionId,
        outcome: &EvaluationOutcome,
    ) -> Result<()> {
        let outcome = outcome.clone();
        self.store
            .update(session_id, move |s| {
                if !s.is_open() {
                    return Err(BrokerError::SessionClosed(s.session_id.0.clone()));
                }
                let now = Utc::now();
                match outcome {
                    EvaluationOutcome::Accepted { reason } => {
                        s.proposals_accepted += 1;
                        s.record_event(
                            "proposal_auto_accepted",
                            Actor::Engine,
                            Some(serde_json::json!({ "reason": reason })),
                            now,
                        );
                    }
                    EvaluationOutcome::Rejected { reason } => {
                        s.proposals_rejected += 1;
                        s.record_event(
                            "proposal_auto_rejected",
                            Actor::Engine,
                            Some(serde_json::json!({ "reason": reason })),
                            now,
                        );
                    }
                    EvaluationOutcome::Countered { offer, round } => {
                        s.proposals_negotiated += 1;
                        s.record_event(
                            "counter_offer_sent",
                            Actor::Engine,
                            Some(serde_json::json!({
                                "counter_price": offer.counter_price,
                                "round": round,
                            })),
                            now,
                        );
                    }
                    EvaluationOutcome::Pending { reason } => {
                        s.record_event(
                            "proposal_pending",
                            Actor::Engine,
                            Some(serde_json::json!({ "reason": reason })),
                            now,
                        );
                    }
                }
                Ok(())
            })
            .await
    }

    /// Pick the winner under a criterion and close the session.
    ///
    /// Candidates blocked by compliance are rejected in turn; if none
    /// passes, the session fails with a reason distinguishing "nobody
    /// responded" from "best offer failed compliance".
    pub async fn select_winner(
        &self,
        session_id: &SessionId,
        criterion: SelectionCriterion,
        by: Actor,
    ) -> Result<Selection> {
        let session = self.store.get(session_id).await?;
        if !session.is_open() {
            return Err(BrokerError::SessionClosed(session_id.0.clone()));
        }

        let mut compliance_blocked: u32 = 0;
        let winner = loop {
            match self.ledger.best(session_id, criterion).await {
                Some(best) if !best.vigilance_passed() => {
                    warn!(
                        "Candidate {} for session {} blocked by compliance",
                        best.carrier_id, session_id
                    );
                    let key = (session_id.clone(), best.carrier_id.clone());
                    self.ledger
                        .update(&key, |p| p.reject(Actor::Engine, "Compliance check failed"))
                        .await?;
                    compliance_blocked += 1;
                }
                Some(best) => break best,
                None => {
                    let reason = if compliance_blocked > 0 {
                        "no eligible proposal - best offer failed compliance"
                    } else {
                        "no eligible proposal - no carrier responded"
                    };
                    self.store
                        .update(session_id, |s| {
                            s.proposals_rejected += compliance_blocked;
                            s.fail(reason, Utc::now())
                        })
                        .await?;
                    self.orchestrator.complete_for_session(session_id).await?;
                    return Err(BrokerError::InvalidProposal(reason.to_string()));
                }
            }
        };

        let now = Utc::now();
        let criterion_label = match criterion {
            SelectionCriterion::BestPrice => "best price",
            SelectionCriterion::BestQuality => "best quality score",
            SelectionCriterion::Overall => "best overall score",
        };
        let reason = format!("{} selected ({})", winner.carrier_name, criterion_label);

        // Accept the winner; an engine-accepted proposal is already terminal
        let winner_key = (session_id.clone(), winner.carrier_id.clone());
        self.ledger
            .update(&winner_key, |p| {
                if p.status == crate::proposal::ProposalStatus::Accepted {
                    return Ok(());
                }
                p.accept(by, "Selected as winning offer")
            })
            .await?;

        // Every other open proposal loses
        let mut losers_rejected: u32 = 0;
        for other in self.ledger.for_session(session_id).await {
            if other.carrier_id == winner.carrier_id || other.status.is_terminal() {
                continue;
            }
            let key = (session_id.clone(), other.carrier_id.clone());
            self.ledger
                .update(&key, |p| {
                    p.reject(Actor::Engine, "another carrier was selected")
                })
                .await?;
            losers_rejected += 1;
        }

        let selection = Selection {
            carrier_id: winner.carrier_id.clone(),
            carrier_name: winner.carrier_name.clone(),
            price: winner.proposed_price,
            scores: winner.scores,
            reason: reason.clone(),
            selected_at: now,
            selected_by: by,
        };

        let selection_for_session = selection.clone();
        self.store
            .update(session_id, move |s| {
                // Manual selection may land while still broadcasting
                if s.status == SessionStatus::Broadcasting {
                    s.transition_to(SessionStatus::Negotiating, now)?;
                }
                s.proposals_accepted += 1;
                s.proposals_rejected += losers_rejected + compliance_blocked;
                s.record_event(
                    "winner_selected",
                    by,
                    Some(serde_json::json!({
                        "carrier_id": selection_for_session.carrier_id.0,
                        "price": selection_for_session.price,
                        "criterion": criterion_label,
                    })),
                    now,
                );
                s.close_with_selection(selection_for_session, now)
            })
            .await?;
        self.orchestrator.complete_for_session(session_id).await?;

        info!(
            "Session {} closed: {} at {:.2}",
            session_id, winner.carrier_id, winner.proposed_price
        );
        Ok(selection)
    }

    /// Expire open proposals once the response deadline elapsed. Fails the
    /// session when nothing selectable remains.
    pub async fn check_deadline(&self, session_id: &SessionId) -> Result<usize> {
        let session = self.store.get(session_id).await?;
        if !session.is_open() || Utc::now() < session.response_deadline {
            return Ok(0);
        }

        let mut expired = 0usize;
        for proposal in self.ledger.for_session(session_id).await {
            if proposal.status.is_terminal() {
                continue;
            }
            let key = (session_id.clone(), proposal.carrier_id.clone());
            self.ledger.update(&key, |p| p.expire()).await?;
            expired += 1;
        }

        self.store
            .update(session_id, |s| {
                s.proposals_timed_out += expired as u32;
                s.record_event(
                    "response_deadline_elapsed",
                    Actor::Engine,
                    Some(serde_json::json!({ "expired": expired })),
                    Utc::now(),
                );
                Ok(())
            })
            .await?;

        if self
            .ledger
            .best(session_id, self.config.selection)
            .await
            .is_none()
        {
            let reason = if expired > 0 {
                "no eligible proposal - all proposals timed out"
            } else {
                "no eligible proposal - no carrier responded"
            };
            self.fail(session_id, reason).await?;
        }
        Ok(expired)
    }

    /// Terminate the session without a winner and wind its campaign down
    pub async fn fail(&self, session_id: &SessionId, reason: &str) -> Result<()> {
        self.store
            .update(session_id, |s| s.fail(reason, Utc::now()))
            .await?;
        self.orchestrator.complete_for_session(session_id).await?;
        info!("Session {} failed: {}", session_id, reason);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::CampaignStatus;
    use crate::collaborators::SimulatedDelivery;
    use crate::config::NegotiationSettings;
    use crate::proposal::{
        PriceBreakdown, ProposalDraft, ProposalStatus, ServiceAddOns, VigilanceCheck,
    };
    use crate::types::{CarrierId, OrderId, ShortlistEntry, Trigger};

    struct Harness {
        store: Arc<SessionStore>,
        ledger: Arc<ProposalLedger>,
        orchestrator: Arc<BroadcastOrchestrator>,
        machine: SessionStateMachine,
    }

    fn harness() -> Harness {
        let config = BrokerConfig::default();
        let store = Arc::new(SessionStore::new());
        let ledger = Arc::new(ProposalLedger::new());
        let orchestrator = Arc::new(BroadcastOrchestrator::new(
            Arc::new(SimulatedDelivery::new()),
            config.reminders.clone(),
        ));
        let machine = SessionStateMachine::new(
            store.clone(),
            ledger.clone(),
            orchestrator.clone(),
            config,
        );
        Harness {
            store,
            ledger,
            orchestrator,
            machine,
        }
    }

    fn shortlist() -> Vec<ShortlistEntry> {
        ["carrier_a", "carrier_b"]
            .iter()
            .map(|c| ShortlistEntry {
                carrier_id: CarrierId(c.to_string()),
                carrier_name: c.to_uppercase(),
                match_score: 80.0,
                estimated_price: None,
                contact_email: Some(format!("{}@example.test", c)),
            })
            .collect()
    }

    fn order() -> OrderSummary {
        OrderSummary {
            order_id: OrderId("ORD-1".to_string()),
            organization_id: "org-1".to_string(),
            pickup_city: "Lyon".to_string(),
            delivery_city: "Nantes".to_string(),
            pickup_date: None,
            reference_price: 1000.0,
            goods_description: None,
        }
    }

    async fn broadcasting_session(h: &Harness) -> SessionId {
        let session = h
            .store
            .create(
                OrderId("ORD-1".to_string()),
                "org-1".to_string(),
                Trigger::manual("carrier cancelled"),
                shortlist(),
                1000.0,
                NegotiationSettings::default(),
            )
            .await
            .unwrap();
        let id = session.session_id;
        h.machine.begin_analysis(&id).await.unwrap();
        h.machine.start_broadcast(&id, &order()).await.unwrap();
        id
    }

    async fn submit(
        h: &Harness,
        id: &SessionId,
        carrier: &str,
        price: f64,
        perf: Option<f64>,
        vigilance_ok: bool,
    ) -> Proposal {
        let mut vigilance = VigilanceCheck::passing(Utc::now());
        vigilance.overall = vigilance_ok;
        let proposal = h
            .ledger
            .submit(
                id.clone(),
                OrderId("ORD-1".to_string()),
                1000.0,
                perf,
                vigilance,
                3,
                ProposalDraft {
                    carrier_id: CarrierId(carrier.to_string()),
                    carrier_name: carrier.to_uppercase(),
                    proposed_price: price,
                    price_breakdown: PriceBreakdown::default(),
                    vehicle_type: None,
                    driver_name: None,
                    services: ServiceAddOns::default(),
                    estimated_pickup_date: None,
                    estimated_delivery_date: None,
                },
            )
            .await
            .unwrap();
        h.machine.record_proposal(id, &proposal).await.unwrap();
        proposal
    }

    #[tokio::test]
    async fn test_broadcast_records_campaign_on_session() {
        let h = harness();
        let id = broadcasting_session(&h).await;

        let session = h.store.get(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Broadcasting);
        assert!(session.campaign_id.is_some());
        assert!(session.metrics.broadcast_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_high_score_auto_advances_to_negotiating() {
        let h = harness();
        let id = broadcasting_session(&h).await;

        // Overall 94 with price at reference and strong performance
        submit(&h, &id, "carrier_a", 1000.0, Some(90.0), true).await;

        let session = h.store.get(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Negotiating);
        assert_eq!(session.proposals_received, 1);
        assert!(session.metrics.first_response_ms.is_some());
    }

    #[tokio::test]
    async fn test_low_score_keeps_broadcasting_within_window() {
        let h = harness();
        let id = broadcasting_session(&h).await;

        // Overall 46: below the auto-advance bar, window not elapsed
        submit(&h, &id, "carrier_a", 1150.0, Some(30.0), true).await;

        let session = h.store.get(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Broadcasting);
        assert_eq!(session.proposals_received, 1);
    }

    #[tokio::test]
    async fn test_select_winner_closes_session_and_rejects_losers() {
        let h = harness();
        let id = broadcasting_session(&h).await;
        submit(&h, &id, "carrier_a", 1000.0, Some(90.0), true).await;
        submit(&h, &id, "carrier_b", 1100.0, Some(50.0), true).await;

        let selection = h
            .machine
            .select_winner(&id, SelectionCriterion::Overall, Actor::User)
            .await
            .unwrap();
        assert_eq!(selection.carrier_id.0, "carrier_a");

        let session = h.store.get(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Closed);
        assert!(session.selection.is_some());
        assert_eq!(session.proposals_accepted, 1);
        assert_eq!(session.proposals_rejected, 1);

        let loser = h
            .ledger
            .get(&(id.clone(), CarrierId("carrier_b".to_string())))
            .await
            .unwrap();
        assert_eq!(loser.status, ProposalStatus::Rejected);
        assert_eq!(
            loser.response.unwrap().reason,
            "another carrier was selected"
        );

        // The campaign is wound down with the session
        let campaign_id = session.campaign_id.unwrap();
        let campaign = h.orchestrator.snapshot(&campaign_id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
    }

    #[tokio::test]
    async fn test_late_proposal_after_closure() {
        let h = harness();
        let id = broadcasting_session(&h).await;
        submit(&h, &id, "carrier_a", 1000.0, Some(90.0), true).await;
        h.machine
            .select_winner(&id, SelectionCriterion::Overall, Actor::User)
            .await
            .unwrap();

        let late = h
            .ledger
            .get(&(id.clone(), CarrierId("carrier_a".to_string())))
            .await
            .unwrap();
        let result = h.machine.record_proposal(&id, &late).await;
        assert!(matches!(result.unwrap_err(), BrokerError::SessionClosed(_)));
    }

    #[tokio::test]
    async fn test_select_winner_without_proposals_fails_session() {
        let h = harness();
        let id = broadcasting_session(&h).await;

        let result = h
            .machine
            .select_winner(&id, SelectionCriterion::Overall, Actor::User)
            .await;
        assert!(result.is_err());

        let session = h.store.get(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(
            session.closed_reason.as_deref(),
            Some("no eligible proposal - no carrier responded")
        );
        assert!(session.selection.is_none());
    }

    #[tokio::test]
    async fn test_compliance_blocked_winner_falls_back_or_fails() {
        let h = harness();
        let id = broadcasting_session(&h).await;
        // Best offer blocked, second one clean
        submit(&h, &id, "carrier_a", 1000.0, Some(90.0), false).await;
        submit(&h, &id, "carrier_b", 1100.0, Some(50.0), true).await;

        let selection = h
            .machine
            .select_winner(&id, SelectionCriterion::Overall, Actor::User)
            .await
            .unwrap();
        assert_eq!(selection.carrier_id.0, "carrier_b");

        let blocked = h
            .ledger
            .get(&(id.clone(), CarrierId("carrier_a".to_string())))
            .await
            .unwrap();
        assert_eq!(blocked.status, ProposalStatus::Rejected);
    }

    #[tokio::test]
    async fn test_all_candidates_blocked_fails_with_compliance_reason() {
        let h = harness();
        let id = broadcasting_session(&h).await;
        submit(&h, &id, "carrier_a", 1000.0, Some(90.0), false).await;

        let result = h
            .machine
            .select_winner(&id, SelectionCriterion::Overall, Actor::User)
            .await;
        assert!(result.is_err());

        let session = h.store.get(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(
            session.closed_reason.as_deref(),
            Some("no eligible proposal - best offer failed compliance")
        );
    }

    #[tokio::test]
    async fn test_deadline_expires_open_proposals() {
        let h = harness();
        let id = broadcasting_session(&h).await;
        submit(&h, &id, "carrier_a", 1100.0, Some(30.0), true).await;

        // Pull the deadline into the past
        h.store
            .update(&id, |s| {
                s.response_deadline = Utc::now() - chrono::Duration::minutes(1);
                Ok(())
            })
            .await
            .unwrap();

        let expired = h.machine.check_deadline(&id).await.unwrap();
        assert_eq!(expired, 1);

        let proposal = h
            .ledger
            .get(&(id.clone(), CarrierId("carrier_a".to_string())))
            .await
            .unwrap();
        assert_eq!(proposal.status, ProposalStatus::Timeout);

        let session = h.store.get(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.proposals_timed_out, 1);
        // A session that did receive offers must not claim nobody responded
        assert_eq!(
            session.closed_reason.as_deref(),
            Some("no eligible proposal - all proposals timed out")
        );
    }

    #[tokio::test]
    async fn test_deadline_without_any_proposal_reports_no_response() {
        let h = harness();
        let id = broadcasting_session(&h).await;

        h.store
            .update(&id, |s| {
                s.response_deadline = Utc::now() - chrono::Duration::minutes(1);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(h.machine.check_deadline(&id).await.unwrap(), 0);
        let session = h.store.get(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(
            session.closed_reason.as_deref(),
            Some("no eligible proposal - no carrier responded")
        );
    }

    #[tokio::test]
    async fn test_deadline_before_expiry_is_a_no_op() {
        let h = harness();
        let id = broadcasting_session(&h).await;
        submit(&h, &id, "carrier_a", 1100.0, Some(30.0), true).await;

        assert_eq!(h.machine.check_deadline(&id).await.unwrap(), 0);
        let session = h.store.get(&id).await.unwrap();
        assert!(session.is_open());
    }
}
