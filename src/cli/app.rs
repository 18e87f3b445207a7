//! Broker application integrating all components
//!
//! `BrokerApp` owns the stores, the negotiation engine, the broadcast
//! orchestrator and the collaborator seams, and is the in-process query
//! surface callers talk to. The defaults wire in the simulated
//! collaborators, which is what the demo and the tests run against.

use crate::broadcast::{BroadcastOrchestrator, CampaignPerformance, DeliveryEvent, DispatchReport, OrderSummary};
use crate::collaborators::{
    ComplianceService, DeliveryService, PerformanceSource, SimulatedCompliance,
    SimulatedDelivery, StaticPerformance,
};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::negotiation::{EvaluationOutcome, NegotiationEngine};
use crate::proposal::{Proposal, ProposalDraft, ProposalLedger, RankedProposal};
use crate::reaper::Reaper;
use crate::session::{Selection, Session, SessionStateMachine, SessionStore};
use crate::types::{Actor, CarrierId, Channel, SessionId, ShortlistEntry, Trigger};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Main broker application
pub struct BrokerApp {
    config: BrokerConfig,
    store: Arc<SessionStore>,
    ledger: Arc<ProposalLedger>,
    orchestrator: Arc<BroadcastOrchestrator>,
    engine: NegotiationEngine,
    machine: SessionStateMachine,
    compliance: Arc<dyn ComplianceService>,
    performance: Arc<dyn PerformanceSource>,
    orders: RwLock<HashMap<SessionId, OrderSummary>>,
}

impl BrokerApp {
    /// Application wired against the simulated collaborators
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(SimulatedDelivery::new()),
            Arc::new(SimulatedCompliance::new()),
            Arc::new(StaticPerformance::new()),
        )
    }

    pub fn with_collaborators(
        config: BrokerConfig,
        delivery: Arc<dyn DeliveryService>,
        compliance: Arc<dyn ComplianceService>,
        performance: Arc<dyn PerformanceSource>,
    ) -> Self {
        let store = Arc::new(SessionStore::new());
        let ledger = Arc::new(ProposalLedger::new());
        let orchestrator = Arc::new(BroadcastOrchestrator::new(
            delivery,
            config.reminders.clone(),
        ));
        let engine = NegotiationEngine::new(ledger.clone());
        let machine = SessionStateMachine::new(
            store.clone(),
            ledger.clone(),
            orchestrator.clone(),
            config.clone(),
        );
        Self {
            config,
            store,
            ledger,
            orchestrator,
            engine,
            machine,
            compliance,
            performance,
            orders: RwLock::new(HashMap::new()),
        }
    }

    /// Open a session for an order and immediately broadcast to the
    /// shortlist: create -> analyze -> broadcast in one step.
    pub async fn trigger_session(
        &self,
        order: OrderSummary,
        trigger: Trigger,
        shortlist: Vec<ShortlistEntry>,
    ) -> Result<(SessionId, DispatchReport)> {
        let session = self
            .store
            .create(
                order.order_id.clone(),
                order.organization_id.clone(),
                trigger,
                shortlist,
                order.reference_price,
                self.config.negotiation.clone(),
            )
            .await?;
        let session_id = session.session_id;

        self.orders
            .write()
            .await
            .insert(session_id.clone(), order.clone());

        self.machine.begin_analysis(&session_id).await?;
        let report = self.machine.start_broadcast(&session_id, &order).await?;
        Ok((session_id, report))
    }

    async fn order_for(&self, session_id: &SessionId) -> Result<OrderSummary> {
        self.orders
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| BrokerError::SessionNotFound(session_id.0.clone()))
    }

    /// Ingest a carrier proposal: compliance check, ledger write, session
    /// bookkeeping, then the engine's evaluation.
    pub async fn submit_proposal(
        &self,
        session_id: &SessionId,
        draft: ProposalDraft,
    ) -> Result<(Proposal, EvaluationOutcome)> {
        let session = self.store.get(session_id).await?;
        if !session.is_open() {
            return Err(BrokerError::SessionClosed(session_id.0.clone()));
        }

        let carrier_id = draft.carrier_id.clone();
        let vigilance = self.compliance.check_compliance(&carrier_id).await?;
        let performance = self.performance.carrier_performance(&carrier_id).await?;

        let proposal = self
            .ledger
            .submit(
                session_id.clone(),
                session.order_id.clone(),
                session.reference_price,
                performance,
                vigilance,
                session.negotiation_settings.max_rounds,
                draft,
            )
            .await?;
        self.machine.record_proposal(session_id, &proposal).await?;

        // A proposal is the strongest delivery signal there is; move the
        // carrier's campaign rows to Responded where one exists
        if let Some(campaign_id) = &session.campaign_id {
            for plan in &self.config.channels {
                let outcome = self
                    .orchestrator
                    .record_delivery_event(
                        campaign_id,
                        &carrier_id,
                        plan.channel,
                        &DeliveryEvent::Responded,
                    )
                    .await;
                if let Err(e) = outcome {
                    debug!(
                        "No funnel update for {} on {}: {}",
                        carrier_id, plan.channel, e
                    );
                }
            }
        }

        let key = (session_id.clone(), carrier_id.clone());
        let outcome = self
            .engine
            .evaluate(&key, session.reference_price, &session.negotiation_settings)
            .await?;
        self.machine.record_evaluation(session_id, &outcome).await?;

        let proposal = self
            .ledger
            .get(&key)
            .await
            .ok_or_else(|| BrokerError::ProposalNotFound {
                session: session_id.0.clone(),
                carrier: carrier_id.0.clone(),
            })?;
        Ok((proposal, outcome))
    }

    /// Carrier's answer to an engine counter-offer
    pub async fn respond_to_counter(
        &self,
        session_id: &SessionId,
        carrier_id: &CarrierId,
        carrier_price: f64,
    ) -> Result<EvaluationOutcome> {
        let session = self.store.get(session_id).await?;
        if !session.is_open() {
            return Err(BrokerError::SessionClosed(session_id.0.clone()));
        }

        let key = (session_id.clone(), carrier_id.clone());
        let outcome = self
            .engine
            .respond_to_counter(
                &key,
                carrier_price,
                session.reference_price,
                &session.negotiation_settings,
            )
            .await?;
        self.machine.record_evaluation(session_id, &outcome).await?;
        Ok(outcome)
    }

    /// Close the session on its best offer under the configured criterion
    pub async fn select_winner(&self, session_id: &SessionId) -> Result<Selection> {
        self.machine
            .select_winner(session_id, self.config.selection, Actor::User)
            .await
    }

    /// Delivery collaborator webhook surface
    pub async fn record_delivery_event(
        &self,
        session_id: &SessionId,
        carrier_id: &CarrierId,
        channel: Channel,
        event: &DeliveryEvent,
    ) -> Result<()> {
        let campaign_id = self
            .orchestrator
            .campaign_for_session(session_id)
            .await
            .ok_or_else(|| BrokerError::CampaignNotFound(session_id.0.clone()))?;
        self.orchestrator
            .record_delivery_event(&campaign_id, carrier_id, channel, event)
            .await?;
        Ok(())
    }

    /// Reminder wave on one channel for the session's campaign
    pub async fn send_reminder(&self, session_id: &SessionId, channel: Channel) -> Result<usize> {
        let order = self.order_for(session_id).await?;
        let campaign_id = self
            .orchestrator
            .campaign_for_session(session_id)
            .await
            .ok_or_else(|| BrokerError::CampaignNotFound(session_id.0.clone()))?;
        self.orchestrator
            .send_reminder(&campaign_id, channel, &order)
            .await
    }

    /// Expire overdue proposals on the session
    pub async fn check_deadline(&self, session_id: &SessionId) -> Result<usize> {
        self.machine.check_deadline(session_id).await
    }

    pub async fn session_status(&self, session_id: &SessionId) -> Result<Session> {
        self.store.get(session_id).await
    }

    pub async fn ranking(&self, session_id: &SessionId) -> Vec<RankedProposal> {
        self.ledger.ranking(session_id).await
    }

    pub async fn campaign_stats(&self, session_id: &SessionId) -> Result<CampaignPerformance> {
        let campaign_id = self
            .orchestrator
            .campaign_for_session(session_id)
            .await
            .ok_or_else(|| BrokerError::CampaignNotFound(session_id.0.clone()))?;
        self.orchestrator.campaign_stats(&campaign_id).await
    }

    /// Start the periodic timeout reaper
    pub fn spawn_reaper(&self) -> tokio::task::JoinHandle<()> {
        let reaper = Reaper::new(
            self.store.clone(),
            self.config.stuck_threshold_hours,
            self.config.reaper_interval_secs,
        );
        tokio::spawn(reaper.run())
    }

    pub fn store(&self) -> Arc<SessionStore> {
        self.store.clone()
    }
}
