//! Session data model
//!
//! A session is the unit of brokering work for one transport order. Its
//! status only moves along the lifecycle edges; every legal transition
//! appends one timeline event and the timeline itself is append-only.

use crate::config::NegotiationSettings;
use crate::error::{BrokerError, Result};
use crate::scoring::ProposalScores;
use crate::types::{Actor, CampaignId, CarrierId, OrderId, SessionId, ShortlistEntry, Trigger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Analyzing,
    Broadcasting,
    Negotiating,
    Closed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Closed | SessionStatus::Failed)
    }

    /// States a session can be stuck in before any carrier interaction;
    /// the reaper only touches these.
    pub fn is_bootstrap(&self) -> bool {
        matches!(
            self,
            SessionStatus::Pending | SessionStatus::Analyzing | SessionStatus::Broadcasting
        )
    }

    /// Lifecycle edges. Failure is reachable from any live state.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (SessionStatus::Pending, SessionStatus::Analyzing) => true,
            (SessionStatus::Analyzing, SessionStatus::Broadcasting) => true,
            (SessionStatus::Broadcasting, SessionStatus::Negotiating) => true,
            (SessionStatus::Negotiating, SessionStatus::Closed) => true,
            (_, SessionStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Analyzing => "analyzing",
            SessionStatus::Broadcasting => "broadcasting",
            SessionStatus::Negotiating => "negotiating",
            SessionStatus::Closed => "closed",
            SessionStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One append-only timeline entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub payload: Option<serde_json::Value>,
}

/// The winning proposal, recorded once on closure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Selection {
    pub carrier_id: CarrierId,
    pub carrier_name: String,
    pub price: f64,
    pub scores: ProposalScores,
    pub reason: String,
    pub selected_at: DateTime<Utc>,
    pub selected_by: Actor,
}

/// Operational timings captured along the lifecycle
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub total_duration_ms: Option<i64>,
    pub broadcast_time_ms: Option<i64>,
    pub first_response_ms: Option<i64>,
}

/// One brokering session for one transport order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub order_id: OrderId,
    pub organization_id: String,

    pub status: SessionStatus,
    pub trigger: Trigger,
    pub shortlist: Vec<ShortlistEntry>,
    pub campaign_id: Option<CampaignId>,
    pub selection: Option<Selection>,

    pub proposals_received: u32,
    pub proposals_accepted: u32,
    pub proposals_rejected: u32,
    pub proposals_negotiated: u32,
    pub proposals_timed_out: u32,

    pub metrics: SessionMetrics,
    pub timeline: Vec<TimelineEvent>,

    pub reference_price: f64,
    pub negotiation_settings: NegotiationSettings,
    pub response_deadline: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_reason: Option<String>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SessionId,
        order_id: OrderId,
        organization_id: String,
        trigger: Trigger,
        shortlist: Vec<ShortlistEntry>,
        reference_price: f64,
        negotiation_settings: NegotiationSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let response_deadline =
            now + chrono::Duration::hours(negotiation_settings.response_timeout_hours);
        let mut session = Self {
            session_id,
            order_id,
            organization_id,
            status: SessionStatus::Pending,
            trigger,
            shortlist,
            campaign_id: None,
            selection: None,
            proposals_received: 0,
            proposals_accepted: 0,
            proposals_rejected: 0,
            proposals_negotiated: 0,
            proposals_timed_out: 0,
            metrics: SessionMetrics::default(),
            timeline: Vec::new(),
            reference_price,
            negotiation_settings,
            response_deadline,
            created_at: now,
            closed_at: None,
            closed_reason: None,
        };
        session.record_event("session_created", Actor::Engine, None, now);
        session
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn record_event(
        &mut self,
        event: impl Into<String>,
        actor: Actor,
        payload: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) {
        self.timeline.push(TimelineEvent {
            event: event.into(),
            timestamp: now,
            actor,
            payload,
        });
    }

    /// Move along one lifecycle edge; an illegal edge is an error and
    /// leaves the session untouched.
    pub fn transition_to(&mut self, next: SessionStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BrokerError::InvalidTransition(format!(
                "session {} cannot move from {} to {}",
                self.session_id, self.status, next
            )));
        }
        let from = self.status;
        self.status = next;
        self.record_event(
            "status_changed",
            Actor::Engine,
            Some(serde_json::json!({ "from": from.to_string(), "to": next.to_string() })),
            now,
        );
        Ok(())
    }

    /// Close with a winning selection. Only legal from Negotiating.
    pub fn close_with_selection(
        &mut self,
        selection: Selection,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transition_to(SessionStatus::Closed, now)?;
        self.closed_at = Some(now);
        self.closed_reason = Some(selection.reason.clone());
        self.selection = Some(selection);
        self.metrics.total_duration_ms =
            Some((now - self.created_at).num_milliseconds());
        Ok(())
    }

    /// Terminate without a winner
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition_to(SessionStatus::Failed, now)?;
        let reason = reason.into();
        self.closed_at = Some(now);
        self.closed_reason = Some(reason.clone());
        self.metrics.total_duration_ms = Some((now - self.created_at).num_milliseconds());
        self.record_event(
            "session_failed",
            Actor::Engine,
            Some(serde_json::json!({ "reason": reason })),
            now,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            SessionId("BRK-20260314-0001".to_string()),
            OrderId("ORD-1".to_string()),
            "org-1".to_string(),
            Trigger::manual("carrier cancelled"),
            Vec::new(),
            1000.0,
            NegotiationSettings::default(),
            Utc::now(),
        )
    }

    #[test]
    fn test_lifecycle_edges() {
        let mut s = session();
        let now = Utc::now();
        assert_eq!(s.status, SessionStatus::Pending);

        s.transition_to(SessionStatus::Analyzing, now).unwrap();
        s.transition_to(SessionStatus::Broadcasting, now).unwrap();
        s.transition_to(SessionStatus::Negotiating, now).unwrap();
        s.transition_to(SessionStatus::Closed, now).unwrap();
        assert!(!s.is_open());
    }

    #[test]
    fn test_illegal_edge_rejected() {
        let mut s = session();
        let now = Utc::now();
        let result = s.transition_to(SessionStatus::Negotiating, now);
        assert!(matches!(
            result.unwrap_err(),
            BrokerError::InvalidTransition(_)
        ));
        assert_eq!(s.status, SessionStatus::Pending);
    }

    #[test]
    fn test_failure_reachable_from_any_live_state() {
        for advance in 0..4 {
            let mut s = session();
            let now = Utc::now();
            let path = [
                SessionStatus::Analyzing,
                SessionStatus::Broadcasting,
                SessionStatus::Negotiating,
            ];
            for status in path.iter().take(advance) {
                s.transition_to(*status, now).unwrap();
            }
            s.fail("no eligible proposal - no carrier responded", now)
                .unwrap();
            assert_eq!(s.status, SessionStatus::Failed);
            assert!(s.closed_reason.is_some());
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut s = session();
        let now = Utc::now();
        s.fail("session timeout - automatic cleanup", now).unwrap();

        assert!(s.transition_to(SessionStatus::Analyzing, now).is_err());
        assert!(s.fail("again", now).is_err());
    }

    #[test]
    fn test_every_transition_appends_one_timeline_event() {
        let mut s = session();
        let now = Utc::now();
        let before = s.timeline.len();
        s.transition_to(SessionStatus::Analyzing, now).unwrap();
        assert_eq!(s.timeline.len(), before + 1);
        assert_eq!(s.timeline.last().unwrap().event, "status_changed");
    }

    #[test]
    fn test_selection_only_when_closed() {
        let mut s = session();
        let now = Utc::now();
        s.transition_to(SessionStatus::Analyzing, now).unwrap();
        s.transition_to(SessionStatus::Broadcasting, now).unwrap();
        s.transition_to(SessionStatus::Negotiating, now).unwrap();

        assert!(s.selection.is_none());
        s.close_with_selection(
            Selection {
                carrier_id: CarrierId("carrier_a".to_string()),
                carrier_name: "Carrier A".to_string(),
                price: 980.0,
                scores: ProposalScores::default(),
                reason: "best overall score".to_string(),
                selected_at: now,
                selected_by: Actor::Engine,
            },
            now,
        )
        .unwrap();

        assert_eq!(s.status, SessionStatus::Closed);
        assert!(s.selection.is_some());
        assert!(s.closed_reason.is_some());
        assert!(s.metrics.total_duration_ms.is_some());
    }
}
