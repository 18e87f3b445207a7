//! Campaign data model
//!
//! One campaign per session. Recipient delivery state is a tagged funnel
//! enum with explicit allowed transitions; `stats` is always a fold over
//! `recipients`, never independently settable.

use crate::config::Priority;
use crate::error::{BrokerError, Result};
use crate::types::{CampaignId, CarrierId, Channel, OrderId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-recipient delivery funnel position
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelState {
    Queued,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Responded,
    Failed,
    Bounced,
}

impl FunnelState {
    fn rank(&self) -> u8 {
        match self {
            FunnelState::Queued => 0,
            FunnelState::Sent => 1,
            FunnelState::Delivered => 2,
            FunnelState::Opened => 3,
            FunnelState::Clicked => 4,
            FunnelState::Responded => 5,
            FunnelState::Failed | FunnelState::Bounced => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FunnelState::Responded | FunnelState::Failed | FunnelState::Bounced
        )
    }
}

/// Asynchronous event from the delivery collaborator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryEvent {
    Delivered,
    Opened,
    Clicked,
    Responded,
    Bounced { reason: String },
}

impl DeliveryEvent {
    fn target(&self) -> FunnelState {
        match self {
            DeliveryEvent::Delivered => FunnelState::Delivered,
            DeliveryEvent::Opened => FunnelState::Opened,
            DeliveryEvent::Clicked => FunnelState::Clicked,
            DeliveryEvent::Responded => FunnelState::Responded,
            DeliveryEvent::Bounced { .. } => FunnelState::Bounced,
        }
    }
}

/// One `(carrier, channel)` delivery row
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Recipient {
    pub carrier_id: CarrierId,
    pub carrier_name: String,
    pub contact_email: Option<String>,
    pub channel: Channel,
    pub state: FunnelState,

    pub queued_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,

    pub failure_reason: Option<String>,
    pub bounce_reason: Option<String>,
    pub message_id: Option<String>,
}

impl Recipient {
    pub fn queued(
        carrier_id: CarrierId,
        carrier_name: String,
        contact_email: Option<String>,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            carrier_id,
            carrier_name,
            contact_email,
            channel,
            state: FunnelState::Queued,
            queued_at: now,
            sent_at: None,
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            responded_at: None,
            failure_reason: None,
            bounce_reason: None,
            message_id: None,
        }
    }

    pub fn mark_sent(&mut self, message_id: String, now: DateTime<Utc>) -> Result<()> {
        if self.state != FunnelState::Queued {
            return Err(BrokerError::InvalidFunnelTransition {
                from: format!("{:?}", self.state),
                event: "sent".to_string(),
            });
        }
        self.state = FunnelState::Sent;
        self.sent_at = Some(now);
        self.message_id = Some(message_id);
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: String) -> Result<()> {
        if self.state.is_terminal() {
            return Err(BrokerError::InvalidFunnelTransition {
                from: format!("{:?}", self.state),
                event: "failed".to_string(),
            });
        }
        self.state = FunnelState::Failed;
        self.failure_reason = Some(reason);
        Ok(())
    }

    /// Advance the funnel on a delivery event. Events only move forward;
    /// an out-of-order or regressive event is a validation error.
    pub fn apply_event(&mut self, event: &DeliveryEvent, now: DateTime<Utc>) -> Result<()> {
        let target = event.target();

        if self.state.is_terminal() || self.state == FunnelState::Queued {
            // Nothing was sent yet, or the row already finished
            return Err(BrokerError::InvalidFunnelTransition {
                from: format!("{:?}", self.state),
                event: format!("{:?}", event),
            });
        }
        if let DeliveryEvent::Bounced { reason } = event {
            // A bounce only makes sense before engagement milestones
            if self.state.rank() > FunnelState::Delivered.rank() {
                return Err(BrokerError::InvalidFunnelTransition {
                    from: format!("{:?}", self.state),
                    event: "bounced".to_string(),
                });
            }
            self.state = FunnelState::Bounced;
            self.bounce_reason = Some(reason.clone());
            return Ok(());
        }
        if target.rank() <= self.state.rank() {
            return Err(BrokerError::InvalidFunnelTransition {
                from: format!("{:?}", self.state),
                event: format!("{:?}", event),
            });
        }

        // Later milestones imply the earlier ones; backfill their timestamps
        if target.rank() >= FunnelState::Delivered.rank() && self.delivered_at.is_none() {
            self.delivered_at = Some(now);
        }
        if target.rank() >= FunnelState::Opened.rank() && self.opened_at.is_none() {
            self.opened_at = Some(now);
        }
        if target.rank() >= FunnelState::Clicked.rank() && self.clicked_at.is_none() {
            self.clicked_at = Some(now);
        }
        if target == FunnelState::Responded {
            self.responded_at = Some(now);
        }
        self.state = target;
        Ok(())
    }

    pub fn has_responded(&self) -> bool {
        self.responded_at.is_some()
    }
}

/// Dispatch state of one configured channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

/// One configured channel in a campaign
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelPlan {
    pub channel: Channel,
    pub enabled: bool,
    pub template_id: String,
    pub priority: Priority,
    pub status: ChannelStatus,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Funnel counters, derived from `recipients` on every mutation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total: usize,
    pub queued: usize,
    pub sent: usize,
    pub delivered: usize,
    pub opened: usize,
    pub clicked: usize,
    pub responded: usize,
    pub failed: usize,
    pub bounced: usize,
}

impl CampaignStats {
    /// Fold over the recipient rows; the counters are cumulative (a
    /// responded recipient still counts as sent and delivered).
    pub fn fold(recipients: &[Recipient]) -> Self {
        Self {
            total: recipients.len(),
            queued: recipients.len(),
            sent: recipients.iter().filter(|r| r.sent_at.is_some()).count(),
            delivered: recipients
                .iter()
                .filter(|r| r.delivered_at.is_some())
                .count(),
            opened: recipients.iter().filter(|r| r.opened_at.is_some()).count(),
            clicked: recipients.iter().filter(|r| r.clicked_at.is_some()).count(),
            responded: recipients
                .iter()
                .filter(|r| r.responded_at.is_some())
                .count(),
            failed: recipients
                .iter()
                .filter(|r| r.failure_reason.is_some())
                .count(),
            bounced: recipients
                .iter()
                .filter(|r| r.bounce_reason.is_some())
                .count(),
        }
    }
}

/// One reminder wave sent to non-respondents
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReminderWave {
    pub sent_at: DateTime<Utc>,
    pub recipients: usize,
    pub channel: Channel,
}

/// Campaign lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Completed,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Cancelled
        )
    }
}

/// One broadcast wave tied 1:1 to a session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Campaign {
    pub campaign_id: CampaignId,
    pub session_id: SessionId,
    pub order_id: OrderId,
    pub organization_id: String,

    pub channels: Vec<ChannelPlan>,
    pub recipients: Vec<Recipient>,
    pub stats: CampaignStats,
    pub reminders: Vec<ReminderWave>,
    pub max_reminders: u32,

    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn update_stats(&mut self) {
        self.stats = CampaignStats::fold(&self.recipients);
    }

    pub fn recipient_mut(
        &mut self,
        carrier_id: &CarrierId,
        channel: Channel,
    ) -> Option<&mut Recipient> {
        self.recipients
            .iter_mut()
            .find(|r| &r.carrier_id == carrier_id && r.channel == channel)
    }

    /// Apply a delivery-collaborator event to the matching recipient row.
    /// An unknown recipient is a reported, non-fatal error.
    pub fn apply_delivery_event(
        &mut self,
        carrier_id: &CarrierId,
        channel: Channel,
        event: &DeliveryEvent,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let campaign_id = self.campaign_id.clone();
        let recipient = self.recipient_mut(carrier_id, channel).ok_or_else(|| {
            BrokerError::UnknownRecipient {
                campaign: campaign_id.0,
                carrier: carrier_id.0.clone(),
                channel: channel.to_string(),
            }
        })?;
        recipient.apply_event(event, now)?;
        self.update_stats();
        self.refresh_completion(now);
        Ok(())
    }

    pub fn add_reminder(&mut self, recipients: usize, channel: Channel, now: DateTime<Utc>) {
        self.reminders.push(ReminderWave {
            sent_at: now,
            recipients,
            channel,
        });
    }

    /// Recipients still waiting on a response (reminder targets)
    pub fn non_respondents(&self) -> Vec<&Recipient> {
        self.recipients
            .iter()
            .filter(|r| r.sent_at.is_some() && !r.state.is_terminal())
            .collect()
    }

    /// Completed once every recipient reached a terminal funnel state
    pub fn refresh_completion(&mut self, now: DateTime<Utc>) {
        if self.status == CampaignStatus::Sent
            && !self.recipients.is_empty()
            && self.recipients.iter().all(|r| r.state.is_terminal())
        {
            self.status = CampaignStatus::Completed;
            self.completed_at = Some(now);
        }
    }

    pub fn engagement_rate(&self) -> f64 {
        if self.stats.sent == 0 {
            return 0.0;
        }
        self.stats.responded as f64 / self.stats.sent as f64 * 100.0
    }

    pub fn open_rate(&self) -> f64 {
        if self.stats.delivered == 0 {
            return 0.0;
        }
        self.stats.opened as f64 / self.stats.delivered as f64 * 100.0
    }

    pub fn click_rate(&self) -> f64 {
        if self.stats.opened == 0 {
            return 0.0;
        }
        self.stats.clicked as f64 / self.stats.opened as f64 * 100.0
    }
}
