//! Campaign orchestration
//!
//! Builds one campaign per session from the shortlist and the enabled
//! channels, dispatches the initial wave through the delivery
//! collaborator, ingests delivery events and drives reminder waves.
//! Campaign rows are individually locked; the map lock is only held
//! for lookup and insert.

use crate::collaborators::DeliveryService;
use crate::config::{ChannelConfig, ReminderSchedule};
use crate::error::{BrokerError, Result};
use crate::types::{CampaignId, CarrierId, Channel, OrderId, SessionId, ShortlistEntry};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::campaign::{
    Campaign, CampaignStats, CampaignStatus, ChannelPlan, ChannelStatus, DeliveryEvent, Recipient,
};

/// Order facts surfaced to carriers in outbound messages
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub organization_id: String,
    pub pickup_city: String,
    pub delivery_city: String,
    pub pickup_date: Option<DateTime<Utc>>,
    pub reference_price: f64,
    pub goods_description: Option<String>,
}

impl OrderSummary {
    /// Template variables handed to the delivery collaborator
    pub fn template_variables(&self) -> serde_json::Value {
        serde_json::json!({
            "order_id": self.order_id.0,
            "pickup_city": self.pickup_city,
            "delivery_city": self.delivery_city,
            "pickup_date": self.pickup_date.map(|d| d.to_rfc3339()),
            "reference_price": self.reference_price,
            "goods_description": self.goods_description,
        })
    }
}

/// Outcome of the initial dispatch wave
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchReport {
    pub campaign_id: CampaignId,
    pub sent: usize,
    pub failed: usize,
}

/// Point-in-time campaign summary for callers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CampaignPerformance {
    pub campaign_id: CampaignId,
    pub status: CampaignStatus,
    pub stats: CampaignStats,
    pub engagement_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub reminders_sent: usize,
}

pub struct BroadcastOrchestrator {
    campaigns: RwLock<HashMap<CampaignId, Arc<Mutex<Campaign>>>>,
    by_session: RwLock<HashMap<SessionId, CampaignId>>,
    sequence: Mutex<(NaiveDate, u32)>,
    delivery: Arc<dyn DeliveryService>,
    reminders: ReminderSchedule,
}

impl BroadcastOrchestrator {
    pub fn new(delivery: Arc<dyn DeliveryService>, reminders: ReminderSchedule) -> Self {
        Self {
            campaigns: RwLock::new(HashMap::new()),
            by_session: RwLock::new(HashMap::new()),
            sequence: Mutex::new((Utc::now().date_naive(), 0)),
            delivery,
            reminders,
        }
    }

    /// Per-day sequence, reset at the day boundary
    async fn next_campaign_id(&self, now: DateTime<Utc>) -> CampaignId {
        let today = now.date_naive();
        let mut seq = self.sequence.lock().await;
        if seq.0 != today {
            *seq = (today, 0);
        }
        seq.1 += 1;
        CampaignId::new(today, seq.1)
    }

    async fn row(&self, campaign_id: &CampaignId) -> Result<Arc<Mutex<Campaign>>> {
        self.campaigns
            .read()
            .await
            .get(campaign_id)
            .cloned()
            .ok_or_else(|| BrokerError::CampaignNotFound(campaign_id.0.clone()))
    }

    /// Materialize a campaign for a session: one queued recipient row per
    /// shortlisted carrier per enabled channel.
    pub async fn build_campaign(
        &self,
        session_id: &SessionId,
        order: &OrderSummary,
        shortlist: &[ShortlistEntry],
        channels: &[ChannelConfig],
    ) -> Result<CampaignId> {
        let now = Utc::now();
        let campaign_id = self.next_campaign_id(now).await;

        let plans: Vec<ChannelPlan> = channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| ChannelPlan {
                channel: c.channel,
                enabled: true,
                template_id: c.template_id.clone(),
                priority: c.priority,
                status: ChannelStatus::Pending,
                sent_at: None,
            })
            .collect();

        let mut recipients = Vec::with_capacity(shortlist.len() * plans.len());
        for entry in shortlist {
            for plan in &plans {
                recipients.push(Recipient::queued(
                    entry.carrier_id.clone(),
                    entry.carrier_name.clone(),
                    entry.contact_email.clone(),
                    plan.channel,
                    now,
                ));
            }
        }

        let mut campaign = Campaign {
            campaign_id: campaign_id.clone(),
            session_id: session_id.clone(),
            order_id: order.order_id.clone(),
            organization_id: order.organization_id.clone(),
            channels: plans,
            recipients,
            stats: CampaignStats::default(),
            reminders: Vec::new(),
            max_reminders: self.reminders.max_reminders,
            status: CampaignStatus::Scheduled,
            created_at: now,
            started_at: None,
            completed_at: None,
        };
        campaign.update_stats();

        info!(
            "Campaign {} scheduled for session {}: {} carriers across {} channels",
            campaign_id,
            session_id,
            shortlist.len(),
            campaign.channels.len()
        );

        self.campaigns
            .write()
            .await
            .insert(campaign_id.clone(), Arc::new(Mutex::new(campaign)));
        self.by_session
            .write()
            .await
            .insert(session_id.clone(), campaign_id.clone());
        Ok(campaign_id)
    }

    /// Send the initial wave. Each recipient row is sent concurrently; a
    /// failed send marks only that row, never the whole campaign.
    pub async fn dispatch(
        &self,
        campaign_id: &CampaignId,
        order: &OrderSummary,
    ) -> Result<DispatchReport> {
        let row = self.row(campaign_id).await?;

        // Snapshot the queued rows while flipping the campaign to Sending,
        // then release the lock for the sends themselves.
        let (targets, templates) = {
            let mut campaign = row.lock().await;
            if campaign.status != CampaignStatus::Scheduled {
                return Err(BrokerError::InvalidTransition(format!(
                    "campaign {} is {:?}, cannot dispatch",
                    campaign.campaign_id, campaign.status
                )));
            }
            campaign.status = CampaignStatus::Sending;
            campaign.started_at = Some(Utc::now());
            for plan in &mut campaign.channels {
                plan.status = ChannelStatus::Sending;
            }
            let templates: HashMap<Channel, String> = campaign
                .channels
                .iter()
                .map(|p| (p.channel, p.template_id.clone()))
                .collect();
            let targets: Vec<(CarrierId, Option<String>, Channel)> = campaign
                .recipients
                .iter()
                .map(|r| (r.carrier_id.clone(), r.contact_email.clone(), r.channel))
                .collect();
            (targets, templates)
        };

        let variables = order.template_variables();
        let sends = targets.into_iter().map(|(carrier_id, contact, channel)| {
            let delivery = Arc::clone(&self.delivery);
            let template_id = templates
                .get(&channel)
                .cloned()
                .unwrap_or_else(|| "opportunity_generic".to_string());
            let variables = variables.clone();
            async move {
                let outcome = delivery
                    .send(
                        channel,
                        &carrier_id,
                        contact.as_deref(),
                        &template_id,
                        variables,
                    )
                    .await;
                (carrier_id, channel, outcome)
            }
        });
        let outcomes = futures::future::join_all(sends).await;

        let now = Utc::now();
        let mut campaign = row.lock().await;
        let mut sent = 0usize;
        let mut failed = 0usize;
        let mut failed_channels: HashMap<Channel, usize> = HashMap::new();
        for (carrier_id, channel, outcome) in outcomes {
            let Some(recipient) = campaign.recipient_mut(&carrier_id, channel) else {
                continue;
            };
            match outcome {
                Ok(message_id) => {
                    recipient.mark_sent(message_id, now)?;
                    sent += 1;
                }
                Err(e) => {
                    warn!("Send to {} over {} failed: {}", carrier_id, channel, e);
                    recipient.mark_failed(e.to_string())?;
                    failed += 1;
                    *failed_channels.entry(channel).or_default() += 1;
                }
            }
        }
        let mut channel_totals: HashMap<Channel, usize> = HashMap::new();
        for recipient in &campaign.recipients {
            *channel_totals.entry(recipient.channel).or_default() += 1;
        }
        for plan in &mut campaign.channels {
            let channel_failures = failed_channels.get(&plan.channel).copied().unwrap_or(0);
            let channel_total = channel_totals.get(&plan.channel).copied().unwrap_or(0);
            plan.status = if channel_total > 0 && channel_failures == channel_total {
                ChannelStatus::Failed
            } else {
                ChannelStatus::Sent
            };
            plan.sent_at = Some(now);
        }
        campaign.status = if sent == 0 && failed > 0 {
            CampaignStatus::Failed
        } else {
            CampaignStatus::Sent
        };
        campaign.update_stats();
        campaign.refresh_completion(now);

        info!(
            "Campaign {} dispatched: {} sent, {} failed",
            campaign_id, sent, failed
        );
        Ok(DispatchReport {
            campaign_id: campaign_id.clone(),
            sent,
            failed,
        })
    }

    /// Ingest an asynchronous delivery event and return the refreshed stats
    pub async fn record_delivery_event(
        &self,
        campaign_id: &CampaignId,
        carrier_id: &CarrierId,
        channel: Channel,
        event: &DeliveryEvent,
    ) -> Result<CampaignStats> {
        let row = self.row(campaign_id).await?;
        let mut campaign = row.lock().await;
        campaign.apply_delivery_event(carrier_id, channel, event, Utc::now())?;
        debug!(
            "Campaign {} event {:?} for {} over {}",
            campaign_id, event, carrier_id, channel
        );
        Ok(campaign.stats)
    }

    /// Send a reminder wave on one channel to every recipient that was
    /// reached but has not responded. Capped by the reminder schedule, and
    /// each wave only becomes due at its configured delay after the
    /// initial send.
    pub async fn send_reminder(
        &self,
        campaign_id: &CampaignId,
        channel: Channel,
        order: &OrderSummary,
    ) -> Result<usize> {
        if !self.reminders.enabled {
            return Err(BrokerError::Configuration(
                "reminder schedule is disabled".to_string(),
            ));
        }
        let row = self.row(campaign_id).await?;

        let (targets, template_id) = {
            let campaign = row.lock().await;
            if campaign.status.is_terminal() {
                return Err(BrokerError::SessionClosed(campaign.session_id.0.clone()));
            }
            if campaign.reminders.len() as u32 >= campaign.max_reminders {
                return Err(BrokerError::ReminderLimitReached {
                    max: campaign.max_reminders,
                });
            }
            let started_at = campaign.started_at.ok_or_else(|| {
                BrokerError::InvalidTransition(format!(
                    "campaign {} has not been dispatched",
                    campaign.campaign_id
                ))
            })?;
            let wave_index = campaign.reminders.len();
            let delay_hours = self
                .reminders
                .delays_hours
                .get(wave_index)
                .or_else(|| self.reminders.delays_hours.last())
                .copied()
                .unwrap_or(0);
            let due_at = started_at + chrono::Duration::hours(delay_hours);
            if Utc::now() < due_at {
                return Err(BrokerError::InvalidTransition(format!(
                    "reminder wave {} for campaign {} not due until {}",
                    wave_index + 1,
                    campaign.campaign_id,
                    due_at
                )));
            }
            let template_id = campaign
                .channels
                .iter()
                .find(|p| p.channel == channel)
                .map(|p| p.template_id.clone())
                .unwrap_or_else(|| "opportunity_reminder".to_string());
            let targets: Vec<(CarrierId, Option<String>)> = campaign
                .non_respondents()
                .into_iter()
                .filter(|r| r.channel == channel)
                .map(|r| (r.carrier_id.clone(), r.contact_email.clone()))
                .collect();
            (targets, template_id)
        };

        if targets.is_empty() {
            debug!("Campaign {} has no reminder targets on {}", campaign_id, channel);
            return Ok(0);
        }

        let variables = order.template_variables();
        let sends = targets.into_iter().map(|(carrier_id, contact)| {
            let delivery = Arc::clone(&self.delivery);
            let template_id = template_id.clone();
            let variables = variables.clone();
            async move {
                let outcome = delivery
                    .send(channel, &carrier_id, contact.as_deref(), &template_id, variables)
                    .await;
                (carrier_id, outcome)
            }
        });
        let outcomes = futures::future::join_all(sends).await;

        let mut reached = 0usize;
        for (carrier_id, outcome) in &outcomes {
            match outcome {
                Ok(_) => reached += 1,
                Err(e) => warn!("Reminder to {} over {} failed: {}", carrier_id, channel, e),
            }
        }

        let mut campaign = row.lock().await;
        campaign.add_reminder(reached, channel, Utc::now());
        info!(
            "Campaign {} reminder wave {} on {}: {} carriers",
            campaign_id,
            campaign.reminders.len(),
            channel,
            reached
        );
        Ok(reached)
    }

    /// Wind the campaign down when its session reaches a terminal state.
    /// A campaign mid-flight is cancelled; a fully sent one is completed.
    pub async fn complete_for_session(&self, session_id: &SessionId) -> Result<()> {
        let campaign_id = match self.by_session.read().await.get(session_id).cloned() {
            Some(id) => id,
            None => return Ok(()),
        };
        let row = self.row(&campaign_id).await?;
        let mut campaign = row.lock().await;
        if campaign.status.is_terminal() {
            return Ok(());
        }
        let now = Utc::now();
        campaign.status = match campaign.status {
            CampaignStatus::Sent => CampaignStatus::Completed,
            _ => CampaignStatus::Cancelled,
        };
        campaign.completed_at = Some(now);
        info!(
            "Campaign {} closed with session {} ({:?})",
            campaign_id, session_id, campaign.status
        );
        Ok(())
    }

    pub async fn campaign_for_session(&self, session_id: &SessionId) -> Option<CampaignId> {
        self.by_session.read().await.get(session_id).cloned()
    }

    pub async fn campaign_stats(&self, campaign_id: &CampaignId) -> Result<CampaignPerformance> {
        let row = self.row(campaign_id).await?;
        let campaign = row.lock().await;
        Ok(CampaignPerformance {
            campaign_id: campaign.campaign_id.clone(),
            status: campaign.status,
            stats: campaign.stats,
            engagement_rate: campaign.engagement_rate(),
            open_rate: campaign.open_rate(),
            click_rate: campaign.click_rate(),
            reminders_sent: campaign.reminders.len(),
        })
    }

    /// Snapshot of the full campaign row
    pub async fn snapshot(&self, campaign_id: &CampaignId) -> Result<Campaign> {
        let row = self.row(campaign_id).await?;
        let campaign = row.lock().await;
        Ok(campaign.clone())
    }
}
