//! Broker configuration

use crate::types::Channel;
use serde::{Deserialize, Serialize};

/// Criterion used to pick the winning proposal
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionCriterion {
    BestPrice,
    BestQuality,
    #[default]
    Overall,
}

/// Per-session negotiation parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationSettings {
    /// Maximum acceptable price in % over the reference price
    pub max_price_increase: f64,
    /// Auto-accept when the proposed price is within this % of the reference
    pub auto_accept_threshold: f64,
    /// Hard cap on counter-offer rounds per proposal
    pub max_rounds: u32,
    /// Soft deadline for responses, in hours
    pub response_timeout_hours: i64,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            max_price_increase: 15.0,
            auto_accept_threshold: 0.0,
            max_rounds: 3,
            response_timeout_hours: 24,
        }
    }
}

/// Reminder wave scheduling for a campaign
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderSchedule {
    pub enabled: bool,
    /// Delays after the initial send, in hours
    pub delays_hours: Vec<i64>,
    pub max_reminders: u32,
}

impl Default for ReminderSchedule {
    fn default() -> Self {
        Self {
            enabled: true,
            delays_hours: vec![4, 12],
            max_reminders: 2,
        }
    }
}

/// Dispatch priority for a channel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Per-channel campaign configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: Channel,
    pub enabled: bool,
    pub template_id: String,
    pub priority: Priority,
}

impl ChannelConfig {
    pub fn enabled_defaults() -> Vec<Self> {
        vec![
            Self {
                channel: Channel::Email,
                enabled: true,
                template_id: "opportunity_email".to_string(),
                priority: Priority::Normal,
            },
            Self {
                channel: Channel::Board,
                enabled: true,
                template_id: "opportunity_board".to_string(),
                priority: Priority::Normal,
            },
            Self {
                channel: Channel::Push,
                enabled: true,
                template_id: "opportunity_push".to_string(),
                priority: Priority::High,
            },
        ]
    }
}

/// Top-level broker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub negotiation: NegotiationSettings,
    pub reminders: ReminderSchedule,
    pub channels: Vec<ChannelConfig>,
    pub selection: SelectionCriterion,
    /// Minimum window before a session may advance on the first proposal, in minutes
    pub min_response_window_minutes: i64,
    /// Overall score at which a proposal immediately advances the session
    pub auto_advance_score: f64,
    /// Sessions stuck in a bootstrap state longer than this are reaped, in hours
    pub stuck_threshold_hours: i64,
    /// Reaper sweep interval, in seconds
    pub reaper_interval_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            negotiation: NegotiationSettings::default(),
            reminders: ReminderSchedule::default(),
            channels: ChannelConfig::enabled_defaults(),
            selection: SelectionCriterion::default(),
            min_response_window_minutes: 30,
            auto_advance_score: 75.0,
            stuck_threshold_hours: 24,
            reaper_interval_secs: 300,
        }
    }
}
