//! Multi-channel broadcast campaigns

pub mod campaign;
pub mod orchestrator;

pub use campaign::{
    Campaign, CampaignStats, CampaignStatus, ChannelPlan, ChannelStatus, DeliveryEvent,
    FunnelState, Recipient, ReminderWave,
};
pub use orchestrator::{BroadcastOrchestrator, CampaignPerformance, DispatchReport, OrderSummary};
