//! Core types used throughout the freight brokering engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a brokering session (date-bucketed, per-day sequence)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Build a session id for a given day and per-day sequence number
    pub fn new(day: NaiveDate, sequence: u32) -> Self {
        Self(format!("BRK-{}-{:04}", day.format("%Y%m%d"), sequence))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport order identifier (owned by the external order-intake flow)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Carrier identifier (identity data lives outside the core)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CarrierId(pub String);

impl fmt::Display for CarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a broadcast campaign (date-bucketed, per-day sequence)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub String);

impl CampaignId {
    /// Build a campaign id for a given day and per-day sequence number
    pub fn new(day: NaiveDate, sequence: u32) -> Self {
        Self(format!("BC{}{:04}", day.format("%y%m%d"), sequence))
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broadcast channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Board,
    Push,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Board => write!(f, "board"),
            Channel::Push => write!(f, "push"),
        }
    }
}

/// Who performed an action on a proposal or session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Carrier,
    Engine,
    User,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Carrier => write!(f, "carrier"),
            Actor::Engine => write!(f, "engine"),
            Actor::User => write!(f, "user"),
        }
    }
}

/// Why a session was started
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    AutoFailure,
    TechnicalIncapacity,
    Manual,
}

/// Session trigger record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub reason: String,
    pub triggered_by: Option<String>,
    pub triggered_at: DateTime<Utc>,
}

impl Trigger {
    pub fn manual(reason: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Manual,
            reason: reason.into(),
            triggered_by: None,
            triggered_at: Utc::now(),
        }
    }
}

/// Contact details for one shortlisted carrier
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShortlistEntry {
    pub carrier_id: CarrierId,
    pub carrier_name: String,
    pub match_score: f64,
    pub estimated_price: Option<f64>,
    pub contact_email: Option<String>,
}
