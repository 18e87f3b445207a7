//! External collaborator seams
//!
//! The core only decides what to send and to whom; delivery mechanics,
//! compliance verification and the carrier performance store live behind
//! these traits. Simulated implementations back the demo and tests.

use crate::error::{BrokerError, Result};
use crate::proposal::VigilanceCheck;
use crate::types::{CarrierId, Channel};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

/// Delivery collaborator: email / board / push sends
#[async_trait]
pub trait DeliveryService: Send + Sync {
    /// Dispatch one message; returns the collaborator's message id
    async fn send(
        &self,
        channel: Channel,
        carrier_id: &CarrierId,
        contact_email: Option<&str>,
        template_id: &str,
        variables: serde_json::Value,
    ) -> Result<String>;
}

/// Compliance/vigilance collaborator
#[async_trait]
pub trait ComplianceService: Send + Sync {
    async fn check_compliance(&self, carrier_id: &CarrierId) -> Result<VigilanceCheck>;
}

/// Carrier historical performance signal (0-100), opaque to the core
#[async_trait]
pub trait PerformanceSource: Send + Sync {
    async fn carrier_performance(&self, carrier_id: &CarrierId) -> Result<Option<f64>>;
}

/// In-process delivery stand-in: generates message ids, optionally fails
/// configured carriers to exercise the per-recipient error path.
#[derive(Default)]
pub struct SimulatedDelivery {
    failing: Mutex<Vec<CarrierId>>,
}

impl SimulatedDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, carrier_id: CarrierId) {
        self.failing
            .lock()
            .expect("failing list poisoned")
            .push(carrier_id);
    }
}

#[async_trait]
impl DeliveryService for SimulatedDelivery {
    async fn send(
        &self,
        channel: Channel,
        carrier_id: &CarrierId,
        _contact_email: Option<&str>,
        template_id: &str,
        _variables: serde_json::Value,
    ) -> Result<String> {
        let failing = self
            .failing
            .lock()
            .expect("failing list poisoned")
            .contains(carrier_id);
        if failing {
            return Err(BrokerError::DeliveryFailed {
                channel: channel.to_string(),
                reason: format!("simulated failure for {}", carrier_id),
            });
        }
        tracing::debug!(
            "Simulated {} send to {} with template {}",
            channel,
            carrier_id,
            template_id
        );
        Ok(format!("sim-{}-{:08x}", channel, rand::random::<u32>()))
    }
}

/// Compliance stand-in: passes every carrier except the blacklisted ones
#[derive(Default)]
pub struct SimulatedCompliance {
    blacklisted: Mutex<Vec<CarrierId>>,
}

impl SimulatedCompliance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blacklist(&self, carrier_id: CarrierId) {
        self.blacklisted
            .lock()
            .expect("blacklist poisoned")
            .push(carrier_id);
    }
}

#[async_trait]
impl ComplianceService for SimulatedCompliance {
    async fn check_compliance(&self, carrier_id: &CarrierId) -> Result<VigilanceCheck> {
        let blacklisted = self
            .blacklisted
            .lock()
            .expect("blacklist poisoned")
            .contains(carrier_id);
        let mut check = VigilanceCheck::passing(Utc::now());
        if blacklisted {
            check.blacklist_clean = false;
            check.overall = false;
        }
        Ok(check)
    }
}

/// Static in-memory performance store
#[derive(Default)]
pub struct StaticPerformance {
    scores: Mutex<HashMap<CarrierId, f64>>,
}

impl StaticPerformance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, carrier_id: CarrierId, score: f64) {
        self.scores
            .lock()
            .expect("score map poisoned")
            .insert(carrier_id, score);
    }
}

#[async_trait]
impl PerformanceSource for StaticPerformance {
    async fn carrier_performance(&self, carrier_id: &CarrierId) -> Result<Option<f64>> {
        Ok(self
            .scores
            .lock()
            .expect("score map poisoned")
            .get(carrier_id)
            .copied())
    }
}
