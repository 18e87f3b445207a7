//! Freight order brokering core
//!
//! When a transport order loses its carrier, a brokering session runs the
//! order through a multi-channel broadcast to shortlisted carriers,
//! collects and scores their price proposals, negotiates within bounded
//! rounds and closes on a winning offer. Stuck sessions are reclaimed by
//! a background reaper.

pub mod broadcast;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod negotiation;
pub mod proposal;
pub mod reaper;
pub mod scoring;
pub mod session;
pub mod types;

pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
