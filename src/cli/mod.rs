//! CLI module for the freight broker

pub mod app;
pub mod commands;

pub use app::BrokerApp;
pub use commands::{Cli, Commands};
