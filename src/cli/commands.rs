//! CLI command definitions

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "freightbroker")]
#[command(about = "Freight order brokering engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scripted brokering session end-to-end against simulated
    /// collaborators
    Demo {
        /// Reference price for the demo transport order
        #[arg(short, long, default_value = "1000.0")]
        reference_price: f64,
    },

    /// Score a proposed price against a reference price
    Score {
        /// Proposed price
        #[arg(short, long)]
        price: f64,

        /// Reference price
        #[arg(short, long)]
        reference: f64,

        /// Carrier performance signal, 0-100 (defaults to neutral)
        #[arg(short, long)]
        quality: Option<f64>,
    },

    /// Seed stuck sessions and run one reaper sweep over them
    Reap {
        /// Age threshold in hours before a bootstrap session is reaped
        #[arg(short, long, default_value = "24")]
        threshold_hours: i64,

        /// How many stuck sessions to seed
        #[arg(short, long, default_value = "3")]
        sessions: u32,
    },
}
