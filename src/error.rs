//! Error types for the freight brokering engine

use thiserror::Error;

/// Main error type for brokering operations
#[derive(Error, Debug)]
pub enum BrokerError {
    // Lookup errors
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Proposal not found for carrier {carrier} in session {session}")]
    ProposalNotFound { session: String, carrier: String },

    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("Unknown recipient {carrier} on channel {channel} for campaign {campaign}")]
    UnknownRecipient {
        campaign: String,
        carrier: String,
        channel: String,
    },

    // Validation errors
    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Invalid delivery funnel transition: {from} -> {event}")]
    InvalidFunnelTransition { from: String, event: String },

    #[error("Negotiation round cap exceeded: round {round} of {max}")]
    RoundCapExceeded { round: u32, max: u32 },

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Reminder limit reached: {max} reminders already sent")]
    ReminderLimitReached { max: u32 },

    // Compliance
    #[error("Compliance check failed for carrier {0}: acceptance blocked")]
    ComplianceBlocked(String),

    // Delivery errors (recorded per recipient, never fatal for a campaign)
    #[error("Delivery failed on channel {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    // Concurrency
    #[error("Concurrent update conflict after {0} retries")]
    ConflictRetryExhausted(u32),

    // Configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for brokering operations
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BrokerError::SessionNotFound("BRK-20260314-0001".to_string());
        assert_eq!(err.to_string(), "Session not found: BRK-20260314-0001");

        let err = BrokerError::RoundCapExceeded { round: 3, max: 3 };
        assert_eq!(
            err.to_string(),
            "Negotiation round cap exceeded: round 3 of 3"
        );

        let err = BrokerError::UnknownRecipient {
            campaign: "BC2603140001".to_string(),
            carrier: "carrier_9".to_string(),
            channel: "email".to_string(),
        };
        assert!(err.to_string().contains("carrier_9"));
    }

    #[test]
    fn test_error_conversion() {
        fn io_error_function() -> Result<()> {
            std::fs::read_to_string("/nonexistent/file")?;
            Ok(())
        }

        let result = io_error_function();
        assert!(matches!(result.unwrap_err(), BrokerError::Io(_)));
    }
}
