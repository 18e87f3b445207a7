//! Proposal scoring
//!
//! Pure price/quality/overall computation. No state, no I/O; the ledger
//! calls this on every proposal write, the CLI exposes it for inspection.

use serde::{Deserialize, Serialize};

/// Price weight in the overall score
const PRICE_WEIGHT: f64 = 0.4;
/// Quality weight in the overall score
const QUALITY_WEIGHT: f64 = 0.6;
/// Quality fallback when the carrier has no performance history
const DEFAULT_QUALITY: f64 = 50.0;

/// Computed scores for one proposal, each in [0, 100]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalScores {
    pub price: f64,
    pub quality: f64,
    pub overall: f64,
}

/// Score a proposed price against the session's reference price and the
/// carrier's historical performance signal (0-100, unknown defaults to 50).
pub fn score(
    proposed_price: f64,
    reference_price: f64,
    carrier_performance: Option<f64>,
) -> ProposalScores {
    let price = price_score(proposed_price, reference_price);
    let quality = carrier_performance.unwrap_or(DEFAULT_QUALITY).clamp(0.0, 100.0);
    let overall = PRICE_WEIGHT * price + QUALITY_WEIGHT * quality;

    ProposalScores {
        price: round2(price),
        quality: round2(quality),
        overall: round2(overall),
    }
}

/// Price score: 100 at or below reference, piecewise-linear penalty above.
///
/// The slopes chain from the unrounded value at each breakpoint, so the
/// curve is continuous at +15% (70) and +30% (25).
fn price_score(proposed: f64, reference: f64) -> f64 {
    if reference <= 0.0 {
        // No usable reference price: neutral score
        return 50.0;
    }

    let ratio = proposed / reference;

    if ratio <= 1.0 {
        let discount = (1.0 - ratio) * 100.0;
        (100.0 + discount * 0.5).min(100.0)
    } else {
        let excess = (ratio - 1.0) * 100.0;
        if excess <= 15.0 {
            100.0 - excess * 2.0
        } else if excess <= 30.0 {
            70.0 - (excess - 15.0) * 3.0
        } else {
            (25.0 - (excess - 30.0) * 1.25).max(0.0)
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
