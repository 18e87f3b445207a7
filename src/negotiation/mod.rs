//! Bounded price negotiation over proposals

pub mod engine;

pub use engine::{CounterOffer, EvaluationOutcome, NegotiationEngine};
