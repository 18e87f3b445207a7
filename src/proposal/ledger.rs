//! Proposal ledger
//!
//! Persists proposals keyed by `(session_id, carrier_id)` and answers
//! ranking and best-offer queries. Scores are recomputed on every write;
//! a caller-supplied score is never trusted.
//!
//! Concurrency is scoped per row: the map lock is held only for lookup and
//! insert, each proposal sits behind its own mutex, so carriers submitting
//! against the same session never block each other.

use crate::error::{BrokerError, Result};
use crate::scoring::{self, ProposalScores};
use crate::types::{CarrierId, OrderId, SessionId};
use crate::config::SelectionCriterion;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::types::{Proposal, ProposalDraft, ProposalStatus, VigilanceCheck};

/// Composite key: one active proposal per carrier per session
pub type ProposalKey = (SessionId, CarrierId);

/// One row of a session ranking
#[derive(Clone, Debug, Serialize)]
pub struct RankedProposal {
    pub rank: usize,
    pub carrier_id: CarrierId,
    pub carrier_name: String,
    pub proposed_price: f64,
    pub scores: ProposalScores,
    pub status: ProposalStatus,
    pub submitted_at: DateTime<Utc>,
}

/// In-memory proposal store with per-row locking
#[derive(Default)]
pub struct ProposalLedger {
    rows: RwLock<HashMap<ProposalKey, Arc<Mutex<Proposal>>>>,
}

impl ProposalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit or replace a carrier's proposal for a session.
    ///
    /// A resubmission during an open window replaces the carrier's own row
    /// under its lock (compare-and-set on status), keeping the negotiation
    /// history and the original `submitted_at`. Terminal rows stay terminal.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &self,
        session_id: SessionId,
        order_id: OrderId,
        reference_price: f64,
        performance: Option<f64>,
        vigilance: VigilanceCheck,
        max_negotiation_rounds: u32,
        draft: ProposalDraft,
    ) -> Result<Proposal> {
        let key = (session_id.clone(), draft.carrier_id.clone());
        let scores = scoring::score(draft.proposed_price, reference_price, performance);

        let existing = {
            let rows = self.rows.read().await;
            rows.get(&key).cloned()
        };

        if let Some(row) = existing {
            let mut proposal = row.lock().await;
            if proposal.status.is_terminal() {
                return Err(BrokerError::InvalidProposal(format!(
                    "carrier {} already has a {:?} proposal for session {}",
                    draft.carrier_id, proposal.status, session_id
                )));
            }
            apply_draft(&mut proposal, draft, scores, vigilance);
            tracing::debug!(
                "Replaced proposal from {} for {} at {}",
                proposal.carrier_id,
                session_id,
                proposal.proposed_price
            );
            return Ok(proposal.clone());
        }

        let mut rows = self.rows.write().await;
        // A concurrent first submission from the same carrier may have won
        // the race; this one becomes a full replacement of that row.
        if let Some(row) = rows.get(&key) {
            let mut current = row.lock().await;
            if current.status.is_terminal() {
                return Err(BrokerError::InvalidProposal(format!(
                    "carrier {} already has a {:?} proposal for session {}",
                    draft.carrier_id, current.status, session_id
                )));
            }
            apply_draft(&mut current, draft, scores, vigilance);
            return Ok(current.clone());
        }

        let proposal = Proposal {
            session_id: session_id.clone(),
            order_id,
            carrier_id: draft.carrier_id.clone(),
            carrier_name: draft.carrier_name,
            proposed_price: draft.proposed_price,
            price_breakdown: draft.price_breakdown,
            vehicle_type: draft.vehicle_type,
            driver_name: draft.driver_name,
            services: draft.services,
            estimated_pickup_date: draft.estimated_pickup_date,
            estimated_delivery_date: draft.estimated_delivery_date,
            status: ProposalStatus::Pending,
            scores,
            negotiation_history: Vec::new(),
            max_negotiation_rounds,
            vigilance: Some(vigilance),
            response: None,
            submitted_at: Utc::now(),
            responded_at: None,
        };
        rows.insert(key, Arc::new(Mutex::new(proposal.clone())));
        tracing::info!(
            "Recorded proposal from {} for {} at {}",
            proposal.carrier_id,
            session_id,
            proposal.proposed_price
        );
        Ok(proposal)
    }

    /// Run a serialized mutation against one proposal row
    pub async fn update<T>(
        &self,
        key: &ProposalKey,
        f: impl FnOnce(&mut Proposal) -> Result<T>,
    ) -> Result<T> {
        let row = {
            let rows = self.rows.read().await;
            rows.get(key)
                .cloned()
                .ok_or_else(|| BrokerError::ProposalNotFound {
                    session: key.0 .0.clone(),
                    carrier: key.1 .0.clone(),
                })?
        };
        let mut proposal = row.lock().await;
        f(&mut proposal)
    }

    pub async fn get(&self, key: &ProposalKey) -> Option<Proposal> {
        let row = {
            let rows = self.rows.read().await;
            rows.get(key).cloned()
        }?;
        let proposal = row.lock().await;
        Some(proposal.clone())
    }

    /// All proposals for a session, unsorted
    pub async fn for_session(&self, session_id: &SessionId) -> Vec<Proposal> {
        let rows: Vec<_> = {
            let rows = self.rows.read().await;
            rows.iter()
                .filter(|((sid, _), _)| sid == session_id)
                .map(|(_, row)| row.clone())
                .collect()
        };

        let mut proposals = Vec::with_capacity(rows.len());
        for row in rows {
            proposals.push(row.lock().await.clone());
        }
        proposals
    }

    /// Ranked list for a session: descending overall score, ties broken by
    /// earlier submission time.
    pub async fn ranking(&self, session_id: &SessionId) -> Vec<RankedProposal> {
        let mut proposals = self.for_session(session_id).await;
        proposals.sort_by(|a, b| {
            b.scores
                .overall
                .partial_cmp(&a.scores.overall)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.submitted_at.cmp(&b.submitted_at))
        });

        proposals
            .into_iter()
            .enumerate()
            .map(|(i, p)| RankedProposal {
                rank: i + 1,
                carrier_id: p.carrier_id,
                carrier_name: p.carrier_name,
                proposed_price: p.proposed_price,
                scores: p.scores,
                status: p.status,
                submitted_at: p.submitted_at,
            })
            .collect()
    }

    /// Best proposal under a criterion, restricted to selectable statuses
    pub async fn best(
        &self,
        session_id: &SessionId,
        criterion: SelectionCriterion,
    ) -> Option<Proposal> {
        let mut candidates: Vec<Proposal> = self
            .for_session(session_id)
            .await
            .into_iter()
            .filter(|p| p.status.is_selectable())
            .collect();

        candidates.sort_by(|a, b| {
            let ordering = match criterion {
                SelectionCriterion::BestPrice => a
                    .proposed_price
                    .partial_cmp(&b.proposed_price)
                    .unwrap_or(std::cmp::Ordering::Equal),
                SelectionCriterion::BestQuality => b
                    .scores
                    .quality
                    .partial_cmp(&a.scores.quality)
                    .unwrap_or(std::cmp::Ordering::Equal),
                SelectionCriterion::Overall => b
                    .scores
                    .overall
                    .partial_cmp(&a.scores.overall)
                    .unwrap_or(std::cmp::Ordering::Equal),
            };
            ordering.then(a.submitted_at.cmp(&b.submitted_at))
        });

        candidates.into_iter().next()
    }
}

/// Overwrite a row with a fresh draft. Negotiation history, status and the
/// original `submitted_at` survive; everything the carrier sent is replaced,
/// along with the recomputed scores and the new vigilance snapshot.
fn apply_draft(
    proposal: &mut Proposal,
    draft: ProposalDraft,
    scores: ProposalScores,
    vigilance: VigilanceCheck,
) {
    proposal.proposed_price = draft.proposed_price;
    proposal.price_breakdown = draft.price_breakdown;
    proposal.vehicle_type = draft.vehicle_type;
    proposal.driver_name = draft.driver_name;
    proposal.services = draft.services;
    proposal.estimated_pickup_date = draft.estimated_pickup_date;
    proposal.estimated_delivery_date = draft.estimated_delivery_date;
    proposal.scores = scores;
    proposal.vigilance = Some(vigilance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::types::{PriceBreakdown, ServiceAddOns};
    use crate::types::Actor;

    fn draft(carrier: &str, price: f64) -> ProposalDraft {
        ProposalDraft {
            carrier_id: CarrierId(carrier.to_string()),
            carrier_name: carrier.to_uppercase(),
            proposed_price: price,
            price_breakdown: PriceBreakdown::default(),
            vehicle_type: None,
            driver_name: None,
            services: ServiceAddOns::default(),
            estimated_pickup_date: None,
            estimated_delivery_date: None,
        }
    }

    fn session() -> SessionId {
        SessionId("BRK-20260314-0001".to_string())
    }

    async fn submit(
        ledger: &ProposalLedger,
        carrier: &str,
        price: f64,
        perf: Option<f64>,
    ) -> Proposal {
        ledger
            .submit(
                session(),
                OrderId("ORD-1".to_string()),
                1000.0,
                perf,
                VigilanceCheck::passing(Utc::now()),
                3,
                draft(carrier, price),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_computes_scores() {
        let ledger = ProposalLedger::new();
        let proposal = submit(&ledger, "carrier_a", 1200.0, Some(90.0)).await;

        assert_eq!(proposal.scores.price, 55.0);
        assert_eq!(proposal.scores.overall, 76.0);
        assert_eq!(proposal.status, ProposalStatus::Pending);
    }

    #[tokio::test]
    async fn test_resubmission_replaces_own_row() {
        let ledger = ProposalLedger::new();
        let first = submit(&ledger, "carrier_a", 1300.0, None).await;
        let second = submit(&ledger, "carrier_a", 1100.0, None).await;

        assert_eq!(second.proposed_price, 1100.0);
        assert_eq!(second.submitted_at, first.submitted_at);
        assert_eq!(ledger.for_session(&session()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_resubmission_carries_full_draft() {
        let ledger = ProposalLedger::new();
        submit(&ledger, "carrier_a", 1300.0, None).await;

        let pickup = Utc::now() + chrono::Duration::days(2);
        let mut revised = draft("carrier_a", 1100.0);
        revised.price_breakdown = PriceBreakdown {
            base: 950.0,
            fuel: 100.0,
            services: 50.0,
            taxes: 0.0,
            discount: 0.0,
        };
        revised.vehicle_type = Some("semi-trailer".to_string());
        revised.driver_name = Some("J. Martin".to_string());
        revised.services.tailgate = true;
        revised.estimated_pickup_date = Some(pickup);

        let second = ledger
            .submit(
                session(),
                OrderId("ORD-1".to_string()),
                1000.0,
                Some(80.0),
                VigilanceCheck::passing(Utc::now()),
                3,
                revised,
            )
            .await
            .unwrap();

        assert_eq!(second.proposed_price, 1100.0);
        assert_eq!(second.price_breakdown.base, 950.0);
        assert_eq!(second.vehicle_type.as_deref(), Some("semi-trailer"));
        assert_eq!(second.driver_name.as_deref(), Some("J. Martin"));
        assert!(second.services.tailgate);
        assert_eq!(second.estimated_pickup_date, Some(pickup));
        assert_eq!(second.scores.quality, 80.0);
        assert!(second.vigilance.unwrap().overall);
    }

    #[tokio::test]
    async fn test_resubmission_after_rejection_is_an_error() {
        let ledger = ProposalLedger::new();
        submit(&ledger, "carrier_a", 1300.0, None).await;

        let key = (session(), CarrierId("carrier_a".to_string()));
        ledger
            .update(&key, |p| p.reject(Actor::User, "too expensive"))
            .await
            .unwrap();

        let result = ledger
            .submit(
                session(),
                OrderId("ORD-1".to_string()),
                1000.0,
                None,
                VigilanceCheck::passing(Utc::now()),
                3,
                draft("carrier_a", 900.0),
            )
            .await;
        assert!(matches!(
            result.unwrap_err(),
            BrokerError::InvalidProposal(_)
        ));
    }

    #[tokio::test]
    async fn test_ranking_ties_broken_by_submission_time() {
        let ledger = ProposalLedger::new();
        // Both land at overall 76 (scenario from the scoring tests)
        submit(&ledger, "carrier_a", 950.0, Some(60.0)).await;
        tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
        submit(&ledger, "carrier_b", 1200.0, Some(90.0)).await;

        let ranking = ledger.ranking(&session()).await;
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].carrier_id.0, "carrier_a");
        assert_eq!(ranking[0].scores.overall, 76.0);
        assert_eq!(ranking[1].scores.overall, 76.0);
    }

    #[tokio::test]
    async fn test_best_by_criterion() {
        let ledger = ProposalLedger::new();
        submit(&ledger, "cheap", 900.0, Some(40.0)).await;
        submit(&ledger, "quality", 1250.0, Some(95.0)).await;

        let best_price = ledger
            .best(&session(), SelectionCriterion::BestPrice)
            .await
            .unwrap();
        assert_eq!(best_price.carrier_id.0, "cheap");

        let best_quality = ledger
            .best(&session(), SelectionCriterion::BestQuality)
            .await
            .unwrap();
        assert_eq!(best_quality.carrier_id.0, "quality");
    }

    #[tokio::test]
    async fn test_best_skips_non_selectable() {
        let ledger = ProposalLedger::new();
        submit(&ledger, "carrier_a", 900.0, Some(90.0)).await;
        submit(&ledger, "carrier_b", 1100.0, Some(50.0)).await;

        let key = (session(), CarrierId("carrier_a".to_string()));
        ledger.update(&key, |p| p.expire()).await.unwrap();

        let best = ledger
            .best(&session(), SelectionCriterion::Overall)
            .await
            .unwrap();
        assert_eq!(best.carrier_id.0, "carrier_b");
    }

    #[tokio::test]
    async fn test_concurrent_submissions_from_distinct_carriers() {
        let ledger = Arc::new(ProposalLedger::new());

        let mut handles = Vec::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .submit(
                        session(),
                        OrderId("ORD-1".to_string()),
                        1000.0,
                        Some(50.0),
                        VigilanceCheck::passing(Utc::now()),
                        3,
                        draft(&format!("carrier_{}", i), 1000.0 + i as f64),
                    )
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ledger.for_session(&session()).await.len(), 16);
    }
}
