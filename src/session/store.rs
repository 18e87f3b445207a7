//! Session store
//!
//! In-memory map of session rows, each behind its own mutex so distinct
//! sessions never contend. Session ids are date-bucketed with a per-day
//! sequence.

use crate::config::NegotiationSettings;
use crate::error::{BrokerError, Result};
use crate::types::{OrderId, SessionId, ShortlistEntry, Trigger};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use super::types::Session;

pub struct SessionStore {
    rows: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    sequence: Mutex<(NaiveDate, u32)>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            sequence: Mutex::new((Utc::now().date_naive(), 0)),
        }
    }

    async fn next_session_id(&self, now: DateTime<Utc>) -> SessionId {
        let today = now.date_naive();
        let mut seq = self.sequence.lock().await;
        if seq.0 != today {
            *seq = (today, 0);
        }
        seq.1 += 1;
        SessionId::new(today, seq.1)
    }

    /// Create and register a new pending session
    pub async fn create(
        &self,
        order_id: OrderId,
        organization_id: String,
        trigger: Trigger,
        shortlist: Vec<ShortlistEntry>,
        reference_price: f64,
        negotiation_settings: NegotiationSettings,
    ) -> Result<Session> {
        let now = Utc::now();
        let session_id = self.next_session_id(now).await;
        let session = Session::new(
            session_id.clone(),
            order_id,
            organization_id,
            trigger,
            shortlist,
            reference_price,
            negotiation_settings,
            now,
        );
        info!(
            "Session {} created for order {} ({} shortlisted carriers)",
            session_id,
            session.order_id,
            session.shortlist.len()
        );
        self.rows
            .write()
            .await
            .insert(session_id, Arc::new(Mutex::new(session.clone())));
        Ok(session)
    }

    async fn row(&self, session_id: &SessionId) -> Result<Arc<Mutex<Session>>> {
        self.rows
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| BrokerError::SessionNotFound(session_id.0.clone()))
    }

    /// Point-in-time snapshot
    pub async fn get(&self, session_id: &SessionId) -> Result<Session> {
        let row = self.row(session_id).await?;
        let session = row.lock().await;
        Ok(session.clone())
    }

    /// Run a serialized mutation against one session row. Status checks
    /// inside the closure see the current value; two concurrent
    /// transitions cannot both succeed.
    pub async fn update<T>(
        &self,
        session_id: &SessionId,
        f: impl FnOnce(&mut Session) -> Result<T>,
    ) -> Result<T> {
        let row = self.row(session_id).await?;
        let mut session = row.lock().await;
        f(&mut session)
    }

    /// Ids of sessions stuck in a bootstrap state since before `cutoff`
    pub async fn list_stuck(&self, cutoff: DateTime<Utc>) -> Vec<SessionId> {
        let rows: Vec<_> = {
            let rows = self.rows.read().await;
            rows.values().cloned().collect()
        };

        let mut stuck = Vec::new();
        for row in rows {
            let session = row.lock().await;
            if session.status.is_bootstrap() && session.created_at < cutoff {
                stuck.push(session.session_id.clone());
            }
        }
        stuck
    }

    pub async fn ids(&self) -> Vec<SessionId> {
        self.rows.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::SessionStatus;

    async fn create(store: &SessionStore) -> Session {
        store
            .create(
                OrderId("ORD-1".to_string()),
                "org-1".to_string(),
                Trigger::manual("carrier cancelled"),
                Vec::new(),
                1000.0,
                NegotiationSettings::default(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_per_day_sequential_ids() {
        let store = SessionStore::new();
        let first = create(&store).await;
        let second = create(&store).await;

        let prefix = format!("BRK-{}-", Utc::now().format("%Y%m%d"));
        assert!(first.session_id.0.starts_with(&prefix));
        assert_eq!(first.session_id.0, format!("{}0001", prefix));
        assert_eq!(second.session_id.0, format!("{}0002", prefix));
    }

    #[tokio::test]
    async fn test_get_unknown_session() {
        let store = SessionStore::new();
        let result = store.get(&SessionId("BRK-19990101-0001".to_string())).await;
        assert!(matches!(
            result.unwrap_err(),
            BrokerError::SessionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_update_is_serialized_per_row() {
        let store = Arc::new(SessionStore::new());
        let session = create(&store).await;

        // Two concurrent transitions out of Pending: exactly one wins
        let id_a = session.session_id.clone();
        let id_b = session.session_id.clone();
        let store_a = store.clone();
        let store_b = store.clone();
        let now = Utc::now();
        let a = tokio::spawn(async move {
            store_a
                .update(&id_a, |s| s.transition_to(SessionStatus::Analyzing, now))
                .await
        });
        let b = tokio::spawn(async move {
            store_b
                .update(&id_b, |s| s.transition_to(SessionStatus::Analyzing, now))
                .await
        });
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

        let current = store.get(&session.session_id).await.unwrap();
        assert_eq!(current.status, SessionStatus::Analyzing);
    }

    #[tokio::test]
    async fn test_list_stuck_only_bootstrap_and_old() {
        let store = SessionStore::new();
        let old = create(&store).await;
        let fresh = create(&store).await;

        // Backdate both past the cutoff, then close the second: only live
        // bootstrap sessions qualify
        for id in [&old.session_id, &fresh.session_id] {
            store
                .update(id, |s| {
                    s.created_at = Utc::now() - chrono::Duration::hours(48);
                    Ok(())
                })
                .await
                .unwrap();
        }
        store
            .update(&fresh.session_id, |s| s.fail("manual abort", Utc::now()))
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let stuck = store.list_stuck(cutoff).await;
        assert_eq!(stuck, vec![old.session_id]);
    }
}
