//! Timeout reaper
//!
//! Background sweep that fails sessions stuck in a bootstrap state
//! (Pending, Analyzing, Broadcasting) for longer than the configured
//! threshold. Each candidate's status is re-checked under its row lock,
//! so a session that progressed or closed between the scan and the write
//! is left alone and a repeated sweep is a no-op.

use crate::session::SessionStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

pub const REAP_REASON: &str = "session timeout - automatic cleanup";

pub struct Reaper {
    store: Arc<SessionStore>,
    stuck_threshold: Duration,
    interval: std::time::Duration,
}

impl Reaper {
    pub fn new(store: Arc<SessionStore>, stuck_threshold_hours: i64, interval_secs: u64) -> Self {
        Self {
            store,
            stuck_threshold: Duration::hours(stuck_threshold_hours),
            interval: std::time::Duration::from_secs(interval_secs),
        }
    }

    /// One pass; returns how many sessions were reaped
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.stuck_threshold;
        let candidates = self.store.list_stuck(cutoff).await;

        let mut reaped = 0usize;
        for session_id in candidates {
            let outcome = self
                .store
                .update(&session_id, |session| {
                    // Re-check under the lock: the session may have moved
                    // on since the scan
                    if !session.status.is_bootstrap() || session.created_at >= cutoff {
                        return Ok(false);
                    }
                    session.fail(REAP_REASON, now)?;
                    Ok(true)
                })
                .await;
            match outcome {
                Ok(true) => {
                    info!("Reaped stuck session {}", session_id);
                    reaped += 1;
                }
                Ok(false) => {}
                Err(e) => debug!("Skipping session {}: {}", session_id, e),
            }
        }

        if reaped > 0 {
            info!("Reaper sweep failed {} stuck sessions", reaped);
        } else {
            debug!("Reaper sweep found nothing to clean");
        }
        reaped
    }

    /// Periodic sweep loop; runs until the task is dropped
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.sweep(Utc::now()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NegotiationSettings;
    use crate::session::SessionStatus;
    use crate::types::{OrderId, SessionId, Trigger};

    async fn seed_session(store: &SessionStore, age_hours: i64) -> SessionId {
        let session = store
            .create(
                OrderId("ORD-1".to_string()),
                "org-1".to_string(),
                Trigger::manual("carrier cancelled"),
                Vec::new(),
                1000.0,
                NegotiationSettings::default(),
            )
            .await
            .unwrap();
        let id = session.session_id;
        store
            .update(&id, |s| {
                s.created_at = Utc::now() - Duration::hours(age_hours);
                Ok(())
            })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_sweep_fails_only_stuck_sessions() {
        let store = Arc::new(SessionStore::new());
        let stuck = seed_session(&store, 30).await;
        let fresh = seed_session(&store, 1).await;
        let reaper = Reaper::new(store.clone(), 24, 300);

        assert_eq!(reaper.sweep(Utc::now()).await, 1);

        let reaped = store.get(&stuck).await.unwrap();
        assert_eq!(reaped.status, SessionStatus::Failed);
        assert_eq!(reaped.closed_reason.as_deref(), Some(REAP_REASON));
        assert!(reaped.closed_at.is_some());

        let untouched = store.get(&fresh).await.unwrap();
        assert_eq!(untouched.status, SessionStatus::Pending);
        assert!(untouched.closed_at.is_none());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let store = Arc::new(SessionStore::new());
        let stuck = seed_session(&store, 30).await;
        let reaper = Reaper::new(store.clone(), 24, 300);

        assert_eq!(reaper.sweep(Utc::now()).await, 1);
        let after_first = store.get(&stuck).await.unwrap();

        // Second pass finds nothing and changes nothing
        assert_eq!(reaper.sweep(Utc::now()).await, 0);
        let after_second = store.get(&stuck).await.unwrap();
        assert_eq!(after_second.status, SessionStatus::Failed);
        assert_eq!(after_second.timeline.len(), after_first.timeline.len());
        assert_eq!(after_second.closed_at, after_first.closed_at);
    }

    #[tokio::test]
    async fn test_session_stuck_in_broadcasting_is_reaped_past_threshold() {
        let store = Arc::new(SessionStore::new());
        let id = seed_session(&store, 0).await;
        let created_at = Utc::now() - Duration::hours(24) - Duration::minutes(1);
        store
            .update(&id, |s| {
                s.created_at = created_at;
                s.transition_to(SessionStatus::Analyzing, created_at)?;
                s.transition_to(SessionStatus::Broadcasting, created_at)
            })
            .await
            .unwrap();

        let reaper = Reaper::new(store.clone(), 24, 300);
        assert_eq!(reaper.sweep(Utc::now()).await, 1);

        let session = store.get(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.closed_reason.as_deref(), Some(REAP_REASON));
    }

    #[tokio::test]
    async fn test_sweep_leaves_terminal_sessions_alone() {
        let store = Arc::new(SessionStore::new());
        let id = seed_session(&store, 30).await;
        store
            .update(&id, |s| s.fail("manual abort", Utc::now()))
            .await
            .unwrap();

        let reaper = Reaper::new(store.clone(), 24, 300);
        assert_eq!(reaper.sweep(Utc::now()).await, 0);
        assert_eq!(
            store.get(&id).await.unwrap().closed_reason.as_deref(),
            Some("manual abort")
        );
    }
}
