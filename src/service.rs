//! Deal mutations: suppression check, persistence, and change publication.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::error::{AppError, Result};
use crate::fanout::{FanOut, StreamEvent};
use crate::state::DealStore;
use crate::suppression::SuppressionEngine;
use crate::types::{Deal, DealFilter, Decision, NewDeal, SuppressionEntry};

/// Result of a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Stored(Deal),
    Suppressed { threshold: f64 },
}

pub struct DealService<S> {
    store: Arc<S>,
    engine: SuppressionEngine<S>,
    fanout: Arc<FanOut>,
    health: Arc<HealthState>,
    list_limit: i64,
    /// Held from the store write through the publish so subscribers see
    /// changes in the order they were committed.
    commit_lock: Mutex<()>,
}

impl<S: DealStore> DealService<S> {
    pub fn new(
        store: Arc<S>,
        engine: SuppressionEngine<S>,
        fanout: Arc<FanOut>,
        health: Arc<HealthState>,
        list_limit: i64,
    ) -> Self {
        Self {
            store,
            engine,
            fanout,
            health,
            list_limit: list_limit.max(1),
            commit_lock: Mutex::new(()),
        }
    }

    /// Store a submission unless an active suppression window rejects it.
    ///
    /// The window's floor is only tightened once the deal is stored, so a
    /// failed write leaves the suppression table untouched.
    pub async fn submit(&self, deal: NewDeal, now_ms: i64) -> Result<SubmitOutcome> {
        if let Decision::Suppress { threshold } = self.engine.evaluate(&deal, now_ms).await? {
            self.health.inc_suppressed();
            return Ok(SubmitOutcome::Suppressed { threshold });
        }

        let stored = {
            let _commit = self.commit_lock.lock().await;
            let stored = self.store.upsert_deal(&deal, now_ms).await?;
            self.fanout.publish(StreamEvent::DealUpserted(stored.clone()));
            stored
        };
        self.health.inc_accepted();
        debug!(id = stored.id, name = %stored.name, "deal stored");

        // The deal is committed and published; a lost tighten only leaves the
        // floor higher than it could be.
        if let Err(e) = self.engine.tighten(&deal, now_ms).await {
            warn!(id = stored.id, "suppression floor not tightened: {e}");
        }
        Ok(SubmitOutcome::Stored(stored))
    }

    /// Open (or widen) the suppression window for a deal's key, then
    /// soft-delete it and publish the deletion.
    ///
    /// The window is written first: if it cannot be, the deal stays active
    /// and nothing is published. Widening is idempotent, so a retry after a
    /// failed soft-delete is safe.
    pub async fn remove(&self, id: i64, now_ms: i64) -> Result<SuppressionEntry> {
        let entry = {
            let _commit = self.commit_lock.lock().await;
            let Some(deal) = self.store.find_deal(id).await? else {
                return Err(AppError::NotFound(format!("deal {id}")));
            };
            let entry = self.engine.on_delete(&deal, now_ms).await?;
            if self.store.soft_delete_deal(id, now_ms).await?.is_none() {
                return Err(AppError::NotFound(format!("deal {id}")));
            }
            self.fanout.publish(StreamEvent::DealDeleted { id });
            entry
        };
        self.health.inc_deleted();
        info!(id, key = %entry.key, floor = entry.price_floor, "deal deleted");
        Ok(entry)
    }

    /// Active deals matching `filter`, newest first. `limit` is clamped to
    /// the configured maximum and counts matching rows only.
    pub async fn list(&self, filter: &DealFilter, limit: Option<i64>) -> Result<Vec<Deal>> {
        let limit = limit.unwrap_or(self.list_limit).clamp(1, self.list_limit);
        self.store.list_active_deals(filter, limit).await
    }

    pub async fn active_suppressions(&self, now_ms: i64) -> Result<Vec<SuppressionEntry>> {
        self.engine.active_entries(now_ms).await
    }
}
