use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::api::health::HealthState;
use crate::error::Result;
use crate::state::DealStore;
use crate::suppression::SuppressionEngine;
use crate::types::now_ms;

/// Background task that deletes lapsed suppression entries.
/// Runs once at startup, then every `interval_secs`.
pub struct Purger<S> {
    engine: SuppressionEngine<S>,
    health: Arc<HealthState>,
    interval_secs: u64,
}

impl<S: DealStore> Purger<S> {
    pub fn new(engine: SuppressionEngine<S>, health: Arc<HealthState>, interval_secs: u64) -> Self {
        Self { engine, health, interval_secs: interval_secs.max(1) }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));

        loop {
            // First tick fires immediately: that is the startup purge.
            interval.tick().await;
            if let Err(e) = self.purge_once(now_ms()).await {
                error!("Scheduled purge failed: {e}");
            }
        }
    }

    pub async fn purge_once(&self, now_ms: i64) -> Result<u64> {
        let purged = self.engine.purge_expired(now_ms).await?;
        self.health.record_purge(purged, now_ms);
        if purged > 0 {
            info!(purged, "Purged {purged} expired suppression entries");
        } else {
            debug!("Purge found no expired suppression entries");
        }
        Ok(purged)
    }
}
