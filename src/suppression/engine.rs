use std::sync::Arc;

use tracing::debug;

use crate::config::CAS_RETRY_BUDGET;
use crate::error::{AppError, Result};
use crate::state::DealStore;
use crate::suppression::{compute_key, PriceFloor};
use crate::types::{Deal, DealMetrics, Decision, NewDeal, SuppressionEntry};

/// Decides whether deal submissions are accepted or suppressed, and maintains
/// the per-key suppression windows created by deletions.
///
/// Every read-modify-write on a key is a compare-and-swap loop against
/// [`DealStore::upsert_suppression`]: read the active entry, compute the next
/// state, write only if nobody changed the row in between, otherwise re-read.
pub struct SuppressionEngine<S> {
    store: Arc<S>,
    price_floor: Arc<dyn PriceFloor>,
    window_ms: i64,
    retry_budget: u32,
}

impl<S> Clone for SuppressionEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            price_floor: Arc::clone(&self.price_floor),
            window_ms: self.window_ms,
            retry_budget: self.retry_budget,
        }
    }
}

impl<S: DealStore> SuppressionEngine<S> {
    pub fn new(store: Arc<S>, price_floor: impl PriceFloor + 'static, window_ms: i64) -> Self {
        Self {
            store,
            price_floor: Arc::new(price_floor),
            window_ms,
            retry_budget: CAS_RETRY_BUDGET,
        }
    }

    pub fn with_retry_budget(mut self, attempts: u32) -> Self {
        self.retry_budget = attempts.max(1);
        self
    }

    pub fn price_floor(&self, metrics: &DealMetrics) -> f64 {
        self.price_floor.floor(metrics)
    }

    /// Open or widen the suppression window for a deleted deal's key.
    ///
    /// The floor only ever moves down and the expiry only ever moves later.
    pub async fn on_delete(&self, deal: &Deal, now_ms: i64) -> Result<SuppressionEntry> {
        let key = compute_key(deal.sku.as_deref(), &deal.name);
        let floor = self.price_floor(&deal.metrics);
        let extend_to = now_ms.saturating_add(self.window_ms);

        for attempt in 1..=self.retry_budget {
            let current = self.store.find_active_suppression(&key, now_ms).await?;
            let next = match &current {
                None => SuppressionEntry { key: key.clone(), price_floor: floor, expires_at: extend_to },
                Some(active) => SuppressionEntry {
                    key: key.clone(),
                    price_floor: active.price_floor.min(floor),
                    expires_at: active.expires_at.max(extend_to),
                },
            };

            if current.as_ref() == Some(&next) {
                return Ok(next);
            }
            if self.store.upsert_suppression(&next, current.as_ref(), now_ms).await? {
                debug!(
                    key = %next.key,
                    floor = next.price_floor,
                    expires_at = next.expires_at,
                    created = current.is_none(),
                    "suppression window recorded"
                );
                return Ok(next);
            }
            debug!(key = %key, attempt, "suppression write lost a race, retrying");
        }

        Err(AppError::ConcurrentUpdateConflict { key, attempts: self.retry_budget })
    }

    /// Check a submission against its key's active window and apply the
    /// resulting floor change. Equivalent to [`evaluate`](Self::evaluate)
    /// followed by [`tighten`](Self::tighten) on acceptance.
    pub async fn on_incoming_deal(&self, deal: &NewDeal, now_ms: i64) -> Result<Decision> {
        let decision = self.evaluate(deal, now_ms).await?;
        if decision == Decision::Accept {
            self.tighten(deal, now_ms).await?;
        }
        Ok(decision)
    }

    /// Read-only decision. Accepts when there is no window or the submission
    /// is strictly cheaper than the floor. Ties are suppressed.
    pub async fn evaluate(&self, deal: &NewDeal, now_ms: i64) -> Result<Decision> {
        let key = compute_key(deal.sku.as_deref(), &deal.name);
        let floor = self.price_floor(&deal.metrics);

        match self.store.find_active_suppression(&key, now_ms).await? {
            Some(active) if floor >= active.price_floor => {
                debug!(key = %key, floor, threshold = active.price_floor, "deal suppressed");
                Ok(Decision::Suppress { threshold: active.price_floor })
            }
            _ => Ok(Decision::Accept),
        }
    }

    /// Lower the active floor of an accepted deal's key to the deal's floor.
    /// Run after the deal is stored. No-op when there is no active window or
    /// the floor is already at or below the deal's.
    pub async fn tighten(&self, deal: &NewDeal, now_ms: i64) -> Result<Option<SuppressionEntry>> {
        let key = compute_key(deal.sku.as_deref(), &deal.name);
        let floor = self.price_floor(&deal.metrics);

        for attempt in 1..=self.retry_budget {
            let Some(active) = self.store.find_active_suppression(&key, now_ms).await? else {
                return Ok(None);
            };
            if floor >= active.price_floor {
                return Ok(Some(active));
            }

            let tightened = SuppressionEntry { price_floor: floor, ..active.clone() };
            if self.store.upsert_suppression(&tightened, Some(&active), now_ms).await? {
                debug!(key = %key, from = active.price_floor, to = floor, "suppression floor tightened");
                return Ok(Some(tightened));
            }
            debug!(key = %key, attempt, "suppression tighten lost a race, retrying");
        }

        Err(AppError::ConcurrentUpdateConflict { key, attempts: self.retry_budget })
    }

    /// Drop every entry whose window has lapsed. Returns how many were removed.
    pub async fn purge_expired(&self, now_ms: i64) -> Result<u64> {
        self.store.delete_expired_suppressions(now_ms).await
    }

    pub async fn active_entries(&self, now_ms: i64) -> Result<Vec<SuppressionEntry>> {
        self.store.list_active_suppressions(now_ms).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStore;
    use crate::suppression::PriceBasis;
    use crate::types::DealFilter;
    use std::sync::atomic::{AtomicU32, Ordering};

    const T0: i64 = 1_700_000_000_000;
    const HOUR: i64 = 3_600_000;
    const DAY: i64 = 24 * HOUR;

    fn ak47(price: f64) -> NewDeal {
        NewDeal {
            id: 1,
            name: "AK-47 | Redline (Field-Tested)".to_string(),
            metrics: DealMetrics {
                liquidity: 80.0,
                buff_price: price,
                reference_market_price: price * 1.1,
                volume_7d: 500,
                purchase_count: 20,
                target_price: price * 1.2,
                secondary_market_price: price * 1.05,
                margin_percent: 8.0,
            },
            sku: Some("AK47-X".to_string()),
        }
    }

    fn as_deal(new: &NewDeal) -> Deal {
        Deal {
            id: new.id,
            name: new.name.clone(),
            metrics: new.metrics.clone(),
            sku: new.sku.clone(),
            deleted_at: None,
            created_at: T0,
            updated_at: T0,
        }
    }

    fn engine(store: &Arc<MemoryStore>) -> SuppressionEngine<MemoryStore> {
        SuppressionEngine::new(Arc::clone(store), PriceBasis::Buff, DAY)
    }

    #[tokio::test]
    async fn delete_then_resubmit_walkthrough() {
        let store = MemoryStore::new();
        let engine = engine(&store);

        let entry = engine.on_delete(&as_deal(&ak47(10.0)), T0).await.unwrap();
        assert_eq!(
            entry,
            SuppressionEntry { key: "ak47-x".to_string(), price_floor: 10.0, expires_at: T0 + DAY }
        );

        let same_price = engine.on_incoming_deal(&ak47(10.0), T0 + HOUR).await.unwrap();
        assert_eq!(same_price, Decision::Suppress { threshold: 10.0 });

        let cheaper = engine.on_incoming_deal(&ak47(9.5), T0 + 2 * HOUR).await.unwrap();
        assert_eq!(cheaper, Decision::Accept);
        let tightened = store.find_active_suppression("ak47-x", T0 + 2 * HOUR).await.unwrap().unwrap();
        assert_eq!(tightened.price_floor, 9.5);
        assert_eq!(tightened.expires_at, T0 + DAY, "tightening never moves the expiry");

        let after_window = engine.on_incoming_deal(&ak47(9.5), T0 + 25 * HOUR).await.unwrap();
        assert_eq!(after_window, Decision::Accept);
    }

    #[tokio::test]
    async fn evaluate_leaves_the_floor_until_tighten_runs() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        engine.on_delete(&as_deal(&ak47(10.0)), T0).await.unwrap();

        assert_eq!(engine.evaluate(&ak47(9.5), T0 + 1).await.unwrap(), Decision::Accept);
        let entry = store.find_active_suppression("ak47-x", T0 + 1).await.unwrap().unwrap();
        assert_eq!(entry.price_floor, 10.0);

        let tightened = engine.tighten(&ak47(9.5), T0 + 2).await.unwrap().unwrap();
        assert_eq!(tightened.price_floor, 9.5);
        assert_eq!(tightened.expires_at, T0 + DAY);

        // A pricier accepted deal never raises the floor back.
        let unchanged = engine.tighten(&ak47(9.8), T0 + 3).await.unwrap().unwrap();
        assert_eq!(unchanged.price_floor, 9.5);
        assert!(engine.tighten(&ak47(1.0), T0 + DAY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn worse_price_is_suppressed_and_leaves_the_entry_alone() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        engine.on_delete(&as_deal(&ak47(10.0)), T0).await.unwrap();

        let decision = engine.on_incoming_deal(&ak47(12.0), T0 + 1).await.unwrap();
        assert_eq!(decision, Decision::Suppress { threshold: 10.0 });
        let entry = store.find_active_suppression("ak47-x", T0 + 1).await.unwrap().unwrap();
        assert_eq!(entry.price_floor, 10.0);
    }

    #[tokio::test]
    async fn unrelated_keys_are_not_suppressed() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        engine.on_delete(&as_deal(&ak47(10.0)), T0).await.unwrap();

        let mut other = ak47(50.0);
        other.sku = Some("M4A4-HOWL".to_string());
        assert_eq!(engine.on_incoming_deal(&other, T0 + 1).await.unwrap(), Decision::Accept);
    }

    #[tokio::test]
    async fn sku_case_and_padding_variants_share_a_window() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        engine.on_delete(&as_deal(&ak47(10.0)), T0).await.unwrap();

        let mut variant = ak47(10.0);
        variant.sku = Some("  ak47-x ".to_string());
        assert_eq!(
            engine.on_incoming_deal(&variant, T0 + 1).await.unwrap(),
            Decision::Suppress { threshold: 10.0 }
        );
    }

    #[tokio::test]
    async fn repeated_deletes_only_widen_the_window() {
        let store = MemoryStore::new();
        let engine = engine(&store);

        let steps = [(10.0, 0), (12.0, HOUR), (8.0, 2 * HOUR), (9.0, 30 * 60_000), (15.0, 5 * HOUR)];
        let mut previous: Option<SuppressionEntry> = None;
        for (price, offset) in steps {
            let entry = engine.on_delete(&as_deal(&ak47(price)), T0 + offset).await.unwrap();
            if let Some(prev) = &previous {
                assert!(entry.price_floor <= prev.price_floor, "floor rose: {prev:?} -> {entry:?}");
                assert!(entry.expires_at >= prev.expires_at, "expiry shrank: {prev:?} -> {entry:?}");
            }
            previous = Some(entry);
        }

        let last = previous.unwrap();
        assert_eq!(last.price_floor, 8.0);
        assert_eq!(last.expires_at, T0 + 5 * HOUR + DAY);
    }

    #[tokio::test]
    async fn delete_after_expiry_starts_a_fresh_window() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        engine.on_delete(&as_deal(&ak47(5.0)), T0).await.unwrap();

        let later = T0 + DAY + HOUR;
        let entry = engine.on_delete(&as_deal(&ak47(11.0)), later).await.unwrap();
        assert_eq!(entry.price_floor, 11.0, "a lapsed floor must not carry over");
        assert_eq!(entry.expires_at, later + DAY);
        assert_eq!(store.suppression_count(), 1);
    }

    #[tokio::test]
    async fn purge_twice_is_idempotent() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        engine.on_delete(&as_deal(&ak47(10.0)), T0).await.unwrap();
        let mut other = ak47(3.0);
        other.sku = None;
        engine.on_delete(&as_deal(&other), T0 + 2 * DAY).await.unwrap();

        let now = T0 + DAY + 1;
        assert_eq!(engine.purge_expired(now).await.unwrap(), 1);
        assert_eq!(engine.purge_expired(now).await.unwrap(), 0);
        assert_eq!(engine.active_entries(now).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deletes_leave_exactly_one_entry() {
        let store = MemoryStore::new();
        let engine = Arc::new(engine(&store).with_retry_budget(64));

        let n: i64 = 16;
        let mut handles = Vec::new();
        for i in 0..n {
            let engine = Arc::clone(&engine);
            // Interleave prices so the minimum is not submitted first.
            let price = 10.0 + ((i * 7) % n) as f64;
            let now = T0 + i * 1_000;
            handles.push(tokio::spawn(async move {
                engine.on_delete(&as_deal(&ak47(price)), now).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let active = store.list_active_suppressions(T0).await.unwrap();
        assert_eq!(store.suppression_count(), 1);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].price_floor, 10.0);
        assert_eq!(active[0].expires_at, T0 + (n - 1) * 1_000 + DAY);
    }

    #[tokio::test]
    async fn injected_floor_function_drives_decisions() {
        let store = MemoryStore::new();
        // Rank by target price instead of buy price.
        let engine = SuppressionEngine::new(Arc::clone(&store), |m: &DealMetrics| m.target_price, DAY);
        engine.on_delete(&as_deal(&ak47(10.0)), T0).await.unwrap();

        let entry = store.find_active_suppression("ak47-x", T0).await.unwrap().unwrap();
        assert_eq!(entry.price_floor, 12.0);
    }

    /// Store whose conditional writes always lose.
    #[derive(Default)]
    struct ContendedStore {
        inner: MemoryStore,
        attempts: AtomicU32,
    }

    impl DealStore for ContendedStore {
        async fn find_active_suppression(&self, key: &str, now_ms: i64) -> Result<Option<SuppressionEntry>> {
            self.inner.find_active_suppression(key, now_ms).await
        }
        async fn upsert_suppression(
            &self,
            _next: &SuppressionEntry,
            _expected: Option<&SuppressionEntry>,
            _now_ms: i64,
        ) -> Result<bool> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }
        async fn delete_expired_suppressions(&self, now_ms: i64) -> Result<u64> {
            self.inner.delete_expired_suppressions(now_ms).await
        }
        async fn list_active_suppressions(&self, now_ms: i64) -> Result<Vec<SuppressionEntry>> {
            self.inner.list_active_suppressions(now_ms).await
        }
        async fn find_deal(&self, id: i64) -> Result<Option<Deal>> {
            self.inner.find_deal(id).await
        }
        async fn upsert_deal(&self, deal: &NewDeal, now_ms: i64) -> Result<Deal> {
            self.inner.upsert_deal(deal, now_ms).await
        }
        async fn soft_delete_deal(&self, id: i64, now_ms: i64) -> Result<Option<Deal>> {
            self.inner.soft_delete_deal(id, now_ms).await
        }
        async fn list_active_deals(&self, filter: &DealFilter, limit: i64) -> Result<Vec<Deal>> {
            self.inner.list_active_deals(filter, limit).await
        }
    }

    #[tokio::test]
    async fn exhausted_retry_budget_surfaces_a_conflict() {
        let store = Arc::new(ContendedStore::default());
        let engine = SuppressionEngine::new(Arc::clone(&store), PriceBasis::Buff, DAY).with_retry_budget(3);

        let err = engine.on_delete(&as_deal(&ak47(10.0)), T0).await.unwrap_err();
        match err {
            AppError::ConcurrentUpdateConflict { key, attempts } => {
                assert_eq!(key, "ak47-x");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    }
}
