use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::Result;
use crate::state::DealStore;
use crate::types::{Deal, DealFilter, NewDeal, SuppressionEntry};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Process-local store. Each suppression key maps to a single slot, so the
/// DashMap shard lock taken by `entry()` is the compare-and-swap boundary.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// deal id → deal (soft-deleted rows are kept)
    deals: DashMap<i64, Deal>,
    /// dedup key → latest suppression entry, expired or not
    suppressions: DashMap<String, SuppressionEntry>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All suppression rows including expired ones not yet purged.
    #[cfg(test)]
    pub fn suppression_count(&self) -> usize {
        self.suppressions.len()
    }
}

impl DealStore for MemoryStore {
    async fn find_active_suppression(
        &self,
        key: &str,
        now_ms: i64,
    ) -> Result<Option<SuppressionEntry>> {
        Ok(self
            .suppressions
            .get(key)
            .filter(|e| e.is_active(now_ms))
            .map(|e| e.clone()))
    }

    async fn upsert_suppression(
        &self,
        next: &SuppressionEntry,
        expected: Option<&SuppressionEntry>,
        now_ms: i64,
    ) -> Result<bool> {
        match self.suppressions.entry(next.key.clone()) {
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                let unchanged = match expected {
                    Some(prev) => current == prev,
                    None => !current.is_active(now_ms),
                };
                if unchanged {
                    slot.insert(next.clone());
                }
                Ok(unchanged)
            }
            Entry::Vacant(slot) => {
                // A vacant slot only matches a caller that saw nothing.
                if expected.is_some() {
                    return Ok(false);
                }
                slot.insert(next.clone());
                Ok(true)
            }
        }
    }

    async fn delete_expired_suppressions(&self, now_ms: i64) -> Result<u64> {
        let mut removed = 0u64;
        self.suppressions.retain(|_, e| {
            let keep = e.expires_at >= now_ms;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn list_active_suppressions(&self, now_ms: i64) -> Result<Vec<SuppressionEntry>> {
        let mut entries: Vec<SuppressionEntry> = self
            .suppressions
            .iter()
            .filter(|e| e.is_active(now_ms))
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn find_deal(&self, id: i64) -> Result<Option<Deal>> {
        Ok(self.deals.get(&id).map(|d| d.clone()))
    }

    async fn upsert_deal(&self, deal: &NewDeal, now_ms: i64) -> Result<Deal> {
        let saved = match self.deals.entry(deal.id) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                existing.name = deal.name.clone();
                existing.metrics = deal.metrics.clone();
                existing.sku = deal.sku.clone();
                existing.deleted_at = None;
                existing.updated_at = now_ms;
                existing.clone()
            }
            Entry::Vacant(slot) => slot
                .insert(Deal {
                    id: deal.id,
                    name: deal.name.clone(),
                    metrics: deal.metrics.clone(),
                    sku: deal.sku.clone(),
                    deleted_at: None,
                    created_at: now_ms,
                    updated_at: now_ms,
                })
                .clone(),
        };
        Ok(saved)
    }

    async fn soft_delete_deal(&self, id: i64, now_ms: i64) -> Result<Option<Deal>> {
        Ok(self.deals.get_mut(&id).map(|mut d| {
            d.deleted_at = Some(now_ms);
            d.updated_at = now_ms;
            d.clone()
        }))
    }

    async fn list_active_deals(&self, filter: &DealFilter, limit: i64) -> Result<Vec<Deal>> {
        let mut deals: Vec<Deal> = self
            .deals
            .iter()
            .filter(|d| d.is_active() && filter.matches(d.value()))
            .map(|d| d.value().clone())
            .collect();
        deals.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        deals.truncate(limit.max(0) as usize);
        Ok(deals)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DealMetrics;

    fn new_deal(id: i64, name: &str) -> NewDeal {
        NewDeal {
            id,
            name: name.to_string(),
            metrics: DealMetrics {
                liquidity: 50.0,
                buff_price: 10.0,
                reference_market_price: 11.0,
                volume_7d: 100,
                purchase_count: 4,
                target_price: 12.0,
                secondary_market_price: 10.5,
                margin_percent: 6.0,
            },
            sku: None,
        }
    }

    fn entry(key: &str, floor: f64, expires_at: i64) -> SuppressionEntry {
        SuppressionEntry { key: key.to_string(), price_floor: floor, expires_at }
    }

    #[tokio::test]
    async fn resubmitting_deleted_deal_revives_it_and_keeps_created_at() {
        let store = MemoryStore::new();
        store.upsert_deal(&new_deal(1, "AWP"), 100).await.unwrap();
        store.soft_delete_deal(1, 200).await.unwrap();
        assert!(store.list_active_deals(&DealFilter::default(), 10).await.unwrap().is_empty());

        let revived = store.upsert_deal(&new_deal(1, "AWP | Asiimov"), 300).await.unwrap();
        assert_eq!(revived.created_at, 100);
        assert_eq!(revived.updated_at, 300);
        assert!(revived.deleted_at.is_none());
        assert_eq!(revived.name, "AWP | Asiimov");
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        for (id, at) in [(1, 10), (2, 30), (3, 20)] {
            store.upsert_deal(&new_deal(id, "x"), at).await.unwrap();
        }
        let ids: Vec<i64> = store.list_active_deals(&DealFilter::default(), 2).await.unwrap().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn filters_apply_before_the_limit() {
        let store = MemoryStore::new();
        store.upsert_deal(&new_deal(1, "AWP | Asiimov"), 10).await.unwrap();
        for id in 2..=5 {
            store.upsert_deal(&new_deal(id, "Glove Case"), 10 + id).await.unwrap();
        }

        let filter = DealFilter::new(None, None, Some(" awp "));
        let ids: Vec<i64> = store.list_active_deals(&filter, 1).await.unwrap().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1]);

        let none = DealFilter::new(Some(50.0), None, None);
        assert!(store.list_active_deals(&none, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn soft_delete_unknown_id_returns_none() {
        let store = MemoryStore::new();
        assert!(store.soft_delete_deal(99, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conditional_upsert_rejects_stale_expectations() {
        let store = MemoryStore::new();
        let first = entry("ak47-x", 10.0, 1_000);
        assert!(store.upsert_suppression(&first, None, 0).await.unwrap());

        // Someone else already created an active entry.
        assert!(!store.upsert_suppression(&entry("ak47-x", 9.0, 1_000), None, 0).await.unwrap());

        // Expected snapshot no longer matches.
        let stale = entry("ak47-x", 11.0, 1_000);
        assert!(!store.upsert_suppression(&entry("ak47-x", 9.0, 1_000), Some(&stale), 0).await.unwrap());

        let tightened = entry("ak47-x", 9.0, 2_000);
        assert!(store.upsert_suppression(&tightened, Some(&first), 0).await.unwrap());
        assert_eq!(store.find_active_suppression("ak47-x", 0).await.unwrap(), Some(tightened));
    }

    #[tokio::test]
    async fn expired_row_is_replaced_by_a_fresh_entry() {
        let store = MemoryStore::new();
        store.upsert_suppression(&entry("k", 5.0, 100), None, 0).await.unwrap();
        assert!(store.find_active_suppression("k", 100).await.unwrap().is_none());

        let fresh = entry("k", 8.0, 500);
        assert!(store.upsert_suppression(&fresh, None, 100).await.unwrap());
        assert_eq!(store.suppression_count(), 1);
        assert_eq!(store.find_active_suppression("k", 100).await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn purge_removes_only_strictly_expired_rows() {
        let store = MemoryStore::new();
        store.upsert_suppression(&entry("a", 1.0, 100), None, 0).await.unwrap();
        store.upsert_suppression(&entry("b", 1.0, 200), None, 0).await.unwrap();
        store.upsert_suppression(&entry("c", 1.0, 300), None, 0).await.unwrap();

        assert_eq!(store.delete_expired_suppressions(200).await.unwrap(), 1);
        assert_eq!(store.delete_expired_suppressions(200).await.unwrap(), 0);
        assert_eq!(store.suppression_count(), 2);
    }
}
