//! Persistence port shared by the SQLite and in-memory backends.

use std::future::Future;

use crate::error::Result;
use crate::types::{Deal, DealFilter, NewDeal, SuppressionEntry};

/// Key-value style persistence for deals and suppression entries.
///
/// `upsert_suppression` is the one conditional primitive: it is a
/// compare-and-swap that only writes when the stored row still matches what
/// the caller read, which is how the suppression engine keeps at most one
/// active entry per key without holding a lock across awaits.
pub trait DealStore: Send + Sync + 'static {
    /// Entry for `key` whose `expires_at > now_ms`, if any.
    fn find_active_suppression(
        &self,
        key: &str,
        now_ms: i64,
    ) -> impl Future<Output = Result<Option<SuppressionEntry>>> + Send;

    /// Write `next` if the row for `next.key` is still in the state the caller observed.
    ///
    /// - `expected = None`: the caller saw no active entry. Applies only if no row
    ///   exists or the existing row has expired (`expires_at <= now_ms`).
    /// - `expected = Some(prev)`: applies only if the row still equals `prev`.
    ///
    /// Returns `false` when another writer got there first.
    fn upsert_suppression(
        &self,
        next: &SuppressionEntry,
        expected: Option<&SuppressionEntry>,
        now_ms: i64,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Delete entries with `expires_at < now_ms`, evaluated per row at delete time.
    fn delete_expired_suppressions(&self, now_ms: i64) -> impl Future<Output = Result<u64>> + Send;

    fn list_active_suppressions(
        &self,
        now_ms: i64,
    ) -> impl Future<Output = Result<Vec<SuppressionEntry>>> + Send;

    /// Any deal with this id, soft-deleted or not.
    fn find_deal(&self, id: i64) -> impl Future<Output = Result<Option<Deal>>> + Send;

    /// Insert or overwrite a deal. Overwriting clears `deleted_at` and keeps `created_at`.
    fn upsert_deal(&self, deal: &NewDeal, now_ms: i64) -> impl Future<Output = Result<Deal>> + Send;

    /// Mark a deal deleted. `None` if the id is unknown.
    fn soft_delete_deal(
        &self,
        id: i64,
        now_ms: i64,
    ) -> impl Future<Output = Result<Option<Deal>>> + Send;

    /// Non-deleted deals matching `filter`, newest `created_at` first. The
    /// filter applies before `limit`.
    fn list_active_deals(
        &self,
        filter: &DealFilter,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Deal>>> + Send;
}
