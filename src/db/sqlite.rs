use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::DB_MAX_CONNECTIONS;
use crate::db::models::{DealRow, SuppressionRow};
use crate::error::Result;
use crate::state::DealStore;
use crate::types::{Deal, DealFilter, NewDeal, SuppressionEntry};

/// SQLite-backed store. Conditional suppression writes are single statements,
/// so SQLite's write lock is the compare-and-swap boundary.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database file and run migrations.
    pub async fn connect(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(DB_MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database ready at {db_path}");
        Ok(Self { pool })
    }

    /// Single-connection in-memory database with migrations applied.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

impl DealStore for SqliteStore {
    async fn find_active_suppression(
        &self,
        key: &str,
        now_ms: i64,
    ) -> Result<Option<SuppressionEntry>> {
        let row = sqlx::query_as::<_, SuppressionRow>(
            r#"
            SELECT key, price_floor, expires_at
            FROM suppressions
            WHERE key = ? AND expires_at > ?
            "#,
        )
        .bind(key)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SuppressionEntry::from))
    }

    async fn upsert_suppression(
        &self,
        next: &SuppressionEntry,
        expected: Option<&SuppressionEntry>,
        now_ms: i64,
    ) -> Result<bool> {
        let result = match expected {
            // Insert, or overwrite a row that has already lapsed.
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO suppressions (key, price_floor, expires_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(key) DO UPDATE SET
                        price_floor = excluded.price_floor,
                        expires_at = excluded.expires_at
                    WHERE suppressions.expires_at <= ?
                    "#,
                )
                .bind(&next.key)
                .bind(next.price_floor)
                .bind(next.expires_at)
                .bind(now_ms)
                .execute(&self.pool)
                .await?
            }
            Some(prev) => {
                sqlx::query(
                    r#"
                    UPDATE suppressions
                    SET price_floor = ?, expires_at = ?
                    WHERE key = ? AND price_floor = ? AND expires_at = ?
                    "#,
                )
                .bind(next.price_floor)
                .bind(next.expires_at)
                .bind(&prev.key)
                .bind(prev.price_floor)
                .bind(prev.expires_at)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    async fn delete_expired_suppressions(&self, now_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM suppressions WHERE expires_at < ?")
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_active_suppressions(&self, now_ms: i64) -> Result<Vec<SuppressionEntry>> {
        let rows = sqlx::query_as::<_, SuppressionRow>(
            r#"
            SELECT key, price_floor, expires_at
            FROM suppressions
            WHERE expires_at > ?
            ORDER BY key
            "#,
        )
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SuppressionEntry::from).collect())
    }

    async fn find_deal(&self, id: i64) -> Result<Option<Deal>> {
        let row = sqlx::query_as::<_, DealRow>(
            r#"
            SELECT id, name, liquidity, buff_price, reference_market_price, volume_7d,
                   purchase_count, target_price, secondary_market_price, margin_percent,
                   sku, deleted_at, created_at, updated_at
            FROM deals
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Deal::from))
    }

    async fn upsert_deal(&self, deal: &NewDeal, now_ms: i64) -> Result<Deal> {
        let m = &deal.metrics;
        let row = sqlx::query_as::<_, DealRow>(
            r#"
            INSERT INTO deals (
                id, name, liquidity, buff_price, reference_market_price, volume_7d,
                purchase_count, target_price, secondary_market_price, margin_percent,
                sku, deleted_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                liquidity = excluded.liquidity,
                buff_price = excluded.buff_price,
                reference_market_price = excluded.reference_market_price,
                volume_7d = excluded.volume_7d,
                purchase_count = excluded.purchase_count,
                target_price = excluded.target_price,
                secondary_market_price = excluded.secondary_market_price,
                margin_percent = excluded.margin_percent,
                sku = excluded.sku,
                deleted_at = NULL,
                updated_at = excluded.updated_at
            RETURNING id, name, liquidity, buff_price, reference_market_price, volume_7d,
                      purchase_count, target_price, secondary_market_price, margin_percent,
                      sku, deleted_at, created_at, updated_at
            "#,
        )
        .bind(deal.id)
        .bind(&deal.name)
        .bind(m.liquidity)
        .bind(m.buff_price)
        .bind(m.reference_market_price)
        .bind(m.volume_7d)
        .bind(m.purchase_count)
        .bind(m.target_price)
        .bind(m.secondary_market_price)
        .bind(m.margin_percent)
        .bind(deal.sku.as_deref())
        .bind(now_ms)
        .bind(now_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn soft_delete_deal(&self, id: i64, now_ms: i64) -> Result<Option<Deal>> {
        let row = sqlx::query_as::<_, DealRow>(
            r#"
            UPDATE deals
            SET deleted_at = ?, updated_at = ?
            WHERE id = ?
            RETURNING id, name, liquidity, buff_price, reference_market_price, volume_7d,
                      purchase_count, target_price, secondary_market_price, margin_percent,
                      sku, deleted_at, created_at, updated_at
            "#,
        )
        .bind(now_ms)
        .bind(now_ms)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Deal::from))
    }

    async fn list_active_deals(&self, filter: &DealFilter, limit: i64) -> Result<Vec<Deal>> {
        let rows = sqlx::query_as::<_, DealRow>(
            r#"
            SELECT id, name, liquidity, buff_price, reference_market_price, volume_7d,
                   purchase_count, target_price, secondary_market_price, margin_percent,
                   sku, deleted_at, created_at, updated_at
            FROM deals
            WHERE deleted_at IS NULL
              AND (? IS NULL OR margin_percent >= ?)
              AND (? IS NULL OR liquidity >= ?)
              AND (? IS NULL
                   OR instr(lower(name), ?) > 0
                   OR instr(lower(COALESCE(sku, '')), ?) > 0)
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(filter.min_margin)
        .bind(filter.min_margin)
        .bind(filter.min_liquidity)
        .bind(filter.min_liquidity)
        .bind(filter.search.as_deref())
        .bind(filter.search.as_deref())
        .bind(filter.search.as_deref())
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Deal::from).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
