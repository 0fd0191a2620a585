//! Database row types matching `migrations/`. Used by sqlx for typed queries.

use crate::types::{Deal, DealMetrics, SuppressionEntry};

#[derive(Debug, sqlx::FromRow)]
pub struct DealRow {
    pub id: i64,
    pub name: String,
    pub liquidity: f64,
    pub buff_price: f64,
    pub reference_market_price: f64,
    pub volume_7d: i64,
    pub purchase_count: i64,
    pub target_price: f64,
    pub secondary_market_price: f64,
    pub margin_percent: f64,
    pub sku: Option<String>,
    pub deleted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<DealRow> for Deal {
    fn from(r: DealRow) -> Self {
        Deal {
            id: r.id,
            name: r.name,
            metrics: DealMetrics {
                liquidity: r.liquidity,
                buff_price: r.buff_price,
                reference_market_price: r.reference_market_price,
                volume_7d: r.volume_7d,
                purchase_count: r.purchase_count,
                target_price: r.target_price,
                secondary_market_price: r.secondary_market_price,
                margin_percent: r.margin_percent,
            },
            sku: r.sku,
            deleted_at: r.deleted_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SuppressionRow {
    pub key: String,
    pub price_floor: f64,
    pub expires_at: i64,
}

impl From<SuppressionRow> for SuppressionEntry {
    fn from(r: SuppressionRow) -> Self {
        SuppressionEntry {
            key: r.key,
            price_floor: r.price_floor,
            expires_at: r.expires_at,
        }
    }
}
