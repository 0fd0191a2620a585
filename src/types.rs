use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Deal
// ---------------------------------------------------------------------------

/// Comparative pricing metrics of a deal across marketplaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealMetrics {
    pub liquidity: f64,
    pub buff_price: f64,
    pub reference_market_price: f64,
    pub volume_7d: i64,
    pub purchase_count: i64,
    pub target_price: f64,
    pub secondary_market_price: f64,
    pub margin_percent: f64,
}

/// A persisted deal. `deleted_at` set means soft-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: i64,
    pub name: String,
    #[serde(flatten)]
    pub metrics: DealMetrics,
    pub sku: Option<String>,
    pub deleted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Deal {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// A validated deal submission, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDeal {
    pub id: i64,
    pub name: String,
    pub metrics: DealMetrics,
    pub sku: Option<String>,
}

/// Listing filters. Every field is optional; `search` is matched
/// case-insensitively against the name and sku.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DealFilter {
    pub min_margin: Option<f64>,
    pub min_liquidity: Option<f64>,
    pub search: Option<String>,
}

impl DealFilter {
    /// Trims and lowercases `search`, dropping it when blank.
    pub fn new(min_margin: Option<f64>, min_liquidity: Option<f64>, search: Option<&str>) -> Self {
        let search = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        Self { min_margin, min_liquidity, search }
    }

    pub fn matches(&self, deal: &Deal) -> bool {
        self.min_margin.map_or(true, |m| deal.metrics.margin_percent >= m)
            && self.min_liquidity.map_or(true, |l| deal.metrics.liquidity >= l)
            && self.search.as_deref().map_or(true, |needle| {
                deal.name.to_lowercase().contains(needle)
                    || deal.sku.as_deref().map_or(false, |sku| sku.to_lowercase().contains(needle))
            })
    }
}

// ---------------------------------------------------------------------------
// Incoming payload
// ---------------------------------------------------------------------------

/// Numeric field as sent by clients: either a JSON number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumberLike {
    Number(f64),
    Text(String),
}

impl NumberLike {
    fn as_f64(&self) -> Option<f64> {
        let v = match self {
            NumberLike::Number(n) => *n,
            NumberLike::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        v.is_finite().then_some(v)
    }
}

/// Raw deal payload. Every field is optional here so that validation can report
/// all problems at once. Aliases accept the legacy marketplace field names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealInput {
    pub id: Option<NumberLike>,
    pub name: Option<String>,
    pub liquidity: Option<NumberLike>,
    #[serde(alias = "buff")]
    pub buff_price: Option<NumberLike>,
    #[serde(alias = "csgoTm")]
    pub reference_market_price: Option<NumberLike>,
    #[serde(alias = "vol7d")]
    pub volume_7d: Option<NumberLike>,
    #[serde(alias = "purch")]
    pub purchase_count: Option<NumberLike>,
    #[serde(alias = "target")]
    pub target_price: Option<NumberLike>,
    #[serde(alias = "youpin")]
    pub secondary_market_price: Option<NumberLike>,
    #[serde(alias = "margin")]
    pub margin_percent: Option<NumberLike>,
    pub sku: Option<String>,
}

impl DealInput {
    /// Parse an arbitrary JSON body into a validated deal.
    pub fn parse(body: serde_json::Value) -> Result<NewDeal> {
        let input: DealInput = serde_json::from_value(body)
            .map_err(|e| AppError::Validation(format!("malformed deal payload: {e}")))?;
        input.validate()
    }

    pub fn validate(self) -> Result<NewDeal> {
        let mut problems: Vec<String> = Vec::new();

        let id = match self.id.as_ref().and_then(NumberLike::as_f64) {
            Some(v) if v >= 1.0 && v.fract() == 0.0 && v <= i64::MAX as f64 => v as i64,
            Some(_) => {
                problems.push("id must be a positive integer".to_string());
                0
            }
            None => {
                problems.push("id is required and must be numeric".to_string());
                0
            }
        };

        let name = self.name.as_deref().map(str::trim).unwrap_or_default().to_string();
        if name.is_empty() {
            problems.push("name is required".to_string());
        }

        let mut number = |field: &str, value: &Option<NumberLike>| -> f64 {
            match value.as_ref().and_then(NumberLike::as_f64) {
                Some(v) => v,
                None => {
                    problems.push(format!("{field} must be a finite number"));
                    0.0
                }
            }
        };
        let liquidity = number("liquidity", &self.liquidity);
        let buff_price = number("buffPrice", &self.buff_price);
        let reference_market_price = number("referenceMarketPrice", &self.reference_market_price);
        let volume_7d = number("volume7d", &self.volume_7d);
        let purchase_count = number("purchaseCount", &self.purchase_count);
        let target_price = number("targetPrice", &self.target_price);
        let secondary_market_price = number("secondaryMarketPrice", &self.secondary_market_price);
        let margin_percent = number("marginPercent", &self.margin_percent);

        for (field, v) in [("volume7d", volume_7d), ("purchaseCount", purchase_count)] {
            if v.fract() != 0.0 {
                problems.push(format!("{field} must be an integer"));
            }
        }

        if !problems.is_empty() {
            return Err(AppError::Validation(problems.join("; ")));
        }

        let sku = self
            .sku
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(NewDeal {
            id,
            name,
            metrics: DealMetrics {
                liquidity,
                buff_price,
                reference_market_price,
                volume_7d: volume_7d as i64,
                purchase_count: purchase_count as i64,
                target_price,
                secondary_market_price,
                margin_percent,
            },
            sku,
        })
    }
}

// ---------------------------------------------------------------------------
// Suppression
// ---------------------------------------------------------------------------

/// Temporary price floor for a dedup key. Resubmissions at or above the floor
/// are suppressed until `expires_at` (epoch ms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionEntry {
    pub key: String,
    pub price_floor: f64,
    pub expires_at: i64,
}

impl SuppressionEntry {
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.expires_at > now_ms
    }
}

/// Outcome of checking an incoming deal against the suppression table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Accept,
    /// The deal would need a floor strictly below `threshold` to be accepted.
    Suppress { threshold: f64 },
}

/// Current UTC time as epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
