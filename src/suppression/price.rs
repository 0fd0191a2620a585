use crate::error::AppError;
use crate::types::DealMetrics;

/// Collapses a deal's price fields into one comparable value. Lower is better:
/// a strictly better deal must map to a strictly lower floor, and the same
/// metrics must always map to the same floor.
pub trait PriceFloor: Send + Sync {
    fn floor(&self, metrics: &DealMetrics) -> f64;
}

impl<F> PriceFloor for F
where
    F: Fn(&DealMetrics) -> f64 + Send + Sync,
{
    fn floor(&self, metrics: &DealMetrics) -> f64 {
        self(metrics)
    }
}

/// Built-in floor functions, selected with `PRICE_BASIS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceBasis {
    /// Buy price on the primary marketplace.
    Buff,
    /// Price on the reference marketplace.
    Reference,
    /// Price on the secondary marketplace.
    Secondary,
    /// Target sell price.
    Target,
    /// Cheapest of the three marketplace prices.
    LowestAsk,
}

impl PriceFloor for PriceBasis {
    fn floor(&self, m: &DealMetrics) -> f64 {
        match self {
            PriceBasis::Buff => m.buff_price,
            PriceBasis::Reference => m.reference_market_price,
            PriceBasis::Secondary => m.secondary_market_price,
            PriceBasis::Target => m.target_price,
            PriceBasis::LowestAsk => m
                .buff_price
                .min(m.reference_market_price)
                .min(m.secondary_market_price),
        }
    }
}

impl std::str::FromStr for PriceBasis {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buff" => Ok(PriceBasis::Buff),
            "reference" => Ok(PriceBasis::Reference),
            "secondary" => Ok(PriceBasis::Secondary),
            "target" => Ok(PriceBasis::Target),
            "lowest_ask" => Ok(PriceBasis::LowestAsk),
            other => Err(AppError::Config(format!(
                "PRICE_BASIS must be one of buff, reference, secondary, target, lowest_ask; got {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for PriceBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PriceBasis::Buff => "buff",
            PriceBasis::Reference => "reference",
            PriceBasis::Secondary => "secondary",
            PriceBasis::Target => "target",
            PriceBasis::LowestAsk => "lowest_ask",
        };
        write!(f, "{s}")
    }
}
