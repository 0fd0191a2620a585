pub mod engine;
pub mod key;
pub mod price;
pub mod purger;

pub use engine::SuppressionEngine;
pub use key::compute_key;
pub use price::{PriceBasis, PriceFloor};
pub use purger::Purger;
