pub mod deal_store;
pub mod memory_store;

pub use deal_store::DealStore;
pub use memory_store::MemoryStore;
