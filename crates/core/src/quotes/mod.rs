//! Quote records and the durable store contract.

mod dedup;
#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod model;
mod store;

pub use dedup::dedup_latest;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryQuoteStore;
pub use model::{
    check_symbol, CacheEntry, CacheKey, PersistedQuote, QuoteRecord, StagedEntry, MAX_SOURCE_LEN,
    MAX_SYMBOL_LEN,
};
pub use store::QuoteStore;
