//! Market data models
//!
//! - `quote` - Provider observations (Quote) and the typed fetch result (FetchOutcome)

mod quote;

pub use quote::{normalize_symbol, FetchOutcome, Quote};
