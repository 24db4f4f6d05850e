//! PostgreSQL implementation of the durable quote store.

mod model;
mod repository;

pub use model::{NewQuoteDB, QuoteDB};
pub use repository::PgQuoteStore;
