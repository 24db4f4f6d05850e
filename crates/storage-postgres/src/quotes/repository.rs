use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;

use super::model::{NewQuoteDB, QuoteDB};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::IntoCore;
use crate::schema::quotes;
use finpipe_core::quotes::{PersistedQuote, QuoteRecord, QuoteStore};
use finpipe_core::Result;

/// Rows per INSERT statement. Well under PostgreSQL's bind parameter limit.
const INSERT_CHUNK: usize = 1_000;

pub struct PgQuoteStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl PgQuoteStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl QuoteStore for PgQuoteStore {
    async fn upsert_batch(&self, records: &[QuoteRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let rows: Vec<NewQuoteDB> = records
            .iter()
            .map(|r| NewQuoteDB::from_record(r, now))
            .collect();

        // All chunks share the writer's transaction
        self.writer
            .exec(move |conn: &mut PgConnection| -> Result<usize> {
                let mut total = 0;
                for chunk in rows.chunks(INSERT_CHUNK) {
                    total += diesel::insert_into(quotes::table)
                        .values(chunk)
                        .on_conflict((quotes::symbol, quotes::observed_at))
                        .do_update()
                        .set((
                            quotes::price.eq(excluded(quotes::price)),
                            quotes::open.eq(excluded(quotes::open)),
                            quotes::high.eq(excluded(quotes::high)),
                            quotes::low.eq(excluded(quotes::low)),
                            quotes::previous_close.eq(excluded(quotes::previous_close)),
                            quotes::change.eq(excluded(quotes::change)),
                            quotes::change_percent.eq(excluded(quotes::change_percent)),
                            quotes::volume.eq(excluded(quotes::volume)),
                            quotes::source.eq(excluded(quotes::source)),
                            quotes::fetched_at.eq(excluded(quotes::fetched_at)),
                            quotes::updated_at.eq(excluded(quotes::updated_at)),
                        ))
                        .execute(conn)
                        .into_core()?;
                }
                Ok(total)
            })
            .await
    }

    fn ping(&self) -> Result<()> {
        let mut conn = get_connection(&self.pool)?;
        diesel::sql_query("SELECT 1").execute(&mut conn).into_core()?;
        Ok(())
    }

    fn latest(&self, symbol: &str) -> Result<Option<PersistedQuote>> {
        let mut conn = get_connection(&self.pool)?;
        let row = quotes::table
            .filter(quotes::symbol.eq(symbol))
            .order(quotes::observed_at.desc())
            .select(QuoteDB::as_select())
            .first(&mut conn)
            .optional()
            .into_core()?;
        Ok(row.map(PersistedQuote::from))
    }

    fn range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PersistedQuote>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = quotes::table
            .filter(quotes::symbol.eq(symbol))
            .filter(quotes::observed_at.ge(start))
            .filter(quotes::observed_at.le(end))
            .order(quotes::observed_at.asc())
            .select(QuoteDB::as_select())
            .load(&mut conn)
            .into_core()?;
        Ok(rows.into_iter().map(PersistedQuote::from).collect())
    }

    fn total_records(&self) -> Result<usize> {
        let mut conn = get_connection(&self.pool)?;
        let count: i64 = quotes::table
            .select(count_star())
            .first(&mut conn)
            .into_core()?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn symbols(&self) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;
        quotes::table
            .select(quotes::symbol)
            .distinct()
            .order(quotes::symbol.asc())
            .load::<String>(&mut conn)
            .into_core()
    }
}
