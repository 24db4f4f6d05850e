//! Redis-backed [`ReportQueue`].

use async_trait::async_trait;
use log::warn;
use redis::aio::ConnectionManager;

use finpipe_core::metrics::{CycleReport, ReportQueue};
use finpipe_core::Result;

use crate::errors::IntoCore;
use crate::keys::KeySpace;

/// Oldest reports are dropped past this many, so a server that never
/// scrapes cannot grow the list without bound.
pub const MAX_QUEUED_REPORTS: isize = 10_000;

/// Reports kept as JSON in a single Redis list.
#[derive(Clone)]
pub struct RedisReportQueue {
    conn: ConnectionManager,
    keys: KeySpace,
}

impl RedisReportQueue {
    pub fn new(conn: ConnectionManager, keys: KeySpace) -> Self {
        Self { conn, keys }
    }
}

#[async_trait]
impl ReportQueue for RedisReportQueue {
    async fn publish(&self, reports: &[CycleReport]) -> Result<()> {
        if reports.is_empty() {
            return Ok(());
        }
        let encoded = reports
            .iter()
            .map(CycleReport::to_json)
            .collect::<Result<Vec<_>>>()?;

        let key = self.keys.reports();
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .rpush(&key, encoded)
            .ignore()
            .ltrim(&key, -MAX_QUEUED_REPORTS, -1)
            .ignore()
            .query_async(&mut conn)
            .await
            .into_core()?;
        Ok(())
    }

    async fn drain(&self) -> Result<Vec<CycleReport>> {
        let key = self.keys.reports();
        let mut conn = self.conn.clone();
        let (raw,): (Vec<String>,) = redis::pipe()
            .atomic()
            .lrange(&key, 0, -1)
            .del(&key)
            .ignore()
            .query_async(&mut conn)
            .await
            .into_core()?;
        Ok(decode_all(raw))
    }
}

/// Decode queued reports, dropping any that no longer parse.
fn decode_all(raw: Vec<String>) -> Vec<CycleReport> {
    raw.into_iter()
        .filter_map(|item| match CycleReport::from_json(&item) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Dropping undecodable cycle report: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use finpipe_core::JobKind;

    #[test]
    fn test_undecodable_reports_are_dropped() {
        let good = CycleReport::Skipped { job: JobKind::Fetch };
        let raw = vec![
            "not json".to_string(),
            good.to_json().unwrap(),
            r#"{"kind":"reboot"}"#.to_string(),
        ];
        assert_eq!(decode_all(raw), vec![good]);
    }
}
