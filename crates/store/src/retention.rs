use std::fs;
use std::path::Path;
use std::time::Duration;

use duckdb::params;
use tracedb_core::error::{Result, TracedbError};
use tracedb_core::time::now_micros;

use crate::Store;

const SIZE_PRUNE_BATCH: i64 = 10_000;

/// Retention is a maintenance concern the embedding process schedules; the
/// engine never deletes anything on its own.
impl Store {
    pub fn run_retention(&self, ttl: Duration, max_bytes: u64) -> Result<()> {
        self.prune_ttl(ttl)?;
        self.prune_size(max_bytes)?;
        Ok(())
    }

    /// Deletes spans and their index entries older than `now - ttl`.
    pub fn prune_ttl(&self, ttl: Duration) -> Result<()> {
        let cutoff = now_micros().saturating_sub(ttl.as_micros() as i64);
        self.delete_older_than(cutoff)
    }

    /// Trims oldest spans while the database file exceeds the byte budget.
    /// No-op for in-memory stores.
    pub fn prune_size(&self, max_bytes: u64) -> Result<()> {
        if self.db_path() == ":memory:" {
            return Ok(());
        }

        let path = Path::new(self.db_path());
        let size = fs::metadata(path)
            .map_err(|e| TracedbError::Io(format!("failed to stat db: {e}")))?
            .len();
        if size <= max_bytes {
            return Ok(());
        }

        let cutoff = self.with_conn(|conn| {
            conn.query_row(
                "SELECT MAX(idx_ts) FROM (
                   SELECT idx_ts FROM spans ORDER BY idx_ts ASC LIMIT ?
                 )",
                params![SIZE_PRUNE_BATCH],
                |row| row.get::<_, Option<i64>>(0),
            )
            .map_err(|e| TracedbError::Unavailable(format!("size prune scan failed: {e}")))
        })?;

        match cutoff {
            // Inclusive bound: everything up to the scanned batch goes.
            Some(cutoff) => self.delete_older_than(cutoff + 1),
            None => Ok(()),
        }
    }

    fn delete_older_than(&self, cutoff: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM spans WHERE idx_ts < ?", params![cutoff])
                .map_err(|e| {
                    TracedbError::Unavailable(format!("retention spans delete failed: {e}"))
                })?;
            conn.execute("DELETE FROM service_index WHERE ts < ?", params![cutoff])
                .map_err(|e| {
                    TracedbError::Unavailable(format!("retention service index delete failed: {e}"))
                })?;
            conn.execute("DELETE FROM span_name_index WHERE ts < ?", params![cutoff])
                .map_err(|e| {
                    TracedbError::Unavailable(format!(
                        "retention span name index delete failed: {e}"
                    ))
                })?;
            conn.execute("DELETE FROM annotation_index WHERE ts < ?", params![cutoff])
                .map_err(|e| {
                    TracedbError::Unavailable(format!(
                        "retention annotation index delete failed: {e}"
                    ))
                })?;
            conn.execute("DELETE FROM trace_index WHERE ts < ?", params![cutoff])
                .map_err(|e| {
                    TracedbError::Unavailable(format!("retention trace index delete failed: {e}"))
                })?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tracedb_core::ids::{SpanId, TraceId};
    use tracedb_core::model::{Annotation, Endpoint, Span};
    use tracedb_core::time::now_micros;

    use crate::Store;

    fn span_at(trace: u64, ts: i64) -> Span {
        Span {
            trace_id: TraceId::new(0, trace),
            id: SpanId(1),
            parent_id: None,
            name: "get".into(),
            timestamp: Some(ts),
            duration: None,
            annotations: vec![Annotation {
                timestamp: ts,
                value: "sr".into(),
                endpoint: Some(Endpoint::service("frontend")),
            }],
            binary_annotations: Vec::new(),
            debug: None,
        }
    }

    #[test]
    fn ttl_prunes_spans_and_their_index_entries() {
        let store = Store::open_in_memory().unwrap();
        let now = now_micros();
        let stale = now - 3600 * 1_000_000;

        store.accept(&[span_at(1, stale), span_at(2, now)]).unwrap();
        store.prune_ttl(Duration::from_secs(60)).unwrap();

        let status = store.status().unwrap();
        assert_eq!(status.spans_count, 1);
        assert_eq!(status.traces_count, 1);
        assert!(store.get_traces_by_ids(&[TraceId::new(0, 1)]).unwrap().is_empty());
        // Recent data and its indexes survive.
        assert_eq!(store.service_names().unwrap(), vec!["frontend"]);
    }

    #[test]
    fn size_prune_is_a_noop_in_memory() {
        let store = Store::open_in_memory().unwrap();
        store.accept(&[span_at(1, now_micros())]).unwrap();
        store.prune_size(1).unwrap();
        assert_eq!(store.status().unwrap().spans_count, 1);
    }
}
