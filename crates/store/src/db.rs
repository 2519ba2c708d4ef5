use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use duckdb::Connection;
use tracedb_core::error::{Result, TracedbError};
use tracedb_core::query::StatusResponse;
use tracedb_core::time::micros_to_datetime;

use crate::schema::SCHEMA_SQL;

/// Handle to one span database. Cheap to clone; all clones share the
/// underlying database and see each other's `close`.
///
/// Writes serialize on one connection. Reads clone their own connection from
/// a dedicated template, so they run in parallel with each other and never
/// wait behind a writer (nor a writer behind them).
#[derive(Clone)]
pub struct Store {
    writer: Arc<Mutex<Option<Connection>>>,
    reader: Arc<Mutex<Option<Connection>>>,
    db_path: String,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| TracedbError::Io(format!("failed to create db dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| TracedbError::Unavailable(format!("failed to open duckdb: {e}")))?;
        conn.execute_batch("PRAGMA threads=4;")
            .map_err(|e| TracedbError::Unavailable(format!("failed to set pragmas: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| TracedbError::Unavailable(format!("failed to initialize schema: {e}")))?;

        Self::from_writer(conn, path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            TracedbError::Unavailable(format!("failed to open in-memory db: {e}"))
        })?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| TracedbError::Unavailable(format!("failed to initialize schema: {e}")))?;
        Self::from_writer(conn, ":memory:".to_string())
    }

    fn from_writer(conn: Connection, db_path: String) -> Result<Self> {
        let reader = conn.try_clone().map_err(|e| {
            TracedbError::Unavailable(format!("failed to open read connection: {e}"))
        })?;
        Ok(Self {
            writer: Arc::new(Mutex::new(Some(conn))),
            reader: Arc::new(Mutex::new(Some(reader))),
            db_path,
        })
    }

    /// Drops both connections. Safe to call more than once; operations on a
    /// closed store fail with `Unavailable`.
    pub fn close(&self) {
        self.writer.lock().expect("store mutex poisoned").take();
        self.reader.lock().expect("store mutex poisoned").take();
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.writer.lock().expect("store mutex poisoned");
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(TracedbError::Unavailable("store is closed".into())),
        }
    }

    pub(crate) fn with_conn_mut<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.writer.lock().expect("store mutex poisoned");
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(TracedbError::Unavailable("store is closed".into())),
        }
    }

    /// Runs a read on its own connection. The reader template is locked only
    /// for the clone, so concurrent reads proceed in parallel and an
    /// in-flight write never stalls them.
    pub(crate) fn with_read_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = {
            let guard = self.reader.lock().expect("store mutex poisoned");
            match guard.as_ref() {
                Some(conn) => conn.try_clone().map_err(|e| {
                    TracedbError::Unavailable(format!("failed to clone read connection: {e}"))
                })?,
                None => return Err(TracedbError::Unavailable("store is closed".into())),
            }
        };
        f(&conn)
    }

    pub fn status(&self) -> Result<StatusResponse> {
        let (spans_count, traces_count, oldest, newest) = self.with_read_conn(|conn| {
            Ok((
                scalar_usize(conn, "SELECT COUNT(*) FROM spans")?,
                scalar_usize(conn, "SELECT COUNT(DISTINCT trace_id) FROM trace_index")?,
                scalar_ts(conn, "SELECT MIN(idx_ts) FROM spans")?,
                scalar_ts(conn, "SELECT MAX(idx_ts) FROM spans")?,
            ))
        })?;

        let db_size_bytes = if self.db_path == ":memory:" {
            0
        } else {
            fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StatusResponse {
            db_path: self.db_path.clone(),
            db_size_bytes,
            spans_count,
            traces_count,
            oldest_ts: oldest.and_then(micros_to_datetime),
            newest_ts: newest.and_then(micros_to_datetime),
        })
    }

    pub(crate) fn db_path(&self) -> &str {
        &self.db_path
    }
}

fn scalar_usize(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|v| v as usize)
        .map_err(|e| TracedbError::Unavailable(format!("query failed: {e}")))
}

fn scalar_ts(conn: &Connection, sql: &str) -> Result<Option<i64>> {
    conn.query_row(sql, [], |row| row.get::<_, Option<i64>>(0))
        .map_err(|e| TracedbError::Unavailable(format!("query failed: {e}")))
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use tracedb_core::ids::{SpanId, TraceId};
    use tracedb_core::model::{Annotation, Endpoint, Span};

    use super::*;

    #[test]
    fn in_memory_store_initializes() {
        let store = Store::open_in_memory().unwrap();
        let status = store.status().unwrap();
        assert_eq!(status.spans_count, 0);
        assert_eq!(status.traces_count, 0);
        assert!(status.oldest_ts.is_none());
    }

    #[test]
    fn close_is_idempotent_and_blocks_further_use() {
        let store = Store::open_in_memory().unwrap();
        store.close();
        store.close();
        let err = store.status().unwrap_err();
        assert!(matches!(err, TracedbError::Unavailable(_)));
    }

    #[test]
    fn clones_share_the_connection() {
        let store = Store::open_in_memory().unwrap();
        let other = store.clone();
        other.close();
        assert!(store.status().is_err());
    }

    #[test]
    fn reads_do_not_wait_on_the_writer_lock() {
        let store = Store::open_in_memory().unwrap();
        store
            .accept(&[Span {
                trace_id: TraceId::new(0, 1),
                id: SpanId(1),
                parent_id: None,
                name: "get".into(),
                timestamp: Some(1000),
                duration: None,
                annotations: vec![Annotation {
                    timestamp: 1000,
                    value: "sr".into(),
                    endpoint: Some(Endpoint::service("frontend")),
                }],
                binary_annotations: Vec::new(),
                debug: None,
            }])
            .unwrap();

        // Park a thread inside the writer lock, then read while it is held.
        let blocker_store = store.clone();
        let (locked_tx, locked_rx) = mpsc::channel();
        let blocker = std::thread::spawn(move || {
            blocker_store
                .with_conn(|_| {
                    let _ = locked_tx.send(());
                    std::thread::sleep(Duration::from_millis(500));
                    Ok(())
                })
                .unwrap();
        });
        locked_rx.recv().unwrap();

        let started = std::time::Instant::now();
        assert_eq!(store.service_names().unwrap(), vec!["frontend"]);
        assert_eq!(store.status().unwrap().spans_count, 1);
        assert!(started.elapsed() < Duration::from_millis(300));
        blocker.join().unwrap();
    }
}
