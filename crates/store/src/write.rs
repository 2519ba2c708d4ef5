use duckdb::params;
use tracedb_core::error::{Result, TracedbError};
use tracedb_core::model::Span;
use tracedb_core::time::now_micros;
use tracing::warn;

use crate::Store;
use crate::index::{IndexUpdate, index_update};

/// A span flattened into its storage representation, plus the index rows it
/// contributes. Encoding happens before the transaction opens so a bad span
/// can be skipped without aborting the batch.
struct SpanRowValues {
    trace_id: String,
    span_id: String,
    fingerprint: String,
    parent_id: Option<String>,
    name: String,
    ts: Option<i64>,
    duration: Option<i64>,
    debug: Option<bool>,
    idx_ts: i64,
    annotations_json: String,
    binary_annotations_json: String,
    index: IndexUpdate,
}

impl Store {
    /// Validates, stores and indexes a batch in one transaction. Invalid or
    /// unencodable spans are logged and skipped individually; one bad span
    /// never fails the batch. Returns after commit.
    pub fn accept(&self, spans: &[Span]) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }

        let received_at = now_micros();
        let mut rows = Vec::with_capacity(spans.len());
        for span in spans {
            let encoded = validate(span).and_then(|_| encode_row(span, received_at));
            match encoded {
                Ok(row) => rows.push(row),
                Err(e) => warn!(error = %e, "dropping span from batch"),
            }
        }

        self.store_rows(&rows)
    }

    /// Single-span write. Unlike `accept`, a malformed span is an error here.
    pub fn put(&self, span: &Span) -> Result<()> {
        validate(span)?;
        let row = encode_row(span, now_micros())?;
        self.store_rows(&[row])
    }

    fn store_rows(&self, rows: &[SpanRowValues]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        self.with_conn_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| TracedbError::Unavailable(format!("begin tx failed: {e}")))?;

            {
                let mut span_stmt = tx
                    .prepare(
                        "INSERT OR REPLACE INTO spans
                         (trace_id, span_id, fingerprint, parent_id, name, ts, duration, debug,
                          idx_ts, annotations_json, binary_annotations_json)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .map_err(|e| {
                        TracedbError::Unavailable(format!("prepare insert spans failed: {e}"))
                    })?;
                let mut service_stmt = tx
                    .prepare(
                        "INSERT OR REPLACE INTO service_index (service, trace_id, ts)
                         VALUES (?, ?, ?)",
                    )
                    .map_err(|e| {
                        TracedbError::Unavailable(format!("prepare service index failed: {e}"))
                    })?;
                let mut name_stmt = tx
                    .prepare(
                        "INSERT OR REPLACE INTO span_name_index (service, name, trace_id, ts)
                         VALUES (?, ?, ?, ?)",
                    )
                    .map_err(|e| {
                        TracedbError::Unavailable(format!("prepare span name index failed: {e}"))
                    })?;
                let mut annotation_stmt = tx
                    .prepare(
                        "INSERT OR REPLACE INTO annotation_index (key, value, trace_id, ts)
                         VALUES (?, ?, ?, ?)",
                    )
                    .map_err(|e| {
                        TracedbError::Unavailable(format!("prepare annotation index failed: {e}"))
                    })?;
                let mut trace_stmt = tx
                    .prepare(
                        "INSERT OR REPLACE INTO trace_index (trace_id, ts) VALUES (?, ?)",
                    )
                    .map_err(|e| {
                        TracedbError::Unavailable(format!("prepare trace index failed: {e}"))
                    })?;

                for row in rows {
                    span_stmt
                        .execute(params![
                            row.trace_id,
                            row.span_id,
                            row.fingerprint,
                            row.parent_id,
                            row.name,
                            row.ts,
                            row.duration,
                            row.debug,
                            row.idx_ts,
                            row.annotations_json,
                            row.binary_annotations_json,
                        ])
                        .map_err(|e| {
                            TracedbError::Unavailable(format!(
                                "insert span failed for trace {}: {e}",
                                row.trace_id
                            ))
                        })?;

                    for service in &row.index.services {
                        service_stmt
                            .execute(params![service, row.trace_id, row.idx_ts])
                            .map_err(|e| {
                                TracedbError::Unavailable(format!(
                                    "insert service index failed: {e}"
                                ))
                            })?;
                    }
                    for (service, name) in &row.index.span_names {
                        name_stmt
                            .execute(params![service, name, row.trace_id, row.idx_ts])
                            .map_err(|e| {
                                TracedbError::Unavailable(format!(
                                    "insert span name index failed: {e}"
                                ))
                            })?;
                    }
                    for (key, value) in &row.index.annotation_values {
                        annotation_stmt
                            .execute(params![key, value, row.trace_id, row.idx_ts])
                            .map_err(|e| {
                                TracedbError::Unavailable(format!(
                                    "insert annotation index failed: {e}"
                                ))
                            })?;
                    }
                    trace_stmt
                        .execute(params![row.trace_id, row.idx_ts])
                        .map_err(|e| {
                            TracedbError::Unavailable(format!("insert trace index failed: {e}"))
                        })?;
                }
            }

            tx.commit()
                .map_err(|e| TracedbError::Unavailable(format!("commit spans failed: {e}")))
        })
    }
}

fn validate(span: &Span) -> Result<()> {
    if span.trace_id.is_zero() {
        return Err(TracedbError::InvalidSpan(format!(
            "zero trace id for span {}",
            span.id
        )));
    }
    if span.id.is_zero() {
        return Err(TracedbError::InvalidSpan(format!(
            "zero span id in trace {}",
            span.trace_id
        )));
    }
    Ok(())
}

fn encode_row(span: &Span, received_at: i64) -> Result<SpanRowValues> {
    let annotations_json = serde_json::to_string(&span.annotations)
        .map_err(|e| TracedbError::Parse(format!("encode annotations failed: {e}")))?;
    let binary_annotations_json = serde_json::to_string(&span.binary_annotations)
        .map_err(|e| TracedbError::Parse(format!("encode binary annotations failed: {e}")))?;

    Ok(SpanRowValues {
        trace_id: span.trace_id.to_string(),
        span_id: span.id.to_string(),
        fingerprint: fingerprint(span)?,
        parent_id: span.parent_id.map(|id| id.to_string()),
        name: span.name.clone(),
        ts: span.timestamp,
        duration: span.duration,
        debug: span.debug,
        idx_ts: span.index_timestamp(received_at),
        annotations_json,
        binary_annotations_json,
        index: index_update(span),
    })
}

/// Dedupe key: identical spans hash identically, so rewriting one lands on
/// the same primary key and replaces rather than duplicates. The digest is
/// persisted, so it must stay stable across builds.
fn fingerprint(span: &Span) -> Result<String> {
    let encoded = serde_json::to_string(span)
        .map_err(|e| TracedbError::Parse(format!("encode span failed: {e}")))?;
    Ok(format!("{:016x}", xxhash_rust::xxh3::xxh3_64(encoded.as_bytes())))
}

#[cfg(test)]
mod tests {
    use tracedb_core::ids::{SpanId, TraceId};
    use tracedb_core::model::{Annotation, Endpoint, Span};

    use crate::Store;

    fn sample_span(trace: u64, span: u64, ts: i64, service: &str) -> Span {
        Span {
            trace_id: TraceId::new(0, trace),
            id: SpanId(span),
            parent_id: None,
            name: "get".into(),
            timestamp: Some(ts),
            duration: Some(100),
            annotations: vec![Annotation {
                timestamp: ts,
                value: "sr".into(),
                endpoint: Some(Endpoint::service(service)),
            }],
            binary_annotations: Vec::new(),
            debug: None,
        }
    }

    #[test]
    fn accept_skips_invalid_spans_without_failing_the_batch() {
        let store = Store::open_in_memory().unwrap();
        let good = sample_span(1, 1, 1000, "frontend");
        let bad = Span {
            trace_id: TraceId::new(0, 0),
            ..sample_span(1, 2, 1000, "frontend")
        };

        store.accept(&[bad, good.clone()]).unwrap();

        let traces = store.get_traces_by_ids(&[good.trace_id]).unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].spans, vec![good]);
    }

    #[test]
    fn put_rejects_zero_ids() {
        let store = Store::open_in_memory().unwrap();
        let mut span = sample_span(1, 1, 1000, "frontend");
        span.id = SpanId(0);
        assert!(store.put(&span).is_err());

        let mut span = sample_span(1, 1, 1000, "frontend");
        span.trace_id = TraceId::new(0, 0);
        assert!(store.put(&span).is_err());
    }

    #[test]
    fn identical_spans_dedupe_to_one_row() {
        let store = Store::open_in_memory().unwrap();
        let span = sample_span(1, 1, 1000, "frontend");

        store.accept(&[span.clone()]).unwrap();
        store.accept(&[span.clone()]).unwrap();

        let traces = store.get_traces_by_ids(&[span.trace_id]).unwrap();
        assert_eq!(traces[0].spans.len(), 1);
    }

    #[test]
    fn same_ids_different_content_are_both_kept() {
        let store = Store::open_in_memory().unwrap();
        let client_half = sample_span(1, 1, 1000, "frontend");
        let mut server_half = sample_span(1, 1, 1000, "frontend");
        server_half.annotations[0].endpoint = Some(Endpoint::service("backend"));

        store.accept(&[client_half, server_half]).unwrap();

        let traces = store.get_traces_by_ids(&[TraceId::new(0, 1)]).unwrap();
        assert_eq!(traces[0].spans.len(), 2);
    }

    #[test]
    fn fingerprint_tracks_content_not_identity() {
        let span = sample_span(1, 1, 1000, "frontend");
        let same = sample_span(1, 1, 1000, "frontend");
        let mut changed = sample_span(1, 1, 1000, "frontend");
        changed.duration = Some(101);

        let fp = super::fingerprint(&span).unwrap();
        assert_eq!(fp, super::fingerprint(&same).unwrap());
        assert_ne!(fp, super::fingerprint(&changed).unwrap());
        // Persisted digest; a different hasher would orphan existing rows.
        assert_eq!(fp.len(), 16);
    }

    #[test]
    fn writes_are_indexed_atomically() {
        let store = Store::open_in_memory().unwrap();
        store.accept(&[sample_span(1, 1, 1000, "frontend")]).unwrap();

        assert_eq!(store.service_names().unwrap(), vec!["frontend"]);
        assert_eq!(store.span_names("frontend").unwrap(), vec!["get"]);
        assert_eq!(store.status().unwrap().traces_count, 1);
    }
}
