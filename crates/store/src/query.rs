use std::collections::{HashMap, HashSet};

use duckdb::params;
use tracedb_core::error::{Result, TracedbError};
use tracedb_core::ids::{SpanId, TraceId};
use tracedb_core::model::{Span, Trace};
use tracedb_core::query::{DEFAULT_LOOKBACK_MICROS, QueryRequest};
use tracedb_core::time::now_micros;
use tracing::warn;

use crate::Store;

impl Store {
    /// Resolves a query into hydrated traces, most recent first. Candidate
    /// trace ids come from the most selective index; every further predicate
    /// intersects the set. No match is an empty result, not an error.
    pub fn get_traces(&self, request: &QueryRequest) -> Result<Vec<Trace>> {
        let ids = self.trace_ids_matching(request)?;
        self.get_traces_by_ids(&ids)
    }

    /// The index-resolution half of `get_traces`: trace ids satisfying every
    /// predicate inside `(end_ts - lookback, end_ts]`, descending by
    /// timestamp, capped at the request limit.
    pub fn trace_ids_matching(&self, request: &QueryRequest) -> Result<Vec<TraceId>> {
        if request.limit == 0 {
            return Err(TracedbError::InvalidArgument(
                "limit must be positive".into(),
            ));
        }
        let end_ts = match request.end_ts {
            Some(v) if v <= 0 => {
                return Err(TracedbError::InvalidArgument(format!(
                    "end_ts must be positive, got {v}"
                )));
            }
            Some(v) => v,
            None => now_micros(),
        };
        let lookback = match request.lookback {
            Some(v) if v <= 0 => {
                return Err(TracedbError::InvalidArgument(format!(
                    "lookback must be positive, got {v}"
                )));
            }
            Some(v) => v,
            None => DEFAULT_LOOKBACK_MICROS,
        };
        if request.span_name.is_some() && request.service_name.is_none() {
            return Err(TracedbError::InvalidArgument(
                "span name filter requires a service name".into(),
            ));
        }

        let lower = end_ts.saturating_sub(lookback);
        let upper = end_ts;

        let mut candidates = match (&request.service_name, &request.span_name) {
            (Some(service), Some(name)) => {
                Some(self.ids_for_span_name(service, name, lower, upper)?)
            }
            (Some(service), None) => Some(self.ids_for_service(service, lower, upper)?),
            _ => None,
        };

        let mut predicates: Vec<(String, String)> = request
            .annotations
            .iter()
            .map(|value| (value.clone(), String::new()))
            .collect();
        for (key, value) in &request.binary_annotations {
            predicates.push((key.clone(), value.clone()));
        }
        for (key, value) in &predicates {
            let matched = self.ids_for_annotation(key, value, lower, upper)?;
            candidates = Some(match candidates.take() {
                None => matched,
                Some(current) => intersect(current, matched),
            });
            if candidates.as_ref().is_some_and(|c| c.is_empty()) {
                return Ok(Vec::new());
            }
        }

        let mut ranked: Vec<(String, i64)> = match candidates {
            Some(map) => map.into_iter().collect(),
            None => self.ids_all_traces(lower, upper)?.into_iter().collect(),
        };
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(request.limit);

        ranked
            .into_iter()
            .map(|(id, _)| TraceId::parse(&id))
            .collect()
    }

    /// Hydrates traces for the given ids. Duplicate ids collapse to their
    /// first occurrence; caller order is preserved; ids with no stored spans
    /// are omitted. Per-trace spans are ascending by start timestamp.
    pub fn get_traces_by_ids(&self, ids: &[TraceId]) -> Result<Vec<Trace>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let ordered: Vec<TraceId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let mut grouped = self.with_read_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT span_id, parent_id, name, ts, duration, debug,
                            annotations_json, binary_annotations_json
                     FROM spans
                     WHERE trace_id = ?
                     ORDER BY idx_ts ASC, span_id ASC",
                )
                .map_err(|e| {
                    TracedbError::Unavailable(format!("prepare trace spans failed: {e}"))
                })?;

            let mut grouped: HashMap<TraceId, Vec<Span>> = HashMap::new();
            for trace_id in &ordered {
                let rows = stmt
                    .query_map(params![trace_id.to_string()], span_row)
                    .map_err(|e| {
                        TracedbError::Unavailable(format!(
                            "query trace spans failed for {trace_id}: {e}"
                        ))
                    })?;

                let mut spans = Vec::new();
                for row in rows {
                    let raw = row.map_err(|e| {
                        TracedbError::Unavailable(format!("map trace span failed: {e}"))
                    })?;
                    match decode_span(*trace_id, raw) {
                        Ok(span) => spans.push(span),
                        // A bad row excludes only itself from hydration.
                        Err(e) => {
                            warn!(trace_id = %trace_id, error = %e, "skipping undecodable span row")
                        }
                    }
                }
                if !spans.is_empty() {
                    grouped.insert(*trace_id, spans);
                }
            }
            Ok(grouped)
        })?;

        let mut traces = Vec::new();
        for trace_id in ordered {
            if let Some(spans) = grouped.remove(&trace_id) {
                traces.push(Trace { trace_id, spans });
            }
        }
        Ok(traces)
    }

    pub fn service_names(&self) -> Result<Vec<String>> {
        self.distinct_strings(
            "SELECT DISTINCT service FROM service_index ORDER BY service ASC",
            None,
        )
    }

    pub fn span_names(&self, service: &str) -> Result<Vec<String>> {
        self.distinct_strings(
            "SELECT DISTINCT name FROM span_name_index WHERE service = ? ORDER BY name ASC",
            Some(service),
        )
    }

    fn distinct_strings(&self, sql: &str, arg: Option<&str>) -> Result<Vec<String>> {
        self.with_read_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| TracedbError::Unavailable(format!("prepare names failed: {e}")))?;
            fn string_row(row: &duckdb::Row<'_>) -> duckdb::Result<String> {
                row.get::<_, String>(0)
            }
            let rows = match arg {
                Some(arg) => stmt.query_map(params![arg], string_row),
                None => stmt.query_map([], string_row),
            }
            .map_err(|e| TracedbError::Unavailable(format!("query names failed: {e}")))?;

            let mut names = Vec::new();
            for row in rows {
                names.push(
                    row.map_err(|e| TracedbError::Unavailable(format!("map name failed: {e}")))?,
                );
            }
            Ok(names)
        })
    }
}

/// Keeps ids present in both maps. The smaller timestamp wins so the rank
/// reflects a moment at which every predicate so far was satisfied.
fn intersect(current: HashMap<String, i64>, matched: HashMap<String, i64>) -> HashMap<String, i64> {
    current
        .into_iter()
        .filter_map(|(id, ts)| matched.get(&id).map(|other| (id, ts.min(*other))))
        .collect()
}

struct SpanRow {
    span_id: String,
    parent_id: Option<String>,
    name: String,
    ts: Option<i64>,
    duration: Option<i64>,
    debug: Option<bool>,
    annotations_json: String,
    binary_annotations_json: String,
}

fn span_row(row: &duckdb::Row<'_>) -> duckdb::Result<SpanRow> {
    Ok(SpanRow {
        span_id: row.get::<_, String>(0)?,
        parent_id: row.get::<_, Option<String>>(1)?,
        name: row.get::<_, String>(2)?,
        ts: row.get::<_, Option<i64>>(3)?,
        duration: row.get::<_, Option<i64>>(4)?,
        debug: row.get::<_, Option<bool>>(5)?,
        annotations_json: row.get::<_, String>(6)?,
        binary_annotations_json: row.get::<_, String>(7)?,
    })
}

fn decode_span(trace_id: TraceId, row: SpanRow) -> Result<Span> {
    let id = SpanId::parse(&row.span_id)?;
    let parent_id = match row.parent_id {
        Some(raw) => Some(SpanId::parse(&raw)?),
        None => None,
    };
    let annotations = serde_json::from_str(&row.annotations_json)
        .map_err(|e| TracedbError::Parse(format!("decode annotations failed: {e}")))?;
    let binary_annotations = serde_json::from_str(&row.binary_annotations_json)
        .map_err(|e| TracedbError::Parse(format!("decode binary annotations failed: {e}")))?;

    Ok(Span {
        trace_id,
        id,
        parent_id,
        name: row.name,
        timestamp: row.ts,
        duration: row.duration,
        annotations,
        binary_annotations,
        debug: row.debug,
    })
}
