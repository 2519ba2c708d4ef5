use std::collections::{BTreeSet, HashMap};

use duckdb::params;
use tracedb_core::error::{Result, TracedbError};
use tracedb_core::model::{Span, TagValue};

use crate::Store;

/// Secondary-index rows derived from one span. Written in the same
/// transaction as the span row itself.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct IndexUpdate {
    pub services: BTreeSet<String>,
    pub span_names: BTreeSet<(String, String)>,
    /// Annotation predicates as (key, value) pairs: plain annotation values
    /// and bare binary-annotation keys carry an empty value; string-valued
    /// tags additionally contribute their exact pair. Keeping the columns
    /// separate means a key containing '=' cannot collide with another
    /// key/value split.
    pub annotation_values: BTreeSet<(String, String)>,
}

pub(crate) fn index_update(span: &Span) -> IndexUpdate {
    let services = span.service_names();
    let span_names = services
        .iter()
        .map(|service| (service.clone(), span.name.clone()))
        .collect();

    let mut annotation_values = BTreeSet::new();
    for annotation in &span.annotations {
        annotation_values.insert((annotation.value.clone(), String::new()));
    }
    for tag in &span.binary_annotations {
        annotation_values.insert((tag.key.clone(), String::new()));
        if let TagValue::Str(value) = &tag.value {
            annotation_values.insert((tag.key.clone(), value.clone()));
        }
    }

    IndexUpdate {
        services,
        span_names,
        annotation_values,
    }
}

/// Index lookups. Each returns a map of trace id (hex) to the latest index
/// timestamp observed inside the window `(lower, upper]`.
impl Store {
    pub(crate) fn ids_for_service(
        &self,
        service: &str,
        lower: i64,
        upper: i64,
    ) -> Result<HashMap<String, i64>> {
        self.with_read_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT trace_id, MAX(ts) FROM service_index
                     WHERE service = ? AND ts > ? AND ts <= ?
                     GROUP BY trace_id",
                )
                .map_err(|e| TracedbError::Unavailable(format!("prepare service lookup: {e}")))?;
            let rows = stmt
                .query_map(params![service, lower, upper], id_ts_row)
                .map_err(|e| TracedbError::Unavailable(format!("service lookup failed: {e}")))?;
            collect_id_rows(rows)
        })
    }

    pub(crate) fn ids_for_span_name(
        &self,
        service: &str,
        name: &str,
        lower: i64,
        upper: i64,
    ) -> Result<HashMap<String, i64>> {
        self.with_read_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT trace_id, MAX(ts) FROM span_name_index
                     WHERE service = ? AND name = ? AND ts > ? AND ts <= ?
                     GROUP BY trace_id",
                )
                .map_err(|e| TracedbError::Unavailable(format!("prepare span name lookup: {e}")))?;
            let rows = stmt
                .query_map(params![service, name, lower, upper], id_ts_row)
                .map_err(|e| TracedbError::Unavailable(format!("span name lookup failed: {e}")))?;
            collect_id_rows(rows)
        })
    }

    pub(crate) fn ids_for_annotation(
        &self,
        key: &str,
        value: &str,
        lower: i64,
        upper: i64,
    ) -> Result<HashMap<String, i64>> {
        self.with_read_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT trace_id, MAX(ts) FROM annotation_index
                     WHERE key = ? AND value = ? AND ts > ? AND ts <= ?
                     GROUP BY trace_id",
                )
                .map_err(|e| TracedbError::Unavailable(format!("prepare annotation lookup: {e}")))?;
            let rows = stmt
                .query_map(params![key, value, lower, upper], id_ts_row)
                .map_err(|e| TracedbError::Unavailable(format!("annotation lookup failed: {e}")))?;
            collect_id_rows(rows)
        })
    }

    pub(crate) fn ids_all_traces(&self, lower: i64, upper: i64) -> Result<HashMap<String, i64>> {
        self.with_read_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT trace_id, MAX(ts) FROM trace_index
                     WHERE ts > ? AND ts <= ?
                     GROUP BY trace_id",
                )
                .map_err(|e| TracedbError::Unavailable(format!("prepare trace lookup: {e}")))?;
            let rows = stmt
                .query_map(params![lower, upper], id_ts_row)
                .map_err(|e| TracedbError::Unavailable(format!("trace lookup failed: {e}")))?;
            collect_id_rows(rows)
        })
    }
}

fn id_ts_row(row: &duckdb::Row<'_>) -> duckdb::Result<(String, i64)> {
    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
}

fn collect_id_rows(
    rows: impl Iterator<Item = duckdb::Result<(String, i64)>>,
) -> Result<HashMap<String, i64>> {
    let mut out = HashMap::new();
    for row in rows {
        let (trace_id, ts) =
            row.map_err(|e| TracedbError::Unavailable(format!("map index row failed: {e}")))?;
        out.insert(trace_id, ts);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use tracedb_core::ids::{SpanId, TraceId};
    use tracedb_core::model::{Annotation, BinaryAnnotation, Endpoint, Span, TagValue};

    use super::*;

    #[test]
    fn index_update_covers_all_four_shapes() {
        let span = Span {
            trace_id: TraceId::new(0, 1),
            id: SpanId(2),
            parent_id: None,
            name: "get /x".into(),
            timestamp: Some(1000),
            duration: None,
            annotations: vec![Annotation {
                timestamp: 1000,
                value: "error".into(),
                endpoint: Some(Endpoint::service("frontend")),
            }],
            binary_annotations: vec![BinaryAnnotation {
                key: "http.status".into(),
                value: TagValue::Str("500".into()),
                endpoint: None,
            }],
            debug: None,
        };

        let update = index_update(&span);
        assert!(update.services.contains("frontend"));
        assert!(
            update
                .span_names
                .contains(&("frontend".to_string(), "get /x".to_string()))
        );
        assert!(
            update
                .annotation_values
                .contains(&("error".to_string(), String::new()))
        );
        assert!(
            update
                .annotation_values
                .contains(&("http.status".to_string(), String::new()))
        );
        assert!(
            update
                .annotation_values
                .contains(&("http.status".to_string(), "500".to_string()))
        );
    }

    #[test]
    fn non_string_tags_index_key_only() {
        let span = Span {
            trace_id: TraceId::new(0, 1),
            id: SpanId(2),
            parent_id: None,
            name: "compute".into(),
            timestamp: Some(1000),
            duration: None,
            annotations: Vec::new(),
            binary_annotations: vec![BinaryAnnotation {
                key: "retries".into(),
                value: TagValue::I64(3),
                endpoint: None,
            }],
            debug: None,
        };

        let update = index_update(&span);
        assert!(
            update
                .annotation_values
                .contains(&("retries".to_string(), String::new()))
        );
        assert_eq!(update.annotation_values.len(), 1);
    }
}
