use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Window applied when a request leaves `lookback` unset: one day, matching
/// the default retention horizon.
pub const DEFAULT_LOOKBACK_MICROS: i64 = 24 * 60 * 60 * 1_000_000;

pub const DEFAULT_LIMIT: usize = 10;

/// A trace query. All filters are conjunctive: a trace qualifies only when it
/// satisfies every supplied predicate inside the time window
/// `(end_ts - lookback, end_ts]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRequest {
    pub service_name: Option<String>,
    pub span_name: Option<String>,
    /// Required annotation values (e.g. "error") or bare binary-annotation
    /// keys whose presence is required.
    pub annotations: Vec<String>,
    /// Required binary-annotation key/value pairs, matched exactly.
    pub binary_annotations: BTreeMap<String, String>,
    /// Upper bound of the window, microseconds, inclusive. Defaults to now.
    pub end_ts: Option<i64>,
    /// Window length in microseconds. Defaults to [`DEFAULT_LOOKBACK_MICROS`].
    pub lookback: Option<i64>,
    /// Maximum number of traces returned. Zero is an invalid argument.
    pub limit: usize,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            service_name: None,
            span_name: None,
            annotations: Vec::new(),
            binary_annotations: BTreeMap::new(),
            end_ts: None,
            lookback: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl QueryRequest {
    pub fn for_service(service: &str) -> Self {
        Self {
            service_name: Some(service.to_string()),
            ..Self::default()
        }
    }

    /// True when no filter is supplied and the request resolves against the
    /// all-traces index alone.
    pub fn is_unfiltered(&self) -> bool {
        self.service_name.is_none()
            && self.span_name.is_none()
            && self.annotations.is_empty()
            && self.binary_annotations.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub spans_count: usize,
    pub traces_count: usize,
    pub oldest_ts: Option<DateTime<Utc>>,
    pub newest_ts: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_is_unfiltered() {
        let req = QueryRequest::default();
        assert!(req.is_unfiltered());
        assert_eq!(req.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn service_filter_is_not_unfiltered() {
        assert!(!QueryRequest::for_service("frontend").is_unfiltered());
    }
}
