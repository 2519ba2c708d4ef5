use serde::{Deserialize, Serialize};

use crate::ids::TraceId;
use crate::model::span::Span;

/// A trace is materialized on read by grouping stored spans; nothing is
/// persisted per trace. Spans are ordered ascending by start timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trace {
    pub trace_id: TraceId,
    pub spans: Vec<Span>,
}

impl Trace {
    /// The most recent span timestamp, used for descending-recency ordering
    /// of query results.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.spans
            .iter()
            .filter_map(|s| s.timestamp)
            .max()
    }
}
