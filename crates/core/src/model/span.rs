use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::ids::{SpanId, TraceId};

/// The host that recorded an annotation. Service names are derived from
/// endpoints, so a span with no endpoints belongs to no service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    pub service_name: String,
    pub ipv4: Option<Ipv4Addr>,
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn service(name: &str) -> Self {
        Self {
            service_name: name.to_string(),
            ipv4: None,
            port: None,
        }
    }
}

/// A timestamped event observed during the span, e.g. "cs" / "sr".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Annotation {
    /// Microseconds since the UNIX epoch.
    pub timestamp: i64,
    pub value: String,
    pub endpoint: Option<Endpoint>,
}

/// A key/value tag attached to a span.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BinaryAnnotation {
    pub key: String,
    pub value: TagValue,
    pub endpoint: Option<Endpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
}

/// One timed unit of work in a distributed trace. Spans are immutable once
/// accepted; a trace grows by accumulating more spans under one trace id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Span {
    pub trace_id: TraceId,
    pub id: SpanId,
    pub parent_id: Option<SpanId>,
    pub name: String,
    /// Start time in microseconds since the UNIX epoch. Absent for spans
    /// reported only through their annotations.
    pub timestamp: Option<i64>,
    /// Duration in microseconds.
    pub duration: Option<i64>,
    pub annotations: Vec<Annotation>,
    pub binary_annotations: Vec<BinaryAnnotation>,
    pub debug: Option<bool>,
}

impl Span {
    /// Distinct service names across all endpoints on this span.
    pub fn service_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for annotation in &self.annotations {
            if let Some(endpoint) = &annotation.endpoint {
                names.insert(endpoint.service_name.clone());
            }
        }
        for tag in &self.binary_annotations {
            if let Some(endpoint) = &tag.endpoint {
                names.insert(endpoint.service_name.clone());
            }
        }
        names
    }

    /// Timestamp used for index entries and recency ordering: the span start
    /// time, else the latest annotation time, else `fallback` (receive time).
    pub fn index_timestamp(&self, fallback: i64) -> i64 {
        if let Some(ts) = self.timestamp {
            return ts;
        }
        self.annotations
            .iter()
            .map(|a| a.timestamp)
            .max()
            .unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_with(annotations: Vec<Annotation>, tags: Vec<BinaryAnnotation>) -> Span {
        Span {
            trace_id: TraceId::new(0, 1),
            id: SpanId(2),
            parent_id: None,
            name: "get".into(),
            timestamp: None,
            duration: None,
            annotations,
            binary_annotations: tags,
            debug: None,
        }
    }

    #[test]
    fn service_names_collects_all_endpoints() {
        let span = span_with(
            vec![Annotation {
                timestamp: 1000,
                value: "sr".into(),
                endpoint: Some(Endpoint::service("backend")),
            }],
            vec![BinaryAnnotation {
                key: "http.path".into(),
                value: TagValue::Str("/x".into()),
                endpoint: Some(Endpoint::service("frontend")),
            }],
        );
        let names = span.service_names();
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["backend".to_string(), "frontend".to_string()]
        );
    }

    #[test]
    fn index_timestamp_prefers_span_start() {
        let mut span = span_with(
            vec![Annotation {
                timestamp: 5000,
                value: "cs".into(),
                endpoint: None,
            }],
            Vec::new(),
        );
        assert_eq!(span.index_timestamp(99), 5000);

        span.timestamp = Some(1000);
        assert_eq!(span.index_timestamp(99), 1000);

        span.timestamp = None;
        span.annotations.clear();
        assert_eq!(span.index_timestamp(99), 99);
    }

    #[test]
    fn tag_values_round_trip_as_json() {
        let tags = vec![
            TagValue::Bool(true),
            TagValue::I64(42),
            TagValue::F64(0.25),
            TagValue::Str("redis".into()),
            TagValue::Bytes(vec![1, 2, 3]),
        ];
        let encoded = serde_json::to_string(&tags).unwrap();
        let decoded: Vec<TagValue> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, tags);
    }
}
