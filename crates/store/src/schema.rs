pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS spans (
  trace_id TEXT NOT NULL,
  span_id TEXT NOT NULL,
  fingerprint TEXT NOT NULL,
  parent_id TEXT,
  name TEXT NOT NULL,
  ts BIGINT,
  duration BIGINT,
  debug BOOLEAN,
  idx_ts BIGINT NOT NULL,
  annotations_json TEXT NOT NULL,
  binary_annotations_json TEXT NOT NULL,
  PRIMARY KEY (trace_id, span_id, fingerprint)
);

CREATE TABLE IF NOT EXISTS service_index (
  service TEXT NOT NULL,
  trace_id TEXT NOT NULL,
  ts BIGINT NOT NULL,
  PRIMARY KEY (service, trace_id, ts)
);

CREATE TABLE IF NOT EXISTS span_name_index (
  service TEXT NOT NULL,
  name TEXT NOT NULL,
  trace_id TEXT NOT NULL,
  ts BIGINT NOT NULL,
  PRIMARY KEY (service, name, trace_id, ts)
);

CREATE TABLE IF NOT EXISTS annotation_index (
  key TEXT NOT NULL,
  value TEXT NOT NULL,
  trace_id TEXT NOT NULL,
  ts BIGINT NOT NULL,
  PRIMARY KEY (key, value, trace_id, ts)
);

CREATE TABLE IF NOT EXISTS trace_index (
  trace_id TEXT NOT NULL,
  ts BIGINT NOT NULL,
  PRIMARY KEY (trace_id, ts)
);

CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(trace_id);
CREATE INDEX IF NOT EXISTS idx_spans_idx_ts ON spans(idx_ts);
CREATE INDEX IF NOT EXISTS idx_service_ts ON service_index(service, ts);
CREATE INDEX IF NOT EXISTS idx_span_name_ts ON span_name_index(service, name, ts);
CREATE INDEX IF NOT EXISTS idx_annotation_ts ON annotation_index(key, value, ts);
CREATE INDEX IF NOT EXISTS idx_trace_ts ON trace_index(ts);
"#;
