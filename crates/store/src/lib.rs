pub mod db;
pub mod engine;
pub mod index;
pub mod query;
pub mod retention;
pub mod schema;
pub mod write;

pub use db::Store;
pub use engine::TraceEngine;

use tracedb_core::error::Result;
use tracedb_core::ids::TraceId;
use tracedb_core::model::{Span, Trace};
use tracedb_core::query::QueryRequest;

/// The storage contract: one capability set implemented by every concrete
/// backend, exercised by the conformance suite in `tests/conformance.rs`.
pub trait SpanStore {
    /// Stores and indexes a batch. Invalid spans are logged and skipped
    /// individually; the batch itself never fails because of them.
    fn accept(&self, spans: &[Span]) -> Result<()>;

    /// Resolves a filtered, time-bounded query into hydrated traces, most
    /// recent first.
    fn get_traces(&self, request: &QueryRequest) -> Result<Vec<Trace>>;

    /// Hydrates the given trace ids, preserving caller order and omitting
    /// ids with no stored spans.
    fn get_traces_by_ids(&self, ids: &[TraceId]) -> Result<Vec<Trace>>;

    /// Distinct service names, lexicographically sorted.
    fn service_names(&self) -> Result<Vec<String>>;

    /// Distinct operation names observed for a service, sorted.
    fn span_names(&self, service: &str) -> Result<Vec<String>>;

    /// Releases underlying resources. Idempotent; later calls on the same
    /// handle fail with `Unavailable`.
    fn close(&self);
}

impl SpanStore for Store {
    fn accept(&self, spans: &[Span]) -> Result<()> {
        Store::accept(self, spans)
    }

    fn get_traces(&self, request: &QueryRequest) -> Result<Vec<Trace>> {
        Store::get_traces(self, request)
    }

    fn get_traces_by_ids(&self, ids: &[TraceId]) -> Result<Vec<Trace>> {
        Store::get_traces_by_ids(self, ids)
    }

    fn service_names(&self) -> Result<Vec<String>> {
        Store::service_names(self)
    }

    fn span_names(&self, service: &str) -> Result<Vec<String>> {
        Store::span_names(self, service)
    }

    fn close(&self) {
        Store::close(self)
    }
}
