use std::time::Duration;

use tracedb_core::config::Config;
use tracedb_core::error::{Result, TracedbError};
use tracedb_core::ids::TraceId;
use tracedb_core::model::{Span, Trace};
use tracedb_core::query::QueryRequest;

use crate::Store;

/// Async facade over a [`Store`]. Every operation runs on a blocking worker
/// under a deadline; an elapsed deadline surfaces as `Timeout` instead of
/// hanging the caller. Dropping a returned future abandons the operation.
#[derive(Clone)]
pub struct TraceEngine {
    store: Store,
    config: Config,
}

impl TraceEngine {
    pub fn new(store: Store, config: Config) -> Self {
        Self { store, config }
    }

    /// Opens (or creates) the database at the configured path.
    pub fn open(config: Config) -> Result<Self> {
        let store = Store::open(&config.db_path)?;
        Ok(Self { store, config })
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        Ok(Self {
            store: Store::open_in_memory()?,
            config,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn accept(&self, spans: Vec<Span>) -> Result<()> {
        self.run("accept", move |store| store.accept(&spans)).await
    }

    pub async fn get_traces(&self, request: QueryRequest) -> Result<Vec<Trace>> {
        let request = self.normalize(request);
        self.run("get_traces", move |store| store.get_traces(&request))
            .await
    }

    pub async fn get_traces_by_ids(&self, ids: Vec<TraceId>) -> Result<Vec<Trace>> {
        self.run("get_traces_by_ids", move |store| {
            store.get_traces_by_ids(&ids)
        })
        .await
    }

    pub async fn service_names(&self) -> Result<Vec<String>> {
        self.run("service_names", |store| store.service_names())
            .await
    }

    pub async fn span_names(&self, service: String) -> Result<Vec<String>> {
        self.run("span_names", move |store| store.span_names(&service))
            .await
    }

    /// One retention pass with the configured ttl and size budget.
    pub async fn maintain(&self) -> Result<()> {
        let ttl = self.config.retention_ttl;
        let max_bytes = self.config.retention_max_bytes;
        self.run("maintain", move |store| store.run_retention(ttl, max_bytes))
            .await
    }

    pub fn close(&self) {
        self.store.close();
    }

    /// Requests that leave the window unset get the configured default
    /// lookback; the store fills `end_ts` with now.
    fn normalize(&self, mut request: QueryRequest) -> QueryRequest {
        if request.lookback.is_none() {
            request.lookback = Some(self.config.default_lookback.as_micros() as i64);
        }
        request
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        let task = tokio::task::spawn_blocking(move || f(&store));
        match tokio::time::timeout(self.config.query_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(TracedbError::Unavailable(format!(
                "{op} worker failed: {join}"
            ))),
            Err(_) => Err(TracedbError::Timeout(format!(
                "{op} exceeded {}",
                humanize(self.config.query_timeout)
            ))),
        }
    }
}

fn humanize(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}
