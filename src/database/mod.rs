/// Database module
///
/// This module defines the persistent store collaborator used by the support
/// core: settings documents, analytics rows, rate window rows and token usage.
/// The Postgres implementation uses connection pooling with statement timeouts;
/// the in-memory implementation backs tests and database-less embedders.

mod postgres_client;
mod schema;
mod memory;
mod write_queue;


use crate::error::SupportResult;
use crate::types::{PerformanceEvent, RateWindowRow, SearchEvent, UsageRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub use memory::MemoryStore;
pub use postgres_client::PostgresStore;
pub use schema::DatabaseSchema;
pub use write_queue::{StoreWrite, WriteQueue, WriteWorker};

/// Settings document holding cache TTL and size overrides
pub const CACHE_SETTINGS_DOCUMENT: &str = "rag_cache";
/// Settings document holding rate window and token budget overrides
pub const LIMIT_SETTINGS_DOCUMENT: &str = "rag_limits";

/// Durable storage used by the support core
///
/// Every method may fail with a transient error. Callers on the request path
/// never await these directly; they go through [`WriteQueue`] or fail open.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Read a JSON settings document by system name
    async fn load_settings(&self, name: &str) -> SupportResult<Option<Value>>;

    /// Replace a JSON settings document
    async fn save_settings(&self, name: &str, document: &Value) -> SupportResult<()>;

    /// Bulk insert search telemetry, ignoring rows whose id already exists
    async fn insert_search_events(&self, events: &[SearchEvent]) -> SupportResult<u64>;

    /// Bulk insert performance telemetry, ignoring rows whose id already exists
    async fn insert_performance_events(&self, events: &[PerformanceEvent]) -> SupportResult<u64>;

    /// Insert or raise the durable counter for one rate window
    async fn upsert_rate_window(&self, row: &RateWindowRow) -> SupportResult<()>;

    /// Sum of tokens used by a tenant in `[from, to)`
    async fn sum_token_usage(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SupportResult<u64>;

    /// Append a token usage record
    async fn insert_usage_record(&self, record: &UsageRecord) -> SupportResult<()>;

    /// Check store connectivity
    async fn health_check(&self) -> SupportResult<()>;
}
