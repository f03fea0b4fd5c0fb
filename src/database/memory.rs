use crate::database::PersistentStore;
use crate::error::{SupportError, SupportResult};
use crate::types::{LimitScope, PerformanceEvent, RateWindowRow, SearchEvent, UsageRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    settings: HashMap<String, Value>,
    search_events: Vec<SearchEvent>,
    performance_events: Vec<PerformanceEvent>,
    event_ids: HashSet<Uuid>,
    rate_windows: HashMap<(LimitScope, String, String, DateTime<Utc>), RateWindowRow>,
    usage: Vec<UsageRecord>,
}

/// In-process persistent store
///
/// Mirrors the Postgres semantics (duplicate-tolerant inserts, monotonic
/// window upserts) and can be switched into a failing mode to exercise
/// fail-open paths.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a database error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of store calls made, including failed ones
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn search_events(&self) -> Vec<SearchEvent> {
        self.state.lock().search_events.clone()
    }

    pub fn performance_events(&self) -> Vec<PerformanceEvent> {
        self.state.lock().performance_events.clone()
    }

    pub fn rate_windows(&self) -> Vec<RateWindowRow> {
        self.state.lock().rate_windows.values().cloned().collect()
    }

    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.state.lock().usage.clone()
    }

    pub fn settings(&self, name: &str) -> Option<Value> {
        self.state.lock().settings.get(name).cloned()
    }

    fn enter(&self, operation: &str) -> SupportResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SupportError::DatabaseError(format!("{} failed: store unavailable", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load_settings(&self, name: &str) -> SupportResult<Option<Value>> {
        self.enter("Settings load")?;
        Ok(self.state.lock().settings.get(name).cloned())
    }

    async fn save_settings(&self, name: &str, document: &Value) -> SupportResult<()> {
        self.enter("Settings save")?;
        self.state.lock().settings.insert(name.to_string(), document.clone());
        Ok(())
    }

    async fn insert_search_events(&self, events: &[SearchEvent]) -> SupportResult<u64> {
        self.enter("Search analytics insert")?;
        let mut state = self.state.lock();
        let mut inserted = 0;
        for event in events {
            if state.event_ids.insert(event.id) {
                state.search_events.push(event.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn insert_performance_events(&self, events: &[PerformanceEvent]) -> SupportResult<u64> {
        self.enter("Performance analytics insert")?;
        let mut state = self.state.lock();
        let mut inserted = 0;
        for event in events {
            if state.event_ids.insert(event.id) {
                state.performance_events.push(event.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn upsert_rate_window(&self, row: &RateWindowRow) -> SupportResult<()> {
        self.enter("Rate window upsert")?;
        let key = (row.scope, row.tenant_id.clone(), row.identity.clone(), row.window_start);
        let mut state = self.state.lock();
        state
            .rate_windows
            .entry(key)
            .and_modify(|existing| {
                existing.request_count = existing.request_count.max(row.request_count);
                existing.request_type = row.request_type.clone();
            })
            .or_insert_with(|| row.clone());
        Ok(())
    }

    async fn sum_token_usage(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SupportResult<u64> {
        self.enter("Token usage sum")?;
        Ok(self
            .state
            .lock()
            .usage
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.created_at >= from && r.created_at < to)
            .map(|r| r.tokens)
            .sum())
    }

    async fn insert_usage_record(&self, record: &UsageRecord) -> SupportResult<()> {
        self.enter("Token usage insert")?;
        let mut state = self.state.lock();
        if !state.usage.iter().any(|r| r.id == record.id) {
            state.usage.push(record.clone());
        }
        Ok(())
    }

    async fn health_check(&self) -> SupportResult<()> {
        self.enter("Health check")
    }
}
