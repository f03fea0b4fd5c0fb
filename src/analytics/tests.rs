use super::*;
use crate::clock::ManualClock;
use crate::config::Config;
use crate::database::{DatabaseSchema, MemoryStore};
use crate::types::{RateWindowRow, UsageRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

fn writer_with(store: Arc<dyn PersistentStore>, batch_size: usize, max_queue_len: usize) -> Arc<AnalyticsWriter> {
    let mut config = Config::default().analytics;
    config.batch_size = batch_size;
    config.max_queue_len = max_queue_len;
    Arc::new(AnalyticsWriter::new(
        &config,
        store,
        Arc::new(ManualClock::fixed()),
        ObservabilityService::new().unwrap(),
    ))
}

/// Store that rejects search rows carrying a tenant id it cannot hold
struct ConstrainedStore {
    inner: MemoryStore,
    max_tenant_chars: usize,
}

impl ConstrainedStore {
    fn new(max_tenant_chars: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            max_tenant_chars,
        }
    }
}

#[async_trait]
impl PersistentStore for ConstrainedStore {
    async fn load_settings(&self, name: &str) -> SupportResult<Option<Value>> {
        self.inner.load_settings(name).await
    }

    async fn save_settings(&self, name: &str, document: &Value) -> SupportResult<()> {
        self.inner.save_settings(name, document).await
    }

    async fn insert_search_events(&self, events: &[SearchEvent]) -> SupportResult<u64> {
        if let Some(event) = events.iter().find(|e| e.tenant_id.chars().count() > self.max_tenant_chars) {
            return Err(SupportError::RejectedRecord(format!(
                "value too long for tenant_id in event {}",
                event.id
            )));
        }
        self.inner.insert_search_events(events).await
    }

    async fn insert_performance_events(&self, events: &[PerformanceEvent]) -> SupportResult<u64> {
        self.inner.insert_performance_events(events).await
    }

    async fn upsert_rate_window(&self, row: &RateWindowRow) -> SupportResult<()> {
        self.inner.upsert_rate_window(row).await
    }

    async fn sum_token_usage(&self, tenant_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> SupportResult<u64> {
        self.inner.sum_token_usage(tenant_id, from, to).await
    }

    async fn insert_usage_record(&self, record: &UsageRecord) -> SupportResult<()> {
        self.inner.insert_usage_record(record).await
    }

    async fn health_check(&self) -> SupportResult<()> {
        self.inner.health_check().await
    }
}

fn search(query: &str) -> SearchEvent {
    SearchEvent::new("t1", query).with_results(3, 120, false)
}

async fn wait_for_empty_queue(writer: &AnalyticsWriter) {
    for _ in 0..100 {
        if writer.queue_len() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("queue still holds {} events", writer.queue_len());
}

#[tokio::test]
async fn test_flush_writes_each_kind() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer_with(store.clone(), 50, 1000);

    writer.log_search(search("فستان ابيض"));
    writer.log_performance(PerformanceEvent::new("variant_search", 12, true).for_tenant("t1"));
    writer.log_search(search("عباية"));
    assert_eq!(writer.queue_len(), 3);

    assert_eq!(writer.flush_batch().await.unwrap(), 3);
    assert_eq!(writer.queue_len(), 0);

    let searches = store.search_events();
    assert_eq!(searches.len(), 2);
    assert_eq!(searches[0].query, "فستان ابيض");
    assert_eq!(store.performance_events().len(), 1);
}

#[tokio::test]
async fn test_flush_empty_queue_skips_store() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer_with(store.clone(), 50, 1000);

    assert_eq!(writer.flush_batch().await.unwrap(), 0);
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_failed_flush_requeues_in_order() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer_with(store.clone(), 50, 1000);

    writer.log_search(search("first"));
    writer.log_search(search("second"));
    store.set_failing(true);

    let err = tokio_test::assert_err!(writer.flush_batch().await);
    assert!(err.is_database_error());
    assert_eq!(writer.queue_len(), 2);

    // Newer events queue behind the re-queued batch
    writer.log_search(search("third"));
    store.set_failing(false);
    assert_eq!(writer.flush_batch().await.unwrap(), 3);

    let queries: Vec<String> = store.search_events().into_iter().map(|e| e.query).collect();
    assert_eq!(queries, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_reflushing_same_events_is_duplicate_tolerant() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer_with(store.clone(), 50, 1000);

    let event = search("مقاس 42");
    writer.log_search(event.clone());
    writer.flush_batch().await.unwrap();
    writer.log_search(event);
    writer.flush_batch().await.unwrap();

    assert_eq!(store.search_events().len(), 1);
}

#[test]
fn test_query_truncated_by_characters() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer_with(store, 50, 1000);

    let long_query = "ب".repeat(600);
    writer.log_search(search(&long_query));

    let queue = writer.queue.lock();
    match &queue[0] {
        AnalyticsEvent::Search(event) => assert_eq!(event.query.chars().count(), 500),
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_error_message_truncated() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer_with(store, 50, 1000);

    writer.log_performance(PerformanceEvent::new("store_flush", 5, false).with_error("x".repeat(5000)));

    let queue = writer.queue.lock();
    match &queue[0] {
        AnalyticsEvent::Performance(event) => {
            assert_eq!(event.error_message.as_ref().map(|m| m.len()), Some(1000))
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_queue_bound_drops_oldest() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer_with(store, 50, 3);

    for query in ["a", "b", "c", "d", "e"] {
        writer.log_search(search(query));
    }
    assert_eq!(writer.queue_len(), 3);

    let queue = writer.queue.lock();
    match &queue[0] {
        AnalyticsEvent::Search(event) => assert_eq!(event.query, "c"),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_batch_size_triggers_flush() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer_with(store.clone(), 3, 1000);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = writer.spawn_flusher(shutdown_rx);

    // Let the immediate first tick pass on an empty queue
    tokio::time::sleep(Duration::from_millis(50)).await;

    for query in ["a", "b", "c"] {
        writer.log_search(search(query));
    }
    wait_for_empty_queue(&writer).await;
    assert_eq!(store.search_events().len(), 3);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_timed_flush_below_batch_size() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer_with(store.clone(), 50, 1000);
    writer.log_search(search("single"));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = writer.spawn_flusher(shutdown_rx);

    wait_for_empty_queue(&writer).await;
    assert_eq!(store.search_events().len(), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_cleanup_flushes_remaining_events() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer_with(store.clone(), 50, 1000);

    writer.log_performance(PerformanceEvent::new("cache_load", 3, true));
    writer.log_search(search("last"));

    let flushed = tokio_test::assert_ok!(writer.cleanup().await);
    assert_eq!(flushed, 2);
    assert_eq!(writer.queue_len(), 0);
    assert_eq!(store.performance_events().len(), 1);
}

#[tokio::test]
async fn test_rejected_row_is_dropped_and_rest_persist() {
    let store = Arc::new(ConstrainedStore::new(255));
    let writer = writer_with(store.clone(), 50, 1000);

    let oversized = SearchEvent::new("t".repeat(300), "بلوزة").with_results(1, 40, false);
    writer.log_search(oversized);
    writer.log_search(search("first"));
    writer.log_performance(PerformanceEvent::new("variant_search", 8, true));
    writer.log_search(search("second"));

    assert_eq!(tokio_test::assert_ok!(writer.flush_batch().await), 3);
    assert_eq!(writer.queue_len(), 0);

    let queries: Vec<String> = store.inner.search_events().into_iter().map(|e| e.query).collect();
    assert_eq!(queries, vec!["first", "second"]);
    assert_eq!(store.inner.performance_events().len(), 1);
    assert_eq!(
        writer.observability.metrics.metrics.analytics_events_dropped_total.get(),
        1.0
    );

    // Nothing is left to block later flushes
    writer.log_search(search("third"));
    assert_eq!(writer.flush_batch().await.unwrap(), 1);
}

#[tokio::test]
async fn test_transient_failure_during_row_retry_requeues_rest() {
    let store = Arc::new(ConstrainedStore::new(255));
    let writer = writer_with(store.clone(), 50, 1000);

    writer.log_search(SearchEvent::new("t".repeat(300), "too long"));
    writer.log_search(search("kept"));
    store.inner.set_failing(true);

    // The bulk insert is rejected before the outage shows, the row retry hits it
    let err = tokio_test::assert_err!(writer.flush_batch().await);
    assert!(err.is_database_error());
    assert_eq!(writer.queue_len(), 1);

    store.inner.set_failing(false);
    assert_eq!(writer.flush_batch().await.unwrap(), 1);
    assert_eq!(store.inner.search_events()[0].query, "kept");
}

#[test]
fn test_fields_fit_analytics_columns() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer_with(store, 50, 1000);

    writer.log_search(
        search("فستان")
            .with_intent("i".repeat(100))
            .with_client_address("a".repeat(100)),
    );
    writer.log_performance(PerformanceEvent::new("o".repeat(200), 1, true));

    let queue = writer.queue.lock();
    match &queue[0] {
        AnalyticsEvent::Search(event) => {
            assert_eq!(event.intent.as_ref().map(|i| i.chars().count()), Some(MAX_INTENT_CHARS));
            assert_eq!(
                event.client_address.as_ref().map(|a| a.chars().count()),
                Some(MAX_CLIENT_ADDRESS_CHARS)
            );
        }
        other => panic!("unexpected event {:?}", other),
    }
    match &queue[1] {
        AnalyticsEvent::Performance(event) => assert_eq!(event.operation.chars().count(), MAX_OPERATION_CHARS),
        other => panic!("unexpected event {:?}", other),
    }

    let searches = DatabaseSchema::create_search_analytics_table_sql();
    assert!(searches.contains(&format!("intent VARCHAR({})", MAX_INTENT_CHARS)));
    assert!(searches.contains(&format!("client_address VARCHAR({})", MAX_CLIENT_ADDRESS_CHARS)));
    let performances = DatabaseSchema::create_performance_analytics_table_sql();
    assert!(performances.contains(&format!("operation VARCHAR({})", MAX_OPERATION_CHARS)));
}

#[test]
fn test_events_stamped_with_writer_clock() {
    let store = Arc::new(MemoryStore::new());
    let writer = writer_with(store, 50, 1000);

    writer.log_search(search("ساعة"));
    writer.log_performance(PerformanceEvent::new("cache_load", 2, true));

    let expected = ManualClock::fixed().now();
    let queue = writer.queue.lock();
    for event in queue.iter() {
        let created_at = match event {
            AnalyticsEvent::Search(event) => event.created_at,
            AnalyticsEvent::Performance(event) => event.created_at,
        };
        assert_eq!(created_at, expected);
    }
}

#[test]
fn test_truncate_chars() {
    assert_eq!(truncate_chars("abc", 5), "abc");
    assert_eq!(truncate_chars("أبيض", 2), "أب");
    assert_eq!(truncate_chars("", 0), "");
}
