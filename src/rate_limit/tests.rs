use super::*;
use crate::clock::ManualClock;
use crate::config::Config;
use crate::database::{MemoryStore, WriteWorker};
use crate::types::{PerformanceEvent, SearchEvent};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize};

struct Fixture {
    limiter: Arc<RateLimiter>,
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    worker: WriteWorker,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::fixed());
    let store = Arc::new(MemoryStore::new());
    let observability = ObservabilityService::new().unwrap();
    let (writes, worker) = WriteQueue::new(64, store.clone(), observability.clone());

    let limiter = Arc::new(RateLimiter::new(
        &Config::default().limits,
        store.clone(),
        writes,
        clock.clone(),
        observability,
    ));

    Fixture {
        limiter,
        clock,
        store,
        worker,
    }
}

/// Store whose usage sums never answer while stalled
#[derive(Default)]
struct StalledStore {
    inner: MemoryStore,
    stalled: AtomicBool,
    usage_loads: AtomicUsize,
}

#[async_trait]
impl PersistentStore for StalledStore {
    async fn load_settings(&self, name: &str) -> SupportResult<Option<Value>> {
        self.inner.load_settings(name).await
    }

    async fn save_settings(&self, name: &str, document: &Value) -> SupportResult<()> {
        self.inner.save_settings(name, document).await
    }

    async fn insert_search_events(&self, events: &[SearchEvent]) -> SupportResult<u64> {
        self.inner.insert_search_events(events).await
    }

    async fn insert_performance_events(&self, events: &[PerformanceEvent]) -> SupportResult<u64> {
        self.inner.insert_performance_events(events).await
    }

    async fn upsert_rate_window(&self, row: &RateWindowRow) -> SupportResult<()> {
        self.inner.upsert_rate_window(row).await
    }

    async fn sum_token_usage(&self, tenant_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> SupportResult<u64> {
        self.usage_loads.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.sum_token_usage(tenant_id, from, to).await
    }

    async fn insert_usage_record(&self, record: &UsageRecord) -> SupportResult<()> {
        self.inner.insert_usage_record(record).await
    }

    async fn health_check(&self) -> SupportResult<()> {
        self.inner.health_check().await
    }
}

fn usage(tenant_id: &str, tokens: u64, at: chrono::DateTime<Utc>) -> UsageRecord {
    UsageRecord {
        id: Uuid::new_v4(),
        tenant_id: tenant_id.to_string(),
        tokens,
        operation: "chat_completion".to_string(),
        response_time_ms: 900,
        metadata: None,
        created_at: at,
    }
}

#[tokio::test]
async fn test_company_window_denies_after_max() {
    let f = fixture();
    f.limiter.set_limits(LimitScope::Company, 60_000, 2).unwrap();

    let first = f.limiter.check_rate_limit("t1", None, "chat").await;
    assert!(first.allowed);
    assert_eq!(first.remaining, Some(1));

    let second = f.limiter.check_rate_limit("t1", None, "chat").await;
    assert!(second.allowed);
    assert_eq!(second.remaining, Some(0));

    let third = f.limiter.check_rate_limit("t1", None, "chat").await;
    assert!(!third.allowed);
    assert_eq!(third.reason, Some(DenyReason::CompanyLimitExceeded));
    assert_eq!(third.remaining, Some(0));

    // Other tenants have their own window
    assert!(f.limiter.check_rate_limit("t2", None, "chat").await.allowed);
}

#[tokio::test]
async fn test_ip_window_denies_independently() {
    let f = fixture();
    f.limiter.set_limits(LimitScope::Ip, 60_000, 1).unwrap();

    let first = f.limiter.check_rate_limit("t1", Some("10.0.0.1"), "chat").await;
    assert!(first.allowed);
    assert_eq!(first.remaining, Some(0));

    let second = f.limiter.check_rate_limit("t1", Some("10.0.0.1"), "chat").await;
    assert_eq!(second.reason, Some(DenyReason::IpLimitExceeded));

    // Another address, and no address at all, still pass
    assert!(f.limiter.check_rate_limit("t1", Some("10.0.0.2"), "chat").await.allowed);
    assert!(f.limiter.check_rate_limit("t1", None, "chat").await.allowed);
}

#[tokio::test]
async fn test_denied_request_does_not_consume_company_quota() {
    let f = fixture();
    f.limiter.set_limits(LimitScope::Company, 60_000, 3).unwrap();
    f.limiter.set_limits(LimitScope::Ip, 60_000, 1).unwrap();

    assert!(f.limiter.check_rate_limit("t1", Some("10.0.0.1"), "chat").await.allowed);
    assert!(!f.limiter.check_rate_limit("t1", Some("10.0.0.1"), "chat").await.allowed);

    // One company slot used, the ip denial did not take another
    let decision = f.limiter.check_rate_limit("t1", None, "chat").await;
    assert!(decision.allowed);
    assert_eq!(decision.remaining, Some(1));
}

#[tokio::test]
async fn test_retry_after_points_to_window_end() {
    let f = fixture();
    f.limiter.set_limits(LimitScope::Company, 60_000, 1).unwrap();

    assert!(f.limiter.check_rate_limit("t1", None, "chat").await.allowed);
    f.clock.advance(ChronoDuration::seconds(15));

    let denied = f.limiter.check_rate_limit("t1", None, "chat").await;
    assert_eq!(denied.retry_after, Some(Duration::from_secs(45)));

    // The next window starts fresh
    f.clock.advance(ChronoDuration::seconds(45));
    assert!(f.limiter.check_rate_limit("t1", None, "chat").await.allowed);
}

#[tokio::test]
async fn test_remaining_is_tightest_window() {
    let f = fixture();

    let decision = f.limiter.check_rate_limit("t1", Some("10.0.0.1"), "chat").await;
    assert!(decision.allowed);
    // company 100 - 1, ip 20 - 1
    assert_eq!(decision.remaining, Some(19));
}

#[tokio::test]
async fn test_set_limits_applies_to_next_check() {
    let f = fixture();
    for _ in 0..5 {
        assert!(f.limiter.check_rate_limit("t1", None, "chat").await.allowed);
    }

    f.limiter.set_limits(LimitScope::Company, 60_000, 5).unwrap();
    let decision = f.limiter.check_rate_limit("t1", None, "chat").await;
    assert_eq!(decision.reason, Some(DenyReason::CompanyLimitExceeded));

    assert!(f.limiter.set_limits(LimitScope::Company, 0, 5).is_err());
    assert_eq!(f.limiter.settings().company, WindowSettings::new(60_000, 5));
}

#[tokio::test]
async fn test_token_budget_denies_at_daily_max() {
    let f = fixture();
    f.limiter.set_daily_token_limit(1_000).unwrap();
    f.store
        .insert_usage_record(&usage("t1", 600, f.clock.now()))
        .await
        .unwrap();

    let status = f.limiter.check_token_budget("t1").await;
    assert!(status.allowed);
    assert_eq!(status.current_tokens, 600);
    assert_eq!(status.remaining_tokens(), 400);

    f.limiter.report_usage("t1", 400, "chat_completion", 1200, None);
    assert_eq!(f.limiter.usage_snapshot("t1"), Some(1_000));

    let decision = f.limiter.check_rate_limit("t1", None, "chat").await;
    assert!(!decision.allowed);
    assert_eq!(decision.reason, Some(DenyReason::TokenBudgetExceeded));
    assert_eq!(decision.current_tokens, Some(1_000));
    assert_eq!(decision.retry_after, None);
}

#[tokio::test]
async fn test_token_budget_resets_next_day() {
    let f = fixture();
    f.limiter.set_daily_token_limit(500).unwrap();
    f.store
        .insert_usage_record(&usage("t1", 500, f.clock.now()))
        .await
        .unwrap();

    assert!(!f.limiter.check_token_budget("t1").await.allowed);

    f.clock
        .set(Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 1).single().unwrap());
    let status = f.limiter.check_token_budget("t1").await;
    assert!(status.allowed);
    assert_eq!(status.current_tokens, 0);
}

#[tokio::test]
async fn test_usage_before_hydration_is_not_double_counted() {
    let f = fixture();

    // Not hydrated yet, so only the usage record carries these tokens
    f.limiter.report_usage("t1", 250, "chat_completion", 800, None);
    assert_eq!(f.limiter.usage_snapshot("t1"), None);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = f.worker.spawn(shutdown_rx);
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let status = f.limiter.check_token_budget("t1").await;
    assert_eq!(status.current_tokens, 250);
    assert_eq!(f.store.usage_records().len(), 1);
}

#[tokio::test]
async fn test_fails_open_when_store_unavailable() {
    let f = fixture();
    f.limiter.set_daily_token_limit(10).unwrap();
    f.store.set_failing(true);

    let status = f.limiter.check_token_budget("t1").await;
    assert!(status.allowed);
    assert_eq!(status.current_tokens, 0);
    assert_eq!(f.limiter.usage_snapshot("t1"), None);

    let decision = f.limiter.check_rate_limit("t1", Some("10.0.0.1"), "chat").await;
    assert!(decision.allowed);
}

#[tokio::test]
async fn test_stalled_store_fails_open_and_backs_off() {
    let clock = Arc::new(ManualClock::fixed());
    let store = Arc::new(StalledStore::default());
    store.stalled.store(true, Ordering::SeqCst);
    let observability = ObservabilityService::new().unwrap();
    let (writes, _worker) = WriteQueue::new(64, store.clone(), observability.clone());

    let mut limits = Config::default().limits;
    limits.hydration_timeout_ms = 50;
    limits.hydration_backoff_secs = 30;
    let limiter = RateLimiter::new(&limits, store.clone(), writes, clock.clone(), observability);
    limiter.set_daily_token_limit(10).unwrap();

    let started = std::time::Instant::now();
    let decision = limiter.check_rate_limit("t1", None, "chat").await;
    assert!(decision.allowed);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(store.usage_loads.load(Ordering::SeqCst), 1);

    // Inside the backoff no tenant waits on the store
    assert!(limiter.check_token_budget("t2").await.allowed);
    assert!(limiter.check_rate_limit("t1", None, "chat").await.allowed);
    assert_eq!(store.usage_loads.load(Ordering::SeqCst), 1);
    assert_eq!(limiter.usage_snapshot("t1"), None);

    // Once the backoff passes a healthy store is asked again
    store.stalled.store(false, Ordering::SeqCst);
    clock.advance(ChronoDuration::seconds(31));
    let status = limiter.check_token_budget("t1").await;
    assert!(status.allowed);
    assert_eq!(store.usage_loads.load(Ordering::SeqCst), 2);
    assert_eq!(limiter.usage_snapshot("t1"), Some(0));
}

#[tokio::test]
async fn test_empty_tenant_fails_open() {
    let f = fixture();
    let decision = f.limiter.check_rate_limit("", None, "chat").await;
    assert!(decision.allowed);
    assert_eq!(decision.remaining, Some(100));
    assert_eq!(f.limiter.window_count(), 0);
}

#[tokio::test]
async fn test_windows_persisted_in_background() {
    let f = fixture();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = f.worker.spawn(shutdown_rx);

    f.limiter.check_rate_limit("t1", Some("10.0.0.1"), "chat").await;
    f.limiter.check_rate_limit("t1", Some("10.0.0.1"), "chat").await;

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let rows = f.store.rate_windows();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.request_count == 2));
    assert!(rows.iter().all(|row| row.window_ms == 60_000));
    let company = rows.iter().find(|row| row.scope == LimitScope::Company).unwrap();
    assert_eq!(company.identity, "t1");
    assert_eq!(company.window_start, f.clock.now());
}

#[tokio::test]
async fn test_ip_windows_are_per_tenant() {
    let f = fixture();
    f.limiter.set_limits(LimitScope::Ip, 60_000, 1).unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = f.worker.spawn(shutdown_rx);

    // One address shared by two tenants counts against each separately
    assert!(f.limiter.check_rate_limit("t1", Some("10.0.0.1"), "chat").await.allowed);
    assert!(f.limiter.check_rate_limit("t2", Some("10.0.0.1"), "search").await.allowed);
    let denied = f.limiter.check_rate_limit("t1", Some("10.0.0.1"), "chat").await;
    assert_eq!(denied.reason, Some(DenyReason::IpLimitExceeded));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let mut ip_rows: Vec<RateWindowRow> = f
        .store
        .rate_windows()
        .into_iter()
        .filter(|row| row.scope == LimitScope::Ip)
        .collect();
    ip_rows.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
    assert_eq!(ip_rows.len(), 2);
    assert_eq!(ip_rows[0].tenant_id, "t1");
    assert_eq!(ip_rows[1].tenant_id, "t2");
    assert_eq!(ip_rows[1].request_type, "search");
    assert!(ip_rows.iter().all(|row| row.identity == "10.0.0.1" && row.request_count == 1));
}

#[tokio::test]
async fn test_update_config_persists_document() {
    let f = fixture();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = f.worker.spawn(shutdown_rx);

    f.limiter.set_daily_token_limit(42_000).unwrap();

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let document = f.store.settings(LIMIT_SETTINGS_DOCUMENT).unwrap();
    assert_eq!(document["dailyMaxTokens"], 42_000);
    assert_eq!(document["company"]["maxRequests"], 100);
}

#[tokio::test]
async fn test_load_config_from_store() {
    let f = fixture();
    f.store
        .save_settings(
            LIMIT_SETTINGS_DOCUMENT,
            &json!({ "ip": { "windowMs": 10000, "maxRequests": 3 } }),
        )
        .await
        .unwrap();

    let loaded = f.limiter.load_config().await;
    assert_eq!(loaded.ip, WindowSettings::new(10_000, 3));
    assert_eq!(f.limiter.settings(), loaded);
}

#[tokio::test]
async fn test_load_config_keeps_defaults_on_bad_document() {
    let f = fixture();
    f.store
        .save_settings(LIMIT_SETTINGS_DOCUMENT, &json!({ "dailyMaxTokens": 0 }))
        .await
        .unwrap();
    assert_eq!(f.limiter.load_config().await, LimitSettings::default());

    f.store.set_failing(true);
    assert_eq!(f.limiter.load_config().await, LimitSettings::default());
}

#[tokio::test]
async fn test_sweep_removes_aged_out_counters() {
    let f = fixture();
    f.limiter.check_rate_limit("t1", Some("10.0.0.1"), "chat").await;
    f.limiter.check_token_budget("t2").await;
    assert_eq!(f.limiter.window_count(), 2);

    assert_eq!(f.limiter.sweep_expired(), 0);

    f.clock.advance(ChronoDuration::days(1));
    assert_eq!(f.limiter.sweep_expired(), 4);
    assert_eq!(f.limiter.window_count(), 0);
}

#[tokio::test]
async fn test_sweeper_stops_on_shutdown() {
    let f = fixture();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = f.limiter.spawn_sweeper(shutdown_rx);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[test]
fn test_deny_reason_wire_format() {
    assert_eq!(
        serde_json::to_value(DenyReason::TokenBudgetExceeded).unwrap(),
        "token_budget_exceeded"
    );
    assert_eq!(DenyReason::IpLimitExceeded.as_str(), "ip_limit_exceeded");
}
