/// Rate limiting module
///
/// This module enforces three quotas in front of the AI pipeline:
/// - Request windows per tenant (company scope)
/// - Request windows per client address (ip scope)
/// - A daily AI-token budget per tenant
///
/// Window counters live in memory only; a best-effort mirror is written to
/// the persistent store through the background write queue. Any internal
/// failure while deciding fails open. An exhausted quota always denies.

mod settings;

#[cfg(test)]
mod tests;

use crate::clock::{start_of_day, Clock};
use crate::config::LimitsConfig;
use crate::database::{PersistentStore, StoreWrite, WriteQueue, LIMIT_SETTINGS_DOCUMENT};
use crate::error::{SupportError, SupportResult};
use crate::observability::ObservabilityService;
use crate::types::{LimitScope, RateWindowRow, UsageRecord};
use chrono::{Days, NaiveDate, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use settings::{LimitSettings, LimitSettingsPatch, WindowSettings, WindowSettingsPatch};

/// Why a request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    TokenBudgetExceeded,
    CompanyLimitExceeded,
    IpLimitExceeded,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::TokenBudgetExceeded => "token_budget_exceeded",
            DenyReason::CompanyLimitExceeded => "company_limit_exceeded",
            DenyReason::IpLimitExceeded => "ip_limit_exceeded",
        }
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the tightest applicable window
    pub remaining: Option<u32>,
    /// Time until the denying window rolls over
    pub retry_after: Option<Duration>,
    pub reason: Option<DenyReason>,
    /// Tokens used today, when the token budget denied
    pub current_tokens: Option<u64>,
}

impl RateLimitDecision {
    fn allow(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining: Some(remaining),
            retry_after: None,
            reason: None,
            current_tokens: None,
        }
    }

    fn deny(reason: DenyReason, retry_after: Option<Duration>) -> Self {
        Self {
            allowed: false,
            remaining: Some(0),
            retry_after,
            reason: Some(reason),
            current_tokens: None,
        }
    }
}

/// Outcome of a token budget check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudgetStatus {
    pub allowed: bool,
    pub current_tokens: u64,
    pub daily_max_tokens: u64,
    pub reason: Option<DenyReason>,
}

impl TokenBudgetStatus {
    pub fn remaining_tokens(&self) -> u64 {
        self.daily_max_tokens.saturating_sub(self.current_tokens)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    scope: LimitScope,
    tenant_id: String,
    identity: String,
    bucket: i64,
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    window_start_ms: i64,
    window_ms: i64,
}

impl WindowCounter {
    fn ends_at_ms(&self) -> i64 {
        self.window_start_ms.saturating_add(self.window_ms)
    }
}

#[derive(Debug, Clone, Copy)]
struct TokenUsageCounter {
    tokens_used: u64,
    day: NaiveDate,
}

/// Position of `now` in a fixed window
#[derive(Debug, Clone, Copy)]
struct WindowSlot {
    bucket: i64,
    start_ms: i64,
    window_ms: i64,
    max_requests: u32,
}

impl WindowSlot {
    fn at(now_ms: i64, settings: WindowSettings) -> SupportResult<Self> {
        let window_ms = i64::try_from(settings.window_ms)
            .ok()
            .filter(|w| *w > 0)
            .ok_or_else(|| SupportError::ConfigError(format!("Invalid window length: {}ms", settings.window_ms)))?;

        let bucket = now_ms.div_euclid(window_ms);
        Ok(Self {
            bucket,
            start_ms: bucket * window_ms,
            window_ms,
            max_requests: settings.max_requests,
        })
    }

    fn retry_after(&self, now_ms: i64) -> Duration {
        let left = (self.start_ms + self.window_ms - now_ms).max(0);
        Duration::from_millis(left as u64)
    }

    fn row(&self, tenant_id: &str, scope: LimitScope, identity: &str, request_type: &str, count: u32) -> RateWindowRow {
        RateWindowRow {
            tenant_id: tenant_id.to_string(),
            scope,
            identity: identity.to_string(),
            request_type: request_type.to_string(),
            window_start: Utc
                .timestamp_millis_opt(self.start_ms)
                .single()
                .unwrap_or_else(Utc::now),
            window_ms: self.window_ms,
            request_count: count,
        }
    }
}

/// Request window and token budget governor
pub struct RateLimiter {
    counters: Mutex<HashMap<WindowKey, WindowCounter>>,
    token_usage: Mutex<HashMap<String, TokenUsageCounter>>,
    settings: RwLock<LimitSettings>,
    sweep_interval: Duration,
    hydration_timeout: Duration,
    hydration_backoff_ms: i64,
    /// Epoch millis before which usage loads skip the store
    hydration_retry_at_ms: AtomicI64,
    store: Arc<dyn PersistentStore>,
    writes: WriteQueue,
    clock: Arc<dyn Clock>,
    observability: ObservabilityService,
}

impl RateLimiter {
    /// Create a rate limiter with default limits
    pub fn new(
        config: &LimitsConfig,
        store: Arc<dyn PersistentStore>,
        writes: WriteQueue,
        clock: Arc<dyn Clock>,
        observability: ObservabilityService,
    ) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            token_usage: Mutex::new(HashMap::new()),
            settings: RwLock::new(LimitSettings::default()),
            sweep_interval: config.sweep_interval(),
            hydration_timeout: config.hydration_timeout(),
            hydration_backoff_ms: i64::try_from(config.hydration_backoff().as_millis()).unwrap_or(i64::MAX),
            hydration_retry_at_ms: AtomicI64::new(i64::MIN),
            store,
            writes,
            clock,
            observability,
        }
    }

    /// Check today's token spend against the daily budget
    ///
    /// The first check of a day sums the tenant's usage from the store and
    /// caches it until the next UTC day boundary. The load is bounded by the
    /// hydration timeout. A failed or slow load fails open, is not cached,
    /// and keeps every tenant off the store until the backoff has passed.
    pub async fn check_token_budget(&self, tenant_id: &str) -> TokenBudgetStatus {
        let today = self.clock.today();
        let daily_max_tokens = self.settings.read().daily_max_tokens;
        let fail_open = TokenBudgetStatus {
            allowed: true,
            current_tokens: 0,
            daily_max_tokens,
            reason: None,
        };

        let tokens_used = match self.cached_usage(tenant_id, today) {
            Some(tokens) => tokens,
            None => {
                let now_ms = self.clock.now_millis();
                if now_ms < self.hydration_retry_at_ms.load(Ordering::Acquire) {
                    debug!(tenant_id, "Token usage store in backoff, allowing request");
                    self.observability.metrics.metrics.rate_limit_fail_open_total.inc();
                    return fail_open;
                }

                match self.hydrate_bounded(tenant_id, today).await {
                    Ok(tokens) => tokens,
                    Err(e) => {
                        self.hydration_retry_at_ms
                            .store(now_ms.saturating_add(self.hydration_backoff_ms), Ordering::Release);
                        self.observability.logging.log_store_failure("sum_token_usage", &e);
                        self.observability.metrics.metrics.rate_limit_fail_open_total.inc();
                        return fail_open;
                    }
                }
            }
        };

        let allowed = tokens_used < daily_max_tokens;
        TokenBudgetStatus {
            allowed,
            current_tokens: tokens_used,
            daily_max_tokens,
            reason: (!allowed).then_some(DenyReason::TokenBudgetExceeded),
        }
    }

    fn cached_usage(&self, tenant_id: &str, today: NaiveDate) -> Option<u64> {
        self.token_usage
            .lock()
            .get(tenant_id)
            .filter(|counter| counter.day == today)
            .map(|counter| counter.tokens_used)
    }

    async fn hydrate_bounded(&self, tenant_id: &str, today: NaiveDate) -> SupportResult<u64> {
        timeout(self.hydration_timeout, self.hydrate_usage(tenant_id, today))
            .await
            .map_err(|_| {
                SupportError::DatabaseError(format!(
                    "Token usage load exceeded {}ms",
                    self.hydration_timeout.as_millis()
                ))
            })?
    }

    async fn hydrate_usage(&self, tenant_id: &str, today: NaiveDate) -> SupportResult<u64> {
        let from = start_of_day(today);
        let to = today
            .checked_add_days(Days::new(1))
            .map(start_of_day)
            .ok_or_else(|| SupportError::Internal(format!("No day after {}", today)))?;

        let summed = self.store.sum_token_usage(tenant_id, from, to).await?;
        debug!(tenant_id, tokens = summed, "Hydrated daily token usage");

        // A concurrent hydration may already have landed along with reported usage
        let mut usage = self.token_usage.lock();
        let counter = usage
            .entry(tenant_id.to_string())
            .and_modify(|counter| {
                if counter.day != today {
                    *counter = TokenUsageCounter {
                        tokens_used: summed,
                        day: today,
                    };
                }
            })
            .or_insert(TokenUsageCounter {
                tokens_used: summed,
                day: today,
            });
        Ok(counter.tokens_used)
    }

    /// Decide whether a request may proceed
    ///
    /// The token budget is consulted first. Then the company window is
    /// checked, then the client address window when an address is given.
    /// An allowed request increments both counters.
    pub async fn check_rate_limit(
        &self,
        tenant_id: &str,
        client_address: Option<&str>,
        request_type: &str,
    ) -> RateLimitDecision {
        let budget = self.check_token_budget(tenant_id).await;
        if !budget.allowed {
            let mut decision = RateLimitDecision::deny(DenyReason::TokenBudgetExceeded, None);
            decision.current_tokens = Some(budget.current_tokens);
            self.record_denial(tenant_id, client_address, request_type, DenyReason::TokenBudgetExceeded);
            return decision;
        }

        match self.check_windows(tenant_id, client_address, request_type) {
            Ok(decision) => {
                match decision.reason {
                    Some(reason) => self.record_denial(tenant_id, client_address, request_type, reason),
                    None => self.observability.metrics.metrics.rate_limit_allowed_total.inc(),
                }
                decision
            }
            Err(e) => {
                warn!(tenant_id, request_type, "Rate limit check failed, allowing request: {}", e);
                self.observability.metrics.metrics.rate_limit_fail_open_total.inc();
                RateLimitDecision::allow(self.settings.read().company.max_requests)
            }
        }
    }

    fn check_windows(
        &self,
        tenant_id: &str,
        client_address: Option<&str>,
        request_type: &str,
    ) -> SupportResult<RateLimitDecision> {
        if tenant_id.trim().is_empty() {
            return Err(SupportError::InvalidRequest("tenant id is empty".to_string()));
        }

        let settings = self.settings.read().clone();
        let now_ms = self.clock.now_millis();
        let company = WindowSlot::at(now_ms, settings.company)?;
        let ip = WindowSlot::at(now_ms, settings.ip)?;

        let company_key = WindowKey {
            scope: LimitScope::Company,
            tenant_id: tenant_id.to_string(),
            identity: tenant_id.to_string(),
            bucket: company.bucket,
        };
        let ip_key = client_address.map(|address| WindowKey {
            scope: LimitScope::Ip,
            tenant_id: tenant_id.to_string(),
            identity: address.to_string(),
            bucket: ip.bucket,
        });

        let (company_count, ip_count) = {
            let mut counters = self.counters.lock();

            let current = |key: &WindowKey| counters.get(key).map_or(0, |c| c.count);
            if current(&company_key) >= company.max_requests {
                return Ok(RateLimitDecision::deny(
                    DenyReason::CompanyLimitExceeded,
                    Some(company.retry_after(now_ms)),
                ));
            }
            if let Some(key) = &ip_key {
                if current(key) >= ip.max_requests {
                    return Ok(RateLimitDecision::deny(
                        DenyReason::IpLimitExceeded,
                        Some(ip.retry_after(now_ms)),
                    ));
                }
            }

            let company_count = increment(&mut counters, company_key, &company);
            let ip_count = ip_key.map(|key| increment(&mut counters, key, &ip));
            (company_count, ip_count)
        };

        self.writes.submit(StoreWrite::RateWindow(company.row(
            tenant_id,
            LimitScope::Company,
            tenant_id,
            request_type,
            company_count,
        )));

        let mut remaining = company.max_requests - company_count;
        if let (Some(address), Some(count)) = (client_address, ip_count) {
            self.writes.submit(StoreWrite::RateWindow(ip.row(
                tenant_id,
                LimitScope::Ip,
                address,
                request_type,
                count,
            )));
            remaining = remaining.min(ip.max_requests - count);
        }

        Ok(RateLimitDecision::allow(remaining))
    }

    fn record_denial(
        &self,
        tenant_id: &str,
        client_address: Option<&str>,
        request_type: &str,
        reason: DenyReason,
    ) {
        self.observability
            .metrics
            .metrics
            .rate_limit_denied_total
            .with_label_values(&[reason.as_str()])
            .inc();
        self.observability
            .logging
            .log_rate_limit_violation(tenant_id, client_address, request_type, reason.as_str());
    }

    /// Record tokens spent by a completed AI call
    ///
    /// Updates today's cached total if it is hydrated and persists a usage
    /// record in the background.
    pub fn report_usage(
        &self,
        tenant_id: &str,
        tokens: u64,
        operation: &str,
        response_time_ms: u64,
        metadata: Option<Value>,
    ) {
        let now = self.clock.now();
        let today = now.date_naive();

        if let Some(counter) = self.token_usage.lock().get_mut(tenant_id) {
            if counter.day == today {
                counter.tokens_used = counter.tokens_used.saturating_add(tokens);
            }
        }

        self.observability.metrics.metrics.tokens_reported_total.inc_by(tokens as f64);
        self.writes.submit(StoreWrite::Usage(UsageRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            tokens,
            operation: operation.to_string(),
            response_time_ms,
            metadata,
            created_at: now,
        }));
    }

    /// Tokens used today, if the tenant's counter is hydrated
    pub fn usage_snapshot(&self, tenant_id: &str) -> Option<u64> {
        self.cached_usage(tenant_id, self.clock.today())
    }

    /// Change the window of one scope; applies to the next check
    pub fn set_limits(&self, scope: LimitScope, window_ms: u64, max_requests: u32) -> SupportResult<LimitSettings> {
        self.update_config(&LimitSettingsPatch::for_scope(scope, window_ms, max_requests))
    }

    /// Change the daily token budget; applies to the next check
    pub fn set_daily_token_limit(&self, max_tokens: u64) -> SupportResult<LimitSettings> {
        self.update_config(&LimitSettingsPatch {
            daily_max_tokens: Some(max_tokens),
            ..Default::default()
        })
    }

    /// Merge, validate and apply a settings patch, then persist it in the background
    pub fn update_config(&self, patch: &LimitSettingsPatch) -> SupportResult<LimitSettings> {
        let updated = self.settings.read().merge(patch)?;
        *self.settings.write() = updated.clone();

        let document = serde_json::to_value(&updated)?;
        self.observability
            .logging
            .log_config_change(LIMIT_SETTINGS_DOCUMENT, &document);
        self.writes.submit(StoreWrite::Settings {
            name: LIMIT_SETTINGS_DOCUMENT.to_string(),
            document,
        });

        Ok(updated)
    }

    /// Current limits
    pub fn settings(&self) -> LimitSettings {
        self.settings.read().clone()
    }

    /// Load the `rag_limits` document from the store
    ///
    /// Store failures and malformed documents are logged and leave the
    /// current limits in place.
    pub async fn load_config(&self) -> LimitSettings {
        let document = match self.store.load_settings(LIMIT_SETTINGS_DOCUMENT).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                debug!("No limit settings document found, keeping defaults");
                return self.settings();
            }
            Err(e) => {
                self.observability.logging.log_store_failure("load_settings", &e);
                return self.settings();
            }
        };

        let current = self.settings();
        match current.apply_document(&document) {
            Ok(loaded) => {
                *self.settings.write() = loaded.clone();
                info!("Limit settings loaded from store");
                loaded
            }
            Err(e) => {
                warn!("Ignoring malformed limit settings document: {}", e);
                current
            }
        }
    }

    /// Drop window counters that have aged out and token counters from past days
    pub fn sweep_expired(&self) -> usize {
        let now_ms = self.clock.now_millis();
        let today = self.clock.today();

        let mut counters = self.counters.lock();
        let before = counters.len();
        counters.retain(|_, counter| counter.ends_at_ms() > now_ms);
        let mut removed = before - counters.len();
        drop(counters);

        let mut usage = self.token_usage.lock();
        let before = usage.len();
        usage.retain(|_, counter| counter.day == today);
        removed += before - usage.len();

        if removed > 0 {
            debug!("Rate limiter sweep removed {} counters", removed);
        }
        removed
    }

    /// Number of live window counters
    pub fn window_count(&self) -> usize {
        self.counters.lock().len()
    }

    /// Spawn the periodic counter sweep
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(limiter.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = limiter.sweep_interval.as_secs(), "Rate limit sweeper started");

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        limiter.sweep_expired();
                    }
                }
            }

            info!("Rate limit sweeper stopped");
        })
    }
}

fn increment(counters: &mut HashMap<WindowKey, WindowCounter>, key: WindowKey, slot: &WindowSlot) -> u32 {
    let counter = counters.entry(key).or_insert(WindowCounter {
        count: 0,
        window_start_ms: slot.start_ms,
        window_ms: slot.window_ms,
    });
    counter.count = counter.count.saturating_add(1);
    counter.count
}

