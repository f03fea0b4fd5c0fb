/// Caching module
///
/// This module implements the per-category in-memory cache:
/// - FAQ, policy and product stores keyed by tenant
/// - Search store keyed by tenant, query and intent
/// - Generic store with per-entry TTL for ad-hoc data
///
/// Every store has a TTL and a FIFO size bound. TTLs and bounds of the four
/// category stores can be overridden at runtime through the `rag_cache`
/// settings document.

mod settings;
mod store;


use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::database::{PersistentStore, StoreWrite, WriteQueue, CACHE_SETTINGS_DOCUMENT};
use crate::error::SupportResult;
use crate::observability::ObservabilityService;
use crate::search::{normalize_text, ScoredProduct};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub use settings::{CacheSettings, CacheSettingsPatch, StoreSettings, StoreSettingsPatch};
pub use store::{Lookup, TtlStore};

/// Label used for the generic store in stats and metrics
const GENERIC_STORE: &str = "generic";

/// Named cache category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheCategory {
    Faq,
    Policy,
    Product,
    Search,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 4] = [
        CacheCategory::Faq,
        CacheCategory::Policy,
        CacheCategory::Product,
        CacheCategory::Search,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::Faq => "faq",
            CacheCategory::Policy => "policy",
            CacheCategory::Product => "product",
            CacheCategory::Search => "search",
        }
    }
}

/// Build a `category_tenant[_part...]` key; empty parts are skipped
pub fn cache_key(category: CacheCategory, tenant_id: &str, parts: &[&str]) -> String {
    let mut key = format!("{}_{}", category.as_str(), tenant_id);
    for part in parts.iter().filter(|p| !p.is_empty()) {
        key.push('_');
        key.push_str(part);
    }
    key
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
    /// Live entries per store, including the generic store
    pub entries: HashMap<String, usize>,
}

impl CacheStats {
    /// Hit ratio over all lookups, 0.0 when nothing was looked up
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheStatsInternal {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
}

/// Cache manager for the category and generic stores
pub struct CacheManager {
    faq: TtlStore<Value>,
    policy: TtlStore<Value>,
    product: TtlStore<Value>,
    search: TtlStore<Value>,
    generic: TtlStore<Value>,
    settings: RwLock<CacheSettings>,
    generic_default_ttl: Duration,
    generic_max_entries: usize,
    sweep_interval: Duration,
    store: Arc<dyn PersistentStore>,
    writes: WriteQueue,
    clock: Arc<dyn Clock>,
    observability: ObservabilityService,
    stats: CacheStatsInternal,
}

impl CacheManager {
    /// Create a cache manager with default category settings
    pub fn new(
        config: &CacheConfig,
        store: Arc<dyn PersistentStore>,
        writes: WriteQueue,
        clock: Arc<dyn Clock>,
        observability: ObservabilityService,
    ) -> Self {
        Self {
            faq: TtlStore::new(),
            policy: TtlStore::new(),
            product: TtlStore::new(),
            search: TtlStore::new(),
            generic: TtlStore::new(),
            settings: RwLock::new(CacheSettings::default()),
            generic_default_ttl: config.generic_default_ttl(),
            generic_max_entries: config.generic_max_entries,
            sweep_interval: config.sweep_interval(),
            store,
            writes,
            clock,
            observability,
            stats: CacheStatsInternal::default(),
        }
    }

    fn store_for(&self, category: CacheCategory) -> &TtlStore<Value> {
        match category {
            CacheCategory::Faq => &self.faq,
            CacheCategory::Policy => &self.policy,
            CacheCategory::Product => &self.product,
            CacheCategory::Search => &self.search,
        }
    }

    /// Get a value if it is younger than the category TTL
    pub fn get(&self, category: CacheCategory, tenant_id: &str, parts: &[&str]) -> Option<Value> {
        let key = cache_key(category, tenant_id, parts);
        let ttl = self.settings.read().for_category(category).ttl();
        let lookup = self.store_for(category).get(&key, ttl, self.clock.now());
        self.record_lookup(category.as_str(), &key, lookup)
    }

    /// Store a value, evicting the oldest entries beyond the category bound
    pub fn set(&self, category: CacheCategory, tenant_id: &str, parts: &[&str], data: Value) {
        let key = cache_key(category, tenant_id, parts);
        let max_entries = self.settings.read().for_category(category).max_entries;
        let store = self.store_for(category);

        let evicted = store.insert(key.clone(), data, None, self.clock.now(), max_entries);
        self.record_insert(category.as_str(), &key, evicted, store.len());
    }

    /// Remove a tenant's entries for one category, or for all categories
    pub fn invalidate(&self, tenant_id: &str, category: Option<CacheCategory>) -> usize {
        let removed = match category {
            Some(category) => self.invalidate_category(tenant_id, category),
            None => CacheCategory::ALL
                .iter()
                .map(|c| self.invalidate_category(tenant_id, *c))
                .sum(),
        };

        debug!(tenant_id, removed, "Cache invalidated");
        removed
    }

    /// Remove every FAQ, policy, product and search entry of a tenant
    pub fn invalidate_all(&self, tenant_id: &str) -> usize {
        self.invalidate(tenant_id, None)
    }

    fn invalidate_category(&self, tenant_id: &str, category: CacheCategory) -> usize {
        let store = self.store_for(category);
        let base = cache_key(category, tenant_id, &[]);
        let removed = usize::from(store.remove(&base)) + store.remove_prefix(&format!("{}_", base));
        self.update_entries_gauge(category.as_str(), store.len());
        removed
    }

    pub fn get_faqs<T: DeserializeOwned>(&self, tenant_id: &str) -> Option<T> {
        self.get_typed(CacheCategory::Faq, tenant_id, &[])
    }

    pub fn set_faqs<T: Serialize>(&self, tenant_id: &str, faqs: &T) -> SupportResult<()> {
        self.set_typed(CacheCategory::Faq, tenant_id, &[], faqs)
    }

    pub fn get_policies<T: DeserializeOwned>(&self, tenant_id: &str) -> Option<T> {
        self.get_typed(CacheCategory::Policy, tenant_id, &[])
    }

    pub fn set_policies<T: Serialize>(&self, tenant_id: &str, policies: &T) -> SupportResult<()> {
        self.set_typed(CacheCategory::Policy, tenant_id, &[], policies)
    }

    pub fn get_products<T: DeserializeOwned>(&self, tenant_id: &str) -> Option<T> {
        self.get_typed(CacheCategory::Product, tenant_id, &[])
    }

    pub fn set_products<T: Serialize>(&self, tenant_id: &str, products: &T) -> SupportResult<()> {
        self.set_typed(CacheCategory::Product, tenant_id, &[], products)
    }

    /// Ranked variant search results for a query and intent
    ///
    /// The query is normalized first, so orthographic variants of the same
    /// Arabic query share an entry.
    pub fn get_search(&self, tenant_id: &str, query: &str, intent: &str) -> Option<Vec<ScoredProduct>> {
        let query = normalize_text(query);
        self.get_typed(CacheCategory::Search, tenant_id, &[query.as_str(), intent])
    }

    pub fn set_search(
        &self,
        tenant_id: &str,
        query: &str,
        intent: &str,
        results: &[ScoredProduct],
    ) -> SupportResult<()> {
        let query = normalize_text(query);
        self.set_typed(CacheCategory::Search, tenant_id, &[query.as_str(), intent], results)
    }

    fn get_typed<T: DeserializeOwned>(
        &self,
        category: CacheCategory,
        tenant_id: &str,
        parts: &[&str],
    ) -> Option<T> {
        let data = self.get(category, tenant_id, parts)?;
        match serde_json::from_value(data) {
            Ok(value) => Some(value),
            Err(e) => {
                // Treat a shape mismatch as a miss
                warn!("Cached {} entry for {} has unexpected shape: {}", category.as_str(), tenant_id, e);
                None
            }
        }
    }

    fn set_typed<T: Serialize + ?Sized>(
        &self,
        category: CacheCategory,
        tenant_id: &str,
        parts: &[&str],
        data: &T,
    ) -> SupportResult<()> {
        let value = serde_json::to_value(data)?;
        self.set(category, tenant_id, parts, value);
        Ok(())
    }

    /// Get a value from the generic store
    pub fn get_generic(&self, key: &str) -> Option<Value> {
        let lookup = self.generic.get(key, self.generic_default_ttl, self.clock.now());
        self.record_lookup(GENERIC_STORE, key, lookup)
    }

    /// Store a value in the generic store with an optional TTL (default 1 hour)
    pub fn set_generic(&self, key: &str, data: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.generic_default_ttl);
        let evicted = self.generic.insert(
            key.to_string(),
            data,
            Some(ttl),
            self.clock.now(),
            self.generic_max_entries,
        );
        self.record_insert(GENERIC_STORE, key, evicted, self.generic.len());
    }

    /// Physically delete expired entries from every store
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let settings = self.settings.read().clone();

        let mut removed = 0;
        for category in CacheCategory::ALL {
            let store = self.store_for(category);
            removed += store.sweep(settings.for_category(category).ttl(), now);
            self.update_entries_gauge(category.as_str(), store.len());
        }
        removed += self.generic.sweep(self.generic_default_ttl, now);
        self.update_entries_gauge(GENERIC_STORE, self.generic.len());

        if removed > 0 {
            self.stats.expired.fetch_add(removed as u64, Ordering::Relaxed);
            self.observability.metrics.metrics.cache_expired_total.inc_by(removed as f64);
            debug!("Cache sweep removed {} expired entries", removed);
        }
        removed
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let mut entries: HashMap<String, usize> = CacheCategory::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), self.store_for(*c).len()))
            .collect();
        entries.insert(GENERIC_STORE.to_string(), self.generic.len());

        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
            entries,
        }
    }

    /// Current category settings
    pub fn settings(&self) -> CacheSettings {
        self.settings.read().clone()
    }

    /// Load the `rag_cache` document from the store
    ///
    /// Readers keep using the current settings while this runs. Store failures
    /// and malformed documents are logged and leave the settings unchanged.
    pub async fn load_config(&self) -> CacheSettings {
        let document = match self.store.load_settings(CACHE_SETTINGS_DOCUMENT).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                debug!("No cache settings document found, keeping defaults");
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
                self.apply_settings(loaded.clone());
                info!("Cache settings loaded from store");
                loaded
            }
            Err(e) => {
                warn!("Ignoring malformed cache settings document: {}", e);
                current
            }
        }
    }

    /// Merge, validate and apply a settings patch, then persist it in the background
    pub fn update_config(&self, patch: &CacheSettingsPatch) -> SupportResult<CacheSettings> {
        let updated = self.settings().merge(patch)?;
        self.apply_settings(updated.clone());

        let document = serde_json::to_value(&updated)?;
        self.observability
            .logging
            .log_config_change(CACHE_SETTINGS_DOCUMENT, &document);
        self.writes.submit(StoreWrite::Settings {
            name: CACHE_SETTINGS_DOCUMENT.to_string(),
            document,
        });

        Ok(updated)
    }

    fn apply_settings(&self, settings: CacheSettings) {
        *self.settings.write() = settings.clone();

        // Lowered bounds take effect immediately
        for category in CacheCategory::ALL {
            let store = self.store_for(category);
            let evicted = store.enforce_bound(settings.for_category(category).max_entries);
            if evicted > 0 {
                self.record_evictions(category.as_str(), evicted);
            }
            self.update_entries_gauge(category.as_str(), store.len());
        }
    }

    /// Drop every entry from every store
    pub fn clear(&self) {
        for category in CacheCategory::ALL {
            self.store_for(category).clear();
            self.update_entries_gauge(category.as_str(), 0);
        }
        self.generic.clear();
        self.update_entries_gauge(GENERIC_STORE, 0);
        info!("Cache cleared");
    }

    /// Spawn the periodic expiry sweep
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(cache.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = cache.sweep_interval.as_secs(), "Cache sweeper started");

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        cache.sweep_expired();
                    }
                }
            }

            info!("Cache sweeper stopped");
        })
    }

    fn record_lookup(&self, label: &str, key: &str, lookup: Lookup<Value>) -> Option<Value> {
        let metrics = &self.observability.metrics.metrics;
        let hit = matches!(lookup, Lookup::Hit(_));

        if hit {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            metrics.cache_hits_total.with_label_values(&[label]).inc();
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            metrics.cache_misses_total.with_label_values(&[label]).inc();
        }
        if matches!(lookup, Lookup::Expired) {
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
            metrics.cache_expired_total.inc();
        }

        self.observability.logging.log_cache_operation("get", label, key, hit);
        lookup.into_option()
    }

    fn record_insert(&self, label: &str, key: &str, evicted: usize, len: usize) {
        if evicted > 0 {
            self.record_evictions(label, evicted);
        }
        self.update_entries_gauge(label, len);
        self.observability.logging.log_cache_operation("set", label, key, false);
    }

    fn record_evictions(&self, label: &str, evicted: usize) {
        self.stats.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        self.observability
            .metrics
            .metrics
            .cache_evictions_total
            .with_label_values(&[label])
            .inc_by(evicted as f64);
    }

    fn update_entries_gauge(&self, label: &str, len: usize) {
        self.observability
            .metrics
            .metrics
            .cache_entries
            .with_label_values(&[label])
            .set(len as f64);
    }
}
