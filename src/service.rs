use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::analytics::AnalyticsWriter;
use crate::cache::CacheManager;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::database::{PersistentStore, WriteQueue};
use crate::error::SupportResult;
use crate::observability::ObservabilityService;
use crate::rate_limit::RateLimiter;
use crate::search::{extract_filters_from_query, search_variants, ScoredProduct};
use crate::types::{PerformanceEvent, Product, SearchEvent};

/// Process-wide support core: cache, rate limiter and analytics writer
///
/// Constructed once at startup and shared by handle. Background loops run
/// until [`SupportService::shutdown`].
pub struct SupportService {
    pub cache: Arc<CacheManager>,
    pub limiter: Arc<RateLimiter>,
    pub analytics: Arc<AnalyticsWriter>,
    pub observability: ObservabilityService,
    store: Arc<dyn PersistentStore>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SupportService {
    /// Build all components against the system clock and start their background tasks
    pub async fn init(config: &Config, store: Arc<dyn PersistentStore>) -> SupportResult<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock)).await
    }

    /// Same as [`SupportService::init`] with an explicit time source
    pub async fn with_clock(
        config: &Config,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
    ) -> SupportResult<Self> {
        info!("Initializing support core components...");

        let observability = ObservabilityService::new()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (writes, worker) = WriteQueue::new(config.write_queue.capacity, store.clone(), observability.clone());

        let cache = Arc::new(CacheManager::new(
            &config.cache,
            store.clone(),
            writes.clone(),
            clock.clone(),
            observability.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(
            &config.limits,
            store.clone(),
            writes,
            clock.clone(),
            observability.clone(),
        ));
        let analytics = Arc::new(AnalyticsWriter::new(
            &config.analytics,
            store.clone(),
            clock,
            observability.clone(),
        ));

        let mut tasks = vec![
            worker.spawn(shutdown_rx.clone()),
            cache.spawn_sweeper(shutdown_rx.clone()),
            limiter.spawn_sweeper(shutdown_rx.clone()),
            analytics.spawn_flusher(shutdown_rx),
        ];

        // Settings loads never block startup; defaults apply until they land
        let loading_cache = cache.clone();
        tasks.push(tokio::spawn(async move {
            loading_cache.load_config().await;
        }));
        let loading_limiter = limiter.clone();
        tasks.push(tokio::spawn(async move {
            loading_limiter.load_config().await;
        }));

        info!("Support core initialized successfully");
        Ok(Self {
            cache,
            limiter,
            analytics,
            observability,
            store,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    /// Rank a tenant's products for a free-text query
    ///
    /// Results are served from the search cache when present. Color and size
    /// filters are extracted from the query. Every call queues a search event
    /// and a timing event.
    #[instrument(skip(self, products), fields(products = products.len()))]
    pub fn search_products(
        &self,
        tenant_id: &str,
        query: &str,
        intent: &str,
        products: &[Product],
        client_address: Option<&str>,
    ) -> Vec<ScoredProduct> {
        let start = Instant::now();

        let (results, cache_hit) = match self.cache.get_search(tenant_id, query, intent) {
            Some(cached) => (cached, true),
            None => {
                let filters = extract_filters_from_query(query);
                let results = search_variants(products, query, &filters);
                if let Err(e) = self.cache.set_search(tenant_id, query, intent, &results) {
                    warn!("Failed to cache search results: {}", e);
                }
                (results, false)
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let mut event = SearchEvent::new(tenant_id, query)
            .with_intent(intent)
            .with_results(results.len() as u32, elapsed_ms, cache_hit);
        if let Some(address) = client_address {
            event = event.with_client_address(address);
        }
        self.analytics.log_search(event);
        self.analytics.log_performance(
            PerformanceEvent::new("variant_search", elapsed_ms, true)
                .for_tenant(tenant_id)
                .with_metadata(json!({ "cacheHit": cache_hit, "candidates": products.len() })),
        );

        results
    }

    /// Check persistent store connectivity
    pub async fn health_check(&self) -> SupportResult<()> {
        self.store.health_check().await
    }

    /// Prometheus text exposition of all support metrics
    pub fn metrics_text(&self) -> SupportResult<String> {
        self.observability.metrics.gather()
    }

    /// Stop every background task, then flush remaining analytics
    ///
    /// Safe to call more than once; later calls only flush.
    pub async fn shutdown(&self) -> SupportResult<()> {
        info!("Shutting down support core...");
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        let flushed = self.analytics.cleanup().await?;
        info!(flushed, "Support core shut down");
        Ok(())
    }
}
