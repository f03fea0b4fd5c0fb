/// Analytics module
///
/// This module batches search and performance telemetry in memory and
/// bulk-inserts it into the persistent store:
/// - Flush on batch size, on a fixed interval and on shutdown
/// - Failed batches go back to the front of the queue for the next flush
/// - Rows the store rejects outright are dropped so they cannot block the queue
/// - Every event is also logged immediately

#[cfg(test)]
mod tests;

use crate::clock::Clock;
use crate::config::AnalyticsConfig;
use crate::database::PersistentStore;
use crate::error::{SupportError, SupportResult};
use crate::observability::{ObservabilityService, Timer};
use crate::types::{AnalyticsEvent, PerformanceEvent, SearchEvent};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Column widths of the analytics tables
const MAX_INTENT_CHARS: usize = 64;
const MAX_CLIENT_ADDRESS_CHARS: usize = 64;
const MAX_OPERATION_CHARS: usize = 128;
const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

/// Result of writing the events of one kind
#[derive(Debug, Default)]
struct KindOutcome {
    written: usize,
    dropped: usize,
    retry: HashSet<Uuid>,
    error: Option<SupportError>,
}

/// Batching telemetry writer
pub struct AnalyticsWriter {
    queue: Mutex<VecDeque<AnalyticsEvent>>,
    /// Serializes flushes so re-queued events keep their order
    flushing: tokio::sync::Mutex<()>,
    flush_requested: Notify,
    config: AnalyticsConfig,
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    observability: ObservabilityService,
}

impl AnalyticsWriter {
    pub fn new(
        config: &AnalyticsConfig,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
        observability: ObservabilityService,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            flushing: tokio::sync::Mutex::new(()),
            flush_requested: Notify::new(),
            config: config.clone(),
            store,
            clock,
            observability,
        }
    }

    /// Queue a search event, stamped with the writer's clock
    pub fn log_search(&self, mut event: SearchEvent) {
        event.query = truncate_chars(&event.query, self.config.max_query_chars);
        event.intent = event.intent.map(|intent| truncate_chars(&intent, MAX_INTENT_CHARS));
        event.client_address = event
            .client_address
            .map(|address| truncate_chars(&address, MAX_CLIENT_ADDRESS_CHARS));
        event.created_at = self.clock.now();

        self.observability.logging.log_search_event(&event);
        self.enqueue(AnalyticsEvent::Search(event));
    }

    /// Queue a performance event, stamped with the writer's clock
    pub fn log_performance(&self, mut event: PerformanceEvent) {
        event.operation = truncate_chars(&event.operation, MAX_OPERATION_CHARS);
        event.error_message = event
            .error_message
            .map(|message| truncate_chars(&message, MAX_ERROR_MESSAGE_CHARS));
        event.created_at = self.clock.now();

        self.observability.logging.log_performance_event(&event);
        self.enqueue(AnalyticsEvent::Performance(event));
    }

    fn enqueue(&self, event: AnalyticsEvent) {
        let len = {
            let mut queue = self.queue.lock();
            queue.push_back(event);
            self.enforce_bound(&mut queue);
            queue.len()
        };

        self.observability.metrics.metrics.analytics_events_queued.set(len as f64);
        if len >= self.config.batch_size {
            debug!(queued = len, "Analytics batch size reached, requesting flush");
            self.flush_requested.notify_one();
        }
    }

    fn enforce_bound(&self, queue: &mut VecDeque<AnalyticsEvent>) {
        let max = self.config.max_queue_len.max(1);
        if queue.len() <= max {
            return;
        }

        let overflow = queue.len() - max;
        queue.drain(..overflow);
        self.observability
            .metrics
            .metrics
            .analytics_events_dropped_total
            .inc_by(overflow as f64);
        warn!(dropped = overflow, max_queue_len = max, "Analytics queue full, dropped oldest events");
    }

    /// Number of events waiting for the next flush
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Write all queued events to the store
    ///
    /// The queue is swapped out, split by kind and inserted with one bulk
    /// insert per kind. A kind whose insert the store rejects is retried row
    /// by row and the rejected rows are dropped. Events that failed for any
    /// other reason are put back at the front of the queue and the first
    /// error is returned.
    pub async fn flush_batch(&self) -> SupportResult<usize> {
        let _flushing = self.flushing.lock().await;

        let batch: Vec<AnalyticsEvent> = std::mem::take(&mut *self.queue.lock()).into();
        if batch.is_empty() {
            return Ok(0);
        }

        let timer = Timer::new(self.observability.metrics.metrics.analytics_flush_duration_seconds.clone());

        let mut searches = Vec::new();
        let mut performances = Vec::new();
        for event in &batch {
            match event {
                AnalyticsEvent::Search(event) => searches.push(event.clone()),
                AnalyticsEvent::Performance(event) => performances.push(event.clone()),
            }
        }
        let (search_count, performance_count) = (searches.len(), performances.len());

        let store = &self.store;
        let search_outcome = self
            .write_kind(
                searches,
                |event: &SearchEvent| event.id,
                |rows| async move { store.insert_search_events(&rows).await },
            )
            .await;
        let performance_outcome = self
            .write_kind(
                performances,
                |event: &PerformanceEvent| event.id,
                |rows| async move { store.insert_performance_events(&rows).await },
            )
            .await;
        timer.observe();

        let flushed = search_outcome.written + performance_outcome.written;
        let dropped = search_outcome.dropped + performance_outcome.dropped;
        let metrics = &self.observability.metrics.metrics;
        metrics.analytics_events_flushed_total.inc_by(flushed as f64);
        if dropped > 0 {
            metrics.analytics_events_dropped_total.inc_by(dropped as f64);
        }

        let error = match (search_outcome.error, performance_outcome.error) {
            (Some(e), _) | (None, Some(e)) => e,
            (None, None) => {
                metrics.analytics_events_queued.set(self.queue_len() as f64);
                debug!(
                    searches = search_count,
                    performances = performance_count,
                    dropped,
                    "Analytics batch flushed"
                );
                return Ok(flushed);
            }
        };

        metrics.analytics_flush_failures_total.inc();
        let mut retry = search_outcome.retry;
        retry.extend(performance_outcome.retry);
        let failed: Vec<AnalyticsEvent> = batch
            .into_iter()
            .filter(|event| retry.contains(&event.id()))
            .collect();
        let requeued = failed.len();
        self.requeue(failed);
        warn!(requeued, flushed, dropped, "Analytics flush failed, events re-queued");

        self.observability.logging.log_store_failure("analytics_flush", &error);
        Err(error)
    }

    /// Bulk insert one kind, isolating rows the store rejects
    async fn write_kind<E, I, F, Fut>(&self, events: Vec<E>, id_of: I, insert: F) -> KindOutcome
    where
        E: Clone,
        I: Fn(&E) -> Uuid,
        F: Fn(Vec<E>) -> Fut,
        Fut: Future<Output = SupportResult<u64>>,
    {
        let mut outcome = KindOutcome::default();
        if events.is_empty() {
            return outcome;
        }

        let error = match insert(events.clone()).await {
            Ok(_) => {
                outcome.written = events.len();
                return outcome;
            }
            Err(e) => e,
        };
        if !error.is_rejected_record() {
            outcome.retry = events.iter().map(&id_of).collect();
            outcome.error = Some(error);
            return outcome;
        }

        debug!(rows = events.len(), "Bulk insert rejected, writing rows one at a time");
        let mut rows = events.into_iter();
        while let Some(row) = rows.next() {
            let id = id_of(&row);
            match insert(vec![row]).await {
                Ok(_) => outcome.written += 1,
                Err(e) if e.is_rejected_record() => {
                    warn!(event_id = %id, "Dropping analytics event rejected by the store: {}", e);
                    outcome.dropped += 1;
                }
                Err(e) => {
                    outcome.retry.insert(id);
                    outcome.retry.extend(rows.by_ref().map(|row| id_of(&row)));
                    outcome.error = Some(e);
                    break;
                }
            }
        }
        outcome
    }

    fn requeue(&self, failed: Vec<AnalyticsEvent>) {
        let len = {
            let mut queue = self.queue.lock();
            for event in failed.into_iter().rev() {
                queue.push_front(event);
            }
            self.enforce_bound(&mut queue);
            queue.len()
        };
        self.observability.metrics.metrics.analytics_events_queued.set(len as f64);
    }

    /// Final flush for orderly shutdown
    pub async fn cleanup(&self) -> SupportResult<usize> {
        let flushed = self.flush_batch().await?;
        info!(flushed, remaining = self.queue_len(), "Analytics writer cleaned up");
        Ok(flushed)
    }

    /// Spawn the timed and size-triggered flush loop
    pub fn spawn_flusher(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let writer = Arc::clone(self);

        tokio::spawn(async move {
            let flush_interval = writer.config.flush_interval();
            let mut ticker = interval(flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = flush_interval.as_secs(), "Analytics flusher started");

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        writer.flush_logged().await;
                    }
                    _ = writer.flush_requested.notified() => {
                        writer.flush_logged().await;
                    }
                }
            }

            info!("Analytics flusher stopped");
        })
    }

    async fn flush_logged(&self) {
        if let Err(e) = self.flush_batch().await {
            error!("Analytics flush failed, will retry: {}", e);
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}
