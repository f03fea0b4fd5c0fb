use crate::database::PersistentStore;
use crate::error::{SupportError, SupportResult};
use crate::observability::ObservabilityService;
use crate::types::{RateWindowRow, UsageRecord};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A store mutation issued off the request path
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    RateWindow(RateWindowRow),
    Usage(UsageRecord),
    Settings { name: String, document: Value },
}

impl StoreWrite {
    fn operation(&self) -> &'static str {
        match self {
            StoreWrite::RateWindow(_) => "upsert_rate_window",
            StoreWrite::Usage(_) => "insert_usage_record",
            StoreWrite::Settings { .. } => "save_settings",
        }
    }
}

/// Bounded fire-and-forget queue in front of the persistent store
///
/// Submitting never blocks. When the channel is full the write is dropped,
/// counted and logged; the in-memory state stays authoritative.
#[derive(Clone)]
pub struct WriteQueue {
    sender: mpsc::Sender<StoreWrite>,
    observability: ObservabilityService,
}

/// Consumer half of a [`WriteQueue`], applying writes in submission order
pub struct WriteWorker {
    receiver: mpsc::Receiver<StoreWrite>,
    store: Arc<dyn PersistentStore>,
    observability: ObservabilityService,
}

impl WriteQueue {
    /// Create a queue and the worker that drains it
    pub fn new(
        capacity: usize,
        store: Arc<dyn PersistentStore>,
        observability: ObservabilityService,
    ) -> (Self, WriteWorker) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let queue = Self {
            sender,
            observability: observability.clone(),
        };
        let worker = WriteWorker {
            receiver,
            store,
            observability,
        };
        (queue, worker)
    }

    /// Enqueue a write without waiting; returns whether it was accepted
    pub fn submit(&self, write: StoreWrite) -> bool {
        match self.try_submit(write) {
            Ok(()) => true,
            Err(e) => {
                self.observability.metrics.metrics.store_writes_dropped_total.inc();
                warn!("Dropping background write: {}", e);
                false
            }
        }
    }

    fn try_submit(&self, write: StoreWrite) -> SupportResult<()> {
        let operation = write.operation();
        self.sender.try_send(write).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SupportError::QueueError(format!("{} rejected: queue full", operation))
            }
            mpsc::error::TrySendError::Closed(_) => {
                SupportError::QueueError(format!("{} rejected: queue closed", operation))
            }
        })
    }
}

impl WriteWorker {
    /// Apply writes until shutdown, then drain whatever is already queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Background write worker started");

        loop {
            tokio::select! {
                write = self.receiver.recv() => match write {
                    Some(write) => self.apply(write).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.receiver.close();
        let mut drained = 0usize;
        while let Some(write) = self.receiver.recv().await {
            self.apply(write).await;
            drained += 1;
        }

        info!(drained, "Background write worker stopped");
    }

    /// Spawn [`WriteWorker::run`] on the runtime
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn apply(&self, write: StoreWrite) {
        let operation = write.operation();
        let result = match &write {
            StoreWrite::RateWindow(row) => self.store.upsert_rate_window(row).await,
            StoreWrite::Usage(record) => self.store.insert_usage_record(record).await,
            StoreWrite::Settings { name, document } => self.store.save_settings(name, document).await,
        };

        let metrics = &self.observability.metrics.metrics;
        match result {
            Ok(()) => {
                metrics.store_writes_total.inc();
                debug!("Applied background write: {}", operation);
            }
            Err(e) => {
                metrics.store_write_failures_total.inc();
                self.observability.logging.log_store_failure(operation, &e);
            }
        }
    }
}
