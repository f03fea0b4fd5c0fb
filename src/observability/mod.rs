pub mod metrics;
pub mod tracing_setup;
pub mod logging;

pub use metrics::{Metrics, MetricsRegistry, Timer};
pub use tracing_setup::init_tracing;
pub use logging::LoggingService;

use crate::error::SupportResult;

/// Logging and metrics shared by every support component
#[derive(Clone)]
pub struct ObservabilityService {
    pub metrics: MetricsRegistry,
    pub logging: LoggingService,
}

impl ObservabilityService {
    /// Initialize all observability components
    pub fn new() -> SupportResult<Self> {
        Ok(Self {
            metrics: MetricsRegistry::new()?,
            logging: LoggingService::new(),
        })
    }
}
