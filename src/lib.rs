pub mod analytics;
pub mod cache;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod observability;
pub mod rate_limit;
pub mod search;
pub mod service;
pub mod types;

pub use error::{SupportError, SupportResult};
pub use types::*;
pub use config::Config;
pub use clock::{Clock, ManualClock, SystemClock};
pub use analytics::AnalyticsWriter;
pub use cache::{CacheCategory, CacheManager, CacheSettings, CacheSettingsPatch, CacheStats};
pub use database::{MemoryStore, PersistentStore, PostgresStore, WriteQueue};
pub use observability::{LoggingService, MetricsRegistry, ObservabilityService};
pub use rate_limit::{
    DenyReason, LimitSettings, LimitSettingsPatch, RateLimitDecision, RateLimiter, TokenBudgetStatus,
};
pub use search::{
    extract_filters_from_query, get_variant_summary, match_color, match_size, normalize_text,
    search_variants, MatchReason, MatchResult, ScoredProduct, VariantFilters, VariantTypeSummary,
};
pub use service::SupportService;
