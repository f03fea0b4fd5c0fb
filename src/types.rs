use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of purchasable attribute a variant represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantType {
    Color,
    Size,
    Other,
}

impl VariantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantType::Color => "color",
            VariantType::Size => "size",
            VariantType::Other => "other",
        }
    }
}

/// A purchasable attribute combination of a product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    /// Variant identifier
    pub id: String,
    /// Display name, e.g. "ابيض" or "XL"
    pub name: String,
    /// Attribute kind
    #[serde(rename = "type")]
    pub variant_type: VariantType,
    /// Unit price
    pub price: f64,
    /// Units in stock
    pub stock: i64,
    /// Image URLs
    #[serde(default)]
    pub images: Vec<String>,
}

/// Product with its variants, as supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub variants: Vec<ProductVariant>,
}

/// Scope a rate window counter applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    /// Per tenant (company)
    Company,
    /// Per client address
    Ip,
}

impl LimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitScope::Company => "company",
            LimitScope::Ip => "ip",
        }
    }
}

/// Search telemetry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEvent {
    /// Event id, used for duplicate-tolerant inserts
    pub id: Uuid,
    pub tenant_id: String,
    pub query: String,
    pub intent: Option<String>,
    pub results_count: u32,
    pub response_time_ms: u64,
    pub cache_hit: bool,
    pub client_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SearchEvent {
    pub fn new(tenant_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            query: query.into(),
            intent: None,
            results_count: 0,
            response_time_ms: 0,
            cache_hit: false,
            client_address: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_results(mut self, results_count: u32, response_time_ms: u64, cache_hit: bool) -> Self {
        self.results_count = results_count;
        self.response_time_ms = response_time_ms;
        self.cache_hit = cache_hit;
        self
    }

    pub fn with_client_address(mut self, address: impl Into<String>) -> Self {
        self.client_address = Some(address.into());
        self
    }
}

/// Operation timing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceEvent {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    pub operation: String,
    pub duration_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl PerformanceEvent {
    pub fn new(operation: impl Into<String>, duration_ms: u64, success: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: None,
            operation: operation.into(),
            duration_ms,
            success,
            error_message: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Telemetry event queued by the analytics writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum AnalyticsEvent {
    Search(SearchEvent),
    Performance(PerformanceEvent),
}

impl AnalyticsEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyticsEvent::Search(_) => "search",
            AnalyticsEvent::Performance(_) => "performance",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            AnalyticsEvent::Search(event) => event.id,
            AnalyticsEvent::Performance(event) => event.id,
        }
    }
}

/// Durable mirror of one rate window counter, kept for reporting only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateWindowRow {
    pub tenant_id: String,
    pub scope: LimitScope,
    /// Tenant id or client address, depending on scope
    pub identity: String,
    pub request_type: String,
    pub window_start: DateTime<Utc>,
    pub window_ms: i64,
    pub request_count: u32,
}

/// AI token usage reported after a model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub tokens: u64,
    pub operation: String,
    pub response_time_ms: u64,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}
