use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::env;
use tracing::{event, Level};
use uuid::Uuid;
use crate::error::SupportError;
use crate::types::{PerformanceEvent, SearchEvent};

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email pattern is valid")
});

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d[\d\s-]{7,}\d").expect("phone pattern is valid"));

/// Maximum characters of a query that reach the logs
const MAX_LOGGED_QUERY_CHARS: usize = 200;

/// Structured JSON logging service with trace_id injection
///
/// This is the logger collaborator shared by the cache, the rate limiter
/// and the analytics writer.
#[derive(Clone)]
pub struct LoggingService {
    service_name: String,
    service_version: String,
    environment: String,
}

impl LoggingService {
    /// Create a new logging service
    pub fn new() -> Self {
        let service_name = env::var("SERVICE_NAME")
            .unwrap_or_else(|_| "rag-support-core".to_string());

        let service_version = env::var("SERVICE_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string());

        Self {
            service_name,
            service_version,
            environment,
        }
    }

    /// Log a structured message with trace_id
    pub fn log_structured(&self, level: Level, message: &str, fields: Option<HashMap<String, Value>>) {
        let trace_id = Uuid::new_v4();

        let mut log_entry = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "level": level.to_string().to_uppercase(),
            "message": message,
            "trace_id": trace_id.to_string(),
            "service": {
                "name": self.service_name,
                "version": self.service_version,
                "environment": self.environment
            }
        });

        if let Some(fields) = fields {
            if let Value::Object(ref mut map) = log_entry {
                for (key, value) in fields {
                    map.insert(key, value);
                }
            }
        }

        match level {
            Level::ERROR => event!(Level::ERROR, %trace_id, "{}", log_entry),
            Level::WARN => event!(Level::WARN, %trace_id, "{}", log_entry),
            Level::INFO => event!(Level::INFO, %trace_id, "{}", log_entry),
            Level::DEBUG => event!(Level::DEBUG, %trace_id, "{}", log_entry),
            Level::TRACE => event!(Level::TRACE, %trace_id, "{}", log_entry),
        }
    }

    /// Log a cache lookup or mutation
    pub fn log_cache_operation(&self, operation: &str, category: &str, key: &str, hit: bool) {
        let fields = HashMap::from([
            ("operation".to_string(), json!(operation)),
            ("category".to_string(), json!(category)),
            ("sanitized_key".to_string(), json!(self.sanitize_cache_key(key))),
            ("hit".to_string(), json!(hit)),
        ]);

        self.log_structured(Level::DEBUG, "Cache operation", Some(fields));
    }

    /// Log a denied request
    pub fn log_rate_limit_violation(
        &self,
        tenant_id: &str,
        client_address: Option<&str>,
        request_type: &str,
        reason: &str,
    ) {
        let fields = HashMap::from([
            ("tenant_id".to_string(), json!(tenant_id)),
            ("client_address".to_string(), json!(client_address)),
            ("request_type".to_string(), json!(request_type)),
            ("reason".to_string(), json!(reason)),
        ]);

        self.log_structured(Level::WARN, "Rate limit exceeded", Some(fields));
    }

    /// Log a failed call to the persistent store
    pub fn log_store_failure(&self, operation: &str, error: &SupportError) {
        let fields = HashMap::from([
            ("operation".to_string(), json!(operation)),
            ("error_type".to_string(), json!(error.error_type())),
            ("error_message".to_string(), json!(error.to_string())),
        ]);

        self.log_structured(Level::ERROR, "Database operation failed", Some(fields));
    }

    /// Log a configuration document change
    pub fn log_config_change(&self, document: &str, config: &Value) {
        let fields = HashMap::from([
            ("document".to_string(), json!(document)),
            ("config".to_string(), config.clone()),
        ]);

        self.log_structured(Level::INFO, "Configuration updated", Some(fields));
    }

    /// Real-time log line for a search telemetry event
    pub fn log_search_event(&self, event: &SearchEvent) {
        let fields = HashMap::from([
            ("tenant_id".to_string(), json!(event.tenant_id)),
            ("sanitized_query".to_string(), json!(self.sanitize_query(&event.query))),
            ("intent".to_string(), json!(event.intent)),
            ("results_count".to_string(), json!(event.results_count)),
            ("response_time_ms".to_string(), json!(event.response_time_ms)),
            ("cache_hit".to_string(), json!(event.cache_hit)),
        ]);

        self.log_structured(Level::INFO, "Search completed", Some(fields));
    }

    /// Real-time log line for a performance telemetry event
    pub fn log_performance_event(&self, event: &PerformanceEvent) {
        let mut fields = HashMap::from([
            ("operation".to_string(), json!(event.operation)),
            ("duration_ms".to_string(), json!(event.duration_ms)),
            ("success".to_string(), json!(event.success)),
        ]);

        if let Some(tenant_id) = &event.tenant_id {
            fields.insert("tenant_id".to_string(), json!(tenant_id));
        }
        if let Some(message) = &event.error_message {
            fields.insert("error_message".to_string(), json!(message));
        }

        let level = if event.success { Level::DEBUG } else { Level::WARN };
        self.log_structured(level, "Operation timing", Some(fields));
    }

    /// Sanitize query for logging (remove PII, truncate)
    pub fn sanitize_query(&self, query: &str) -> String {
        let sanitized = EMAIL_PATTERN.replace_all(query, "[EMAIL]");
        let sanitized = PHONE_PATTERN.replace_all(&sanitized, "[PHONE]");

        if sanitized.chars().count() > MAX_LOGGED_QUERY_CHARS {
            let mut truncated: String = sanitized.chars().take(MAX_LOGGED_QUERY_CHARS - 3).collect();
            truncated.push_str("...");
            truncated
        } else {
            sanitized.into_owned()
        }
    }

    /// Sanitize cache key for logging
    fn sanitize_cache_key(&self, key: &str) -> String {
        let chars: Vec<char> = key.chars().collect();
        if chars.len() > 50 {
            let head: String = chars[..20].iter().collect();
            let tail: String = chars[chars.len() - 10..].iter().collect();
            format!("{}...{}", head, tail)
        } else {
            key.to_string()
        }
    }
}

impl Default for LoggingService {
    fn default() -> Self {
        Self::new()
    }
}
