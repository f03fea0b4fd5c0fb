use crate::cache::CacheCategory;
use crate::error::{SupportError, SupportResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// TTL and size bound of one category store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSettings {
    pub ttl_ms: u64,
    pub max_entries: usize,
}

impl StoreSettings {
    pub const fn new(ttl_ms: u64, max_entries: usize) -> Self {
        Self { ttl_ms, max_entries }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    fn merge(&self, patch: &StoreSettingsPatch) -> Self {
        Self {
            ttl_ms: patch.ttl_ms.unwrap_or(self.ttl_ms),
            max_entries: patch.max_entries.unwrap_or(self.max_entries),
        }
    }

    fn validate(&self, category: &str) -> SupportResult<()> {
        if self.ttl_ms == 0 {
            return Err(SupportError::ConfigError(format!("{} ttlMs must be greater than 0", category)));
        }
        if self.max_entries == 0 {
            return Err(SupportError::ConfigError(format!(
                "{} maxEntries must be greater than 0",
                category
            )));
        }
        Ok(())
    }
}

/// Runtime-tunable cache settings, persisted as the `rag_cache` document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    pub faq: StoreSettings,
    pub policy: StoreSettings,
    pub product: StoreSettings,
    pub search: StoreSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            faq: StoreSettings::new(60 * 60 * 1000, 100),
            policy: StoreSettings::new(60 * 60 * 1000, 100),
            product: StoreSettings::new(10 * 60 * 1000, 200),
            search: StoreSettings::new(5 * 60 * 1000, 500),
        }
    }
}

impl CacheSettings {
    pub fn for_category(&self, category: CacheCategory) -> StoreSettings {
        match category {
            CacheCategory::Faq => self.faq,
            CacheCategory::Policy => self.policy,
            CacheCategory::Product => self.product,
            CacheCategory::Search => self.search,
        }
    }

    /// Apply a patch and validate the result
    pub fn merge(&self, patch: &CacheSettingsPatch) -> SupportResult<Self> {
        let merged = Self {
            faq: patch.faq.as_ref().map_or(self.faq, |p| self.faq.merge(p)),
            policy: patch.policy.as_ref().map_or(self.policy, |p| self.policy.merge(p)),
            product: patch.product.as_ref().map_or(self.product, |p| self.product.merge(p)),
            search: patch.search.as_ref().map_or(self.search, |p| self.search.merge(p)),
        };
        merged.validate()?;
        Ok(merged)
    }

    pub fn validate(&self) -> SupportResult<()> {
        self.faq.validate("faq")?;
        self.policy.validate("policy")?;
        self.product.validate("product")?;
        self.search.validate("search")
    }

    /// Parse a persisted document as a patch over these settings
    pub fn apply_document(&self, document: &Value) -> SupportResult<Self> {
        let patch: CacheSettingsPatch = serde_json::from_value(document.clone())?;
        self.merge(&patch)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSettingsPatch {
    pub ttl_ms: Option<u64>,
    pub max_entries: Option<usize>,
}

/// Partial update of [`CacheSettings`]; absent fields keep their value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettingsPatch {
    pub faq: Option<StoreSettingsPatch>,
    pub policy: Option<StoreSettingsPatch>,
    pub product: Option<StoreSettingsPatch>,
    pub search: Option<StoreSettingsPatch>,
}
