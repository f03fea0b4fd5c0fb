use crate::error::{SupportError, SupportResult};
use crate::types::LimitScope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Window length and request cap of one scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSettings {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl WindowSettings {
    pub const fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }

    fn merge(&self, patch: &WindowSettingsPatch) -> Self {
        Self {
            window_ms: patch.window_ms.unwrap_or(self.window_ms),
            max_requests: patch.max_requests.unwrap_or(self.max_requests),
        }
    }

    fn validate(&self, scope: LimitScope) -> SupportResult<()> {
        if self.window_ms == 0 {
            return Err(SupportError::ConfigError(format!(
                "{} windowMs must be greater than 0",
                scope.as_str()
            )));
        }
        if self.max_requests == 0 {
            return Err(SupportError::ConfigError(format!(
                "{} maxRequests must be greater than 0",
                scope.as_str()
            )));
        }
        Ok(())
    }
}

/// Runtime-tunable limits, persisted as the `rag_limits` document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitSettings {
    pub company: WindowSettings,
    pub ip: WindowSettings,
    pub daily_max_tokens: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            company: WindowSettings::new(60_000, 100),
            ip: WindowSettings::new(60_000, 20),
            daily_max_tokens: 100_000,
        }
    }
}

impl LimitSettings {
    pub fn for_scope(&self, scope: LimitScope) -> WindowSettings {
        match scope {
            LimitScope::Company => self.company,
            LimitScope::Ip => self.ip,
        }
    }

    /// Apply a patch and validate the result
    pub fn merge(&self, patch: &LimitSettingsPatch) -> SupportResult<Self> {
        let merged = Self {
            company: patch.company.as_ref().map_or(self.company, |p| self.company.merge(p)),
            ip: patch.ip.as_ref().map_or(self.ip, |p| self.ip.merge(p)),
            daily_max_tokens: patch.daily_max_tokens.unwrap_or(self.daily_max_tokens),
        };
        merged.validate()?;
        Ok(merged)
    }

    pub fn validate(&self) -> SupportResult<()> {
        self.company.validate(LimitScope::Company)?;
        self.ip.validate(LimitScope::Ip)?;
        if self.daily_max_tokens == 0 {
            return Err(SupportError::ConfigError(
                "dailyMaxTokens must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a persisted document as a patch over these settings
    pub fn apply_document(&self, document: &Value) -> SupportResult<Self> {
        let patch: LimitSettingsPatch = serde_json::from_value(document.clone())?;
        self.merge(&patch)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSettingsPatch {
    pub window_ms: Option<u64>,
    pub max_requests: Option<u32>,
}

/// Partial update of [`LimitSettings`]; absent fields keep their value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitSettingsPatch {
    pub company: Option<WindowSettingsPatch>,
    pub ip: Option<WindowSettingsPatch>,
    pub daily_max_tokens: Option<u64>,
}

impl LimitSettingsPatch {
    /// Patch that replaces the window of one scope
    pub fn for_scope(scope: LimitScope, window_ms: u64, max_requests: u32) -> Self {
        let window = Some(WindowSettingsPatch {
            window_ms: Some(window_ms),
            max_requests: Some(max_requests),
        });
        match scope {
            LimitScope::Company => Self {
                company: window,
                ..Default::default()
            },
            LimitScope::Ip => Self {
                ip: window,
                ..Default::default()
            },
        }
    }
}
