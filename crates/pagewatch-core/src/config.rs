//! Engine configuration

use pagewatch_common::{PageWatchError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::lifecycle::PageState;

/// Visibility engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VisibilityConfig {
    /// Emit diagnostic logs for transitions and dispatch
    pub debug: bool,

    /// Polling period for hybrid bridge detection, in milliseconds. Written
    /// under the historical misspelled key that existing configs use.
    #[serde(
        rename = "hybirdCheckInterval",
        alias = "hybridCheckInterval",
        alias = "hybridCheckIntervalMs"
    )]
    pub hybrid_check_interval_ms: u64,

    /// Per-handler time budget for asynchronous handlers, in milliseconds
    #[serde(
        rename = "maxCallbackExecutionTime",
        alias = "maxCallbackExecutionTimeMs"
    )]
    pub max_callback_execution_time_ms: u64,

    /// Reserved initial state hint; the engine always starts in `Loading`
    pub default_page_state: Option<PageState>,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            debug: false,
            hybrid_check_interval_ms: 1000,
            max_callback_execution_time_ms: 3000,
            default_page_state: None,
        }
    }
}

impl VisibilityConfig {
    /// Parse a JSON document; unknown keys are ignored, missing keys default.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PageWatchError::config_with_source("invalid visibility config", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hybrid_check_interval_ms == 0 {
            return Err(PageWatchError::config(
                "hybridCheckInterval must be greater than zero",
            ));
        }
        if self.max_callback_execution_time_ms == 0 {
            return Err(PageWatchError::config(
                "maxCallbackExecutionTime must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_hybrid_check_interval(mut self, interval: Duration) -> Self {
        self.hybrid_check_interval_ms = saturating_millis(interval);
        self
    }

    pub fn with_max_callback_execution_time(mut self, timeout: Duration) -> Self {
        self.max_callback_execution_time_ms = saturating_millis(timeout);
        self
    }

    /// Never zero, so it is always a valid interval period.
    pub fn hybrid_check_interval(&self) -> Duration {
        Duration::from_millis(self.hybrid_check_interval_ms.max(1))
    }

    pub fn max_callback_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_callback_execution_time_ms)
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
