use crate::ad_size::ScreenSize;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },

    #[error("failed to parse config {path}: {source}")]
    Parse { path: String, #[source] source: serde_json::Error },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

const DAY_MS: u64 = 24 * 60 * 60 * 1000;
const DEBUG_COOLDOWN_MS: u64 = 14 * DAY_MS;
const DEBUG_LOCKOUT_MS: u64 = 3 * 365 * DAY_MS;

/// Host-side settings for running auctions.
///
/// Passed explicitly to the coordinator; nothing here is process-global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConfig {
    pub default_buyer_timeout_ms: u64,
    pub max_buyer_timeout_ms: u64,
    pub default_seller_timeout_ms: u64,
    pub max_seller_timeout_ms: u64,
    pub default_reporting_timeout_ms: u64,
    pub max_reporting_timeout_ms: u64,
    /// Probability that a non-suppressed forDebuggingOnly report is actually sent
    pub debug_report_sampling_rate: f64,
    /// Lock out all debug reports once one has been sent
    pub debug_lockout_after_report: bool,
    /// How long an origin whose debug report was not sampled stays in cooldown
    pub debug_cooldown_ms: u64,
    pub debug_lockout_ms: u64,
    /// Screen dimensions used to resolve `sw`/`sh` ad sizes
    pub screen_width: u32,
    pub screen_height: u32,
    pub top_window_hostname: String,
    pub seed: u64,
    /// Instruction budget of one wasm helper call
    pub wasm_fuel: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            default_buyer_timeout_ms: 50,
            max_buyer_timeout_ms: 500,
            default_seller_timeout_ms: 50,
            max_seller_timeout_ms: 500,
            default_reporting_timeout_ms: 50,
            max_reporting_timeout_ms: 5000,
            debug_report_sampling_rate: 1.0,
            debug_lockout_after_report: false,
            debug_cooldown_ms: DEBUG_COOLDOWN_MS,
            debug_lockout_ms: DEBUG_LOCKOUT_MS,
            screen_width: 1920,
            screen_height: 1080,
            top_window_hostname: "publisher.test".to_string(),
            seed: 0,
            wasm_fuel: 10_000_000,
        }
    }
}

impl HostConfig {
    /// Load a config from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: display.clone(), source })?;
        let config: HostConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path: display, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.debug_report_sampling_rate) {
            return Err(ConfigError::Invalid {
                field: "debugReportSamplingRate",
                reason: format!("{} is not a probability", self.debug_report_sampling_rate),
            });
        }
        if self.screen_width == 0 || self.screen_height == 0 {
            return Err(ConfigError::Invalid { field: "screenWidth/screenHeight", reason: "must be positive".to_string() });
        }
        Ok(())
    }

    pub fn screen(&self) -> ScreenSize {
        ScreenSize { width: self.screen_width, height: self.screen_height }
    }

    pub fn buyer_timeout(&self, requested_ms: Option<u64>) -> Duration {
        clamp_timeout(requested_ms, self.default_buyer_timeout_ms, self.max_buyer_timeout_ms)
    }

    pub fn seller_timeout(&self, requested_ms: Option<u64>) -> Duration {
        clamp_timeout(requested_ms, self.default_seller_timeout_ms, self.max_seller_timeout_ms)
    }

    pub fn reporting_timeout(&self, requested_ms: Option<u64>) -> Duration {
        clamp_timeout(requested_ms, self.default_reporting_timeout_ms, self.max_reporting_timeout_ms)
    }

    pub fn debug_cooldown(&self) -> Duration {
        Duration::from_millis(self.debug_cooldown_ms)
    }

    pub fn debug_lockout(&self) -> Duration {
        Duration::from_millis(self.debug_lockout_ms)
    }
}

fn clamp_timeout(requested_ms: Option<u64>, default_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(requested_ms.unwrap_or(default_ms).min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_default_and_clamp() {
        let config = HostConfig::default();
        assert_eq!(config.buyer_timeout(None), Duration::from_millis(50));
        assert_eq!(config.buyer_timeout(Some(10_000)), Duration::from_millis(500));
        assert_eq!(config.seller_timeout(Some(20)), Duration::from_millis(20));
        assert_eq!(config.reporting_timeout(Some(10_000)), Duration::from_millis(5000));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: HostConfig = serde_json::from_str(r#"{"seed": 42, "screenWidth": 800}"#).unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.screen_width, 800);
        assert_eq!(config.screen_height, 1080);
        assert_eq!(config.default_buyer_timeout_ms, 50);
        assert_eq!(config.debug_cooldown(), Duration::from_secs(14 * 24 * 60 * 60));
    }

    #[test]
    fn test_validate_rejects_bad_sampling_rate() {
        let config = HostConfig { debug_report_sampling_rate: 1.5, ..HostConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }
}
