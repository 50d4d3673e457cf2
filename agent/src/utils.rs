//! Utility functions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Build version of the deployment agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub name: String,
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl CooldownOptions {
    /// Wait between reads after the message feed errors: 1s doubling to a
    /// minute
    pub fn feed_reconnect() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self::feed_reconnect()
    }
}

/// Largest exponent applied; later attempts reuse it
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Delay before retry number `attempt` (zero-based), capped at `max_delay`
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let exponent = attempt.min(MAX_BACKOFF_EXPONENT) as i32;
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(exponent);
    Duration::from_secs_f64(delay_secs.min(options.max_delay.as_secs_f64()))
}
