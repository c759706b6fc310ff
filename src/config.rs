//! Centralized runtime constants and configuration for the firewall core.
//!
//! Tunable intervals and sizes live here so they can be found and adjusted
//! in one place. `FilterConfig` carries the few settings a host may want to
//! override, optionally from the environment.

use std::time::Duration;

use anyhow::Context;

use crate::core::model::{FilterMode, RuleId, RulePermission};
use crate::error::AppError;

/// Interval between packet telemetry flushes to the observer (milliseconds).
pub const PACKET_FLUSH_INTERVAL_MS: u64 = 1000;

/// Width of one traffic statistics bucket (seconds).
pub const STATISTICS_BUCKET_SECS: i64 = 3600;

/// Number of buckets retained per application.
/// 24 buckets of one hour give a sliding day of history.
pub const STATISTICS_BUCKET_COUNT: usize = 24;

/// First id handed out by the rule store. `0` is reserved for "unassigned".
pub const FIRST_RULE_ID: RuleId = 1;

pub const ENV_MODE: &str = "APPWALL_MODE";
pub const ENV_ABANDONED_ASK: &str = "APPWALL_ABANDONED_ASK";
pub const ENV_FLUSH_INTERVAL_MS: &str = "APPWALL_FLUSH_INTERVAL_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    /// Mode the engine starts in.
    pub initial_mode: FilterMode,
    /// Decision recorded when an interactive ask is abandoned without a
    /// reply. `Allow` keeps traffic flowing (fail-open); `Deny` fails closed.
    pub abandoned_ask_permission: RulePermission,
    pub packet_flush_interval: Duration,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            initial_mode: FilterMode::Wait,
            abandoned_ask_permission: RulePermission::Allow,
            packet_flush_interval: Duration::from_millis(PACKET_FLUSH_INTERVAL_MS),
        }
    }
}

impl FilterConfig {
    /// Defaults overlaid with `APPWALL_*` environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by env var name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(mode) = lookup(ENV_MODE) {
            config.initial_mode = mode.parse::<FilterMode>().context(ENV_MODE)?;
        }
        if let Some(permission) = lookup(ENV_ABANDONED_ASK) {
            config.abandoned_ask_permission = permission.parse::<RulePermission>().context(ENV_ABANDONED_ASK)?;
        }
        if let Some(interval) = lookup(ENV_FLUSH_INTERVAL_MS) {
            config.packet_flush_interval = parse_interval_ms(&interval)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.packet_flush_interval.is_zero() {
            return Err(AppError::InvalidInput(
                "packet flush interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_interval_ms(value: &str) -> anyhow::Result<Duration> {
    let millis: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{ENV_FLUSH_INTERVAL_MS}: expected milliseconds, got {value:?}"))?;
    Ok(Duration::from_millis(millis))
}
