use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use marketsync_common::error::{MarketsyncError, MarketsyncResult};
use serde::Deserialize;

use crate::env::{get_var_or, parse_var_or};

/// What the first run of a windowed family fetches when no cursor exists yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstRunPolicy {
    /// Backfill `initial_lookback` of history.
    #[default]
    Lookback,
    /// Fetch only the trailing `overlap`, the same slice an incremental run re-reads.
    OverlapOnly,
}

impl FromStr for FirstRunPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lookback" => Ok(Self::Lookback),
            "overlap_only" | "overlap" => Ok(Self::OverlapOnly),
            other => Err(format!("unknown first-run policy '{other}'")),
        }
    }
}

impl fmt::Display for FirstRunPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lookback => f.write_str("lookback"),
            Self::OverlapOnly => f.write_str("overlap_only"),
        }
    }
}

/// One week; longer intervals are almost certainly a unit mistake.
pub const MAX_CYCLE_INTERVAL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Tuning for the background synchronization engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub cycle_interval: Duration,
    pub max_concurrent_accounts: usize,
    pub stale_after: Duration,
    pub heartbeat_interval: Duration,
    pub family_stagger: Duration,
    pub first_run_policy: FirstRunPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(300),
            max_concurrent_accounts: 5,
            stale_after: Duration::from_secs(600),
            heartbeat_interval: Duration::from_secs(60),
            family_stagger: Duration::from_millis(2000),
            first_run_policy: FirstRunPolicy::Lookback,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> MarketsyncResult<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let cfg = Self {
            cycle_interval: Duration::from_secs(parse_var_or(
                "SYNC_INTERVAL_SECS",
                defaults.cycle_interval.as_secs(),
            )?),
            max_concurrent_accounts: parse_var_or(
                "SYNC_MAX_CONCURRENT_ACCOUNTS",
                defaults.max_concurrent_accounts,
            )?,
            stale_after: Duration::from_secs(parse_var_or(
                "SYNC_STALE_AFTER_SECS",
                defaults.stale_after.as_secs(),
            )?),
            heartbeat_interval: Duration::from_secs(parse_var_or(
                "SYNC_HEARTBEAT_SECS",
                defaults.heartbeat_interval.as_secs(),
            )?),
            family_stagger: Duration::from_millis(parse_var_or(
                "SYNC_FAMILY_STAGGER_MS",
                defaults.family_stagger.as_millis() as u64,
            )?),
            first_run_policy: get_var_or("SYNC_FIRST_RUN_POLICY", "lookback")
                .parse()
                .map_err(|e| MarketsyncError::Config(format!("invalid SYNC_FIRST_RUN_POLICY: {e}")))?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> MarketsyncResult<()> {
        if self.cycle_interval.is_zero() {
            return Err(MarketsyncError::Config(
                "SYNC_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if self.cycle_interval > MAX_CYCLE_INTERVAL {
            return Err(MarketsyncError::Config(format!(
                "SYNC_INTERVAL_SECS must be at most {}",
                MAX_CYCLE_INTERVAL.as_secs()
            )));
        }
        if self.max_concurrent_accounts == 0 {
            return Err(MarketsyncError::Config(
                "SYNC_MAX_CONCURRENT_ACCOUNTS must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(MarketsyncError::Config(
                "SYNC_HEARTBEAT_SECS must be greater than zero".to_string(),
            ));
        }
        // A heartbeat slower than the staleness threshold would let healthy runs be reclaimed.
        if self.heartbeat_interval >= self.stale_after {
            return Err(MarketsyncError::Config(format!(
                "SYNC_HEARTBEAT_SECS ({}s) must be shorter than SYNC_STALE_AFTER_SECS ({}s)",
                self.heartbeat_interval.as_secs(),
                self.stale_after.as_secs()
            )));
        }
        Ok(())
    }
}
