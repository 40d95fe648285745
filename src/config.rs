use std::str::FromStr;
use std::time::Duration;

use anyhow::{ensure, Context};

use crate::trend::TrendThresholds;

pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 60;
pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 200;
pub const DEFAULT_LISTING_LIMIT: u32 = 25;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub cache_ttl: Duration,
    pub default_page_limit: u32,
    pub max_page_limit: u32,
    pub trend: TrendThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            default_page_limit: DEFAULT_PAGE_LIMIT,
            max_page_limit: MAX_PAGE_LIMIT,
            trend: TrendThresholds::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; unset names keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let ttl_seconds: u64 = parse_var(&lookup, "CACHE_TTL_SECONDS")?
            .unwrap_or(DEFAULT_CACHE_TTL_SECONDS);
        let max_page_limit: u32 =
            parse_var(&lookup, "LEADERBOARD_MAX_LIMIT")?.unwrap_or(defaults.max_page_limit);
        let default_page_limit: u32 =
            parse_var(&lookup, "LEADERBOARD_DEFAULT_LIMIT")?.unwrap_or(defaults.default_page_limit);
        let improving_above: f64 = parse_var(&lookup, "TREND_IMPROVING_SLOPE")?
            .unwrap_or(defaults.trend.improving_above);
        let support_below: f64 =
            parse_var(&lookup, "TREND_SUPPORT_SLOPE")?.unwrap_or(defaults.trend.support_below);

        ensure!(max_page_limit >= 1, "LEADERBOARD_MAX_LIMIT must be at least 1");
        ensure!(
            (1..=max_page_limit).contains(&default_page_limit),
            "LEADERBOARD_DEFAULT_LIMIT must be between 1 and {max_page_limit}"
        );
        ensure!(
            support_below <= improving_above,
            "TREND_SUPPORT_SLOPE must not exceed TREND_IMPROVING_SLOPE"
        );

        Ok(Self {
            cache_ttl: Duration::from_secs(ttl_seconds),
            default_page_limit,
            max_page_limit,
            trend: TrendThresholds {
                improving_above,
                support_below,
            },
        })
    }

    /// Clamps requested paging to `page >= 1` and `1 <= limit <= max_page_limit`.
    pub fn paging(&self, page: Option<u32>, limit: Option<u32>) -> (u32, u32) {
        clamp_paging(page, limit, self.default_page_limit, self.max_page_limit)
    }

    /// Same bounds as `paging`, but result listings default to smaller pages.
    pub fn listing_paging(&self, page: Option<u32>, limit: Option<u32>) -> (u32, u32) {
        let default = DEFAULT_LISTING_LIMIT.min(self.max_page_limit);
        clamp_paging(page, limit, default, self.max_page_limit)
    }
}

fn clamp_paging(page: Option<u32>, limit: Option<u32>, default: u32, max: u32) -> (u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(default).clamp(1, max);
    (page, limit)
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} has an invalid value: {raw:?}")),
    }
}
