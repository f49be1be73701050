use std::{env, fmt::Display, str::FromStr, time::Duration};

use anyhow::Context;

use crate::rate_limit::{
    RateLimitSettings, DEFAULT_MAX_REQUESTS, DEFAULT_SWEEP_INTERVAL, DEFAULT_WINDOW,
};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub trust_proxy: bool,
    pub rate_limit: RateLimitSettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = positive_or("PORT", lookup("PORT"), 3000u16);

        let trust_proxy = lookup("TRUST_PROXY")
            .map(|value| {
                let normalized = value.trim().to_lowercase();
                matches!(normalized.as_str(), "true" | "1" | "on" | "yes")
            })
            .unwrap_or(false);

        let window = Duration::from_millis(positive_or(
            "RATE_LIMIT_WINDOW_MS",
            lookup("RATE_LIMIT_WINDOW_MS"),
            DEFAULT_WINDOW.as_millis() as u64,
        ));
        let max_requests = positive_or(
            "RATE_LIMIT_MAX_REQUESTS",
            lookup("RATE_LIMIT_MAX_REQUESTS"),
            DEFAULT_MAX_REQUESTS,
        );
        let sweep_interval = Duration::from_millis(positive_or(
            "RATE_LIMIT_SWEEP_INTERVAL_MS",
            lookup("RATE_LIMIT_SWEEP_INTERVAL_MS"),
            DEFAULT_SWEEP_INTERVAL.as_millis() as u64,
        ));

        let rate_limit = RateLimitSettings::new(window, max_requests, sweep_interval)
            .context("invalid rate limit configuration")?;

        Ok(Self {
            port,
            trust_proxy,
            rate_limit,
        })
    }
}

/// Reads a positive number from `value`, warning and falling back when a set
/// variable cannot be used.
fn positive_or<T>(key: &str, value: Option<String>, fallback: T) -> T
where
    T: FromStr + Default + PartialOrd + Copy + Display,
{
    let Some(raw) = value else {
        return fallback;
    };

    match parse_positive(&raw) {
        Some(parsed) => parsed,
        None => {
            tracing::warn!(
                key,
                value = %raw,
                fallback = %fallback,
                "ignoring invalid configuration value"
            );
            fallback
        }
    }
}

fn parse_positive<T>(raw: &str) -> Option<T>
where
    T: FromStr + Default + PartialOrd,
{
    raw.trim()
        .parse::<T>()
        .ok()
        .filter(|parsed| *parsed > T::default())
}
