// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::error::ConfigError;
use crate::settings::Settings;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_DELAY_THRESHOLD_SECS: i64 = 60;
pub const DEFAULT_ANIMATION_MS: u64 = 1_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    pub relay_url: String,
    pub poll_interval: Duration,
    pub auto_update: bool,
    pub delay_threshold_secs: i64,
    pub animation_duration: Duration,
    pub request_timeout: Duration,
}

impl TrackerConfig {
    /// Reads `TRACKER_*` variables from the process environment.
    /// Call `dotenvy::dotenv()` first if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let relay_url = lookup("TRACKER_RELAY_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("TRACKER_RELAY_URL"))?;

        let poll_interval_ms: u64 =
            parse_or(&lookup, "TRACKER_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        let auto_update: bool = parse_or(&lookup, "TRACKER_AUTO_UPDATE", true)?;
        let delay_threshold_secs: i64 = parse_or(
            &lookup,
            "TRACKER_DELAY_THRESHOLD_SECS",
            DEFAULT_DELAY_THRESHOLD_SECS,
        )?;
        let animation_ms: u64 = parse_or(&lookup, "TRACKER_ANIMATION_MS", DEFAULT_ANIMATION_MS)?;
        let request_timeout_secs: u64 = parse_or(
            &lookup,
            "TRACKER_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;

        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "TRACKER_POLL_INTERVAL_MS",
                value: "0".to_string(),
            });
        }

        Ok(TrackerConfig {
            relay_url: relay_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(poll_interval_ms),
            auto_update,
            delay_threshold_secs,
            animation_duration: Duration::from_millis(animation_ms),
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }

    pub fn initial_settings(&self) -> Settings {
        Settings {
            poll_interval: self.poll_interval,
            auto_update: self.auto_update,
            delay_threshold_secs: self.delay_threshold_secs,
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: HashMap<&'static str, String> =
            pairs.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config =
            TrackerConfig::from_lookup(lookup_from(&[("TRACKER_RELAY_URL", "http://relay/")]))
                .unwrap();
        assert_eq!(config.relay_url, "http://relay");
        assert_eq!(config.poll_interval, Duration::from_millis(10_000));
        assert!(config.auto_update);
        assert_eq!(config.delay_threshold_secs, 60);
        assert_eq!(config.animation_duration, Duration::from_millis(1_000));
    }

    #[test]
    fn test_missing_relay_url() {
        let err = TrackerConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TRACKER_RELAY_URL")));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = TrackerConfig::from_lookup(lookup_from(&[
            ("TRACKER_RELAY_URL", "http://relay"),
            ("TRACKER_POLL_INTERVAL_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "TRACKER_POLL_INTERVAL_MS",
                ..
            }
        ));
    }

    #[test]
    fn test_overrides() {
        let config = TrackerConfig::from_lookup(lookup_from(&[
            ("TRACKER_RELAY_URL", "http://relay"),
            ("TRACKER_POLL_INTERVAL_MS", "2500"),
            ("TRACKER_AUTO_UPDATE", "false"),
            ("TRACKER_DELAY_THRESHOLD_SECS", "120"),
        ]))
        .unwrap();
        let settings = config.initial_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(2500));
        assert!(!settings.auto_update);
        assert_eq!(settings.delay_threshold_secs, 120);
    }
}
