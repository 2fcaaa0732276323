//! Service configuration.
//!
//! Plain structs with defaults, deserialisable with serde. Durations are
//! written as compact strings such as `"500ms"`, `"30s"` or `"1m30s"`.
//! Loading configuration from files or the environment is left to the
//! embedding application.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::algorithm::AlgorithmKind;
use crate::error::ConfigError;
#[cfg(any(feature = "memory", feature = "redis"))]
use crate::storage::StorageConfig;

const MS_PER_SECOND: u128 = 1_000;
const MS_PER_MINUTE: u128 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u128 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u128 = 24 * MS_PER_HOUR;

/// Parse a duration string.
///
/// The input is one or more `<integer><unit>` groups with units `ms`, `s`,
/// `m`, `h` and `d`, e.g. `"250ms"`, `"1h30m"`. A bare `"0"` is zero.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let value = input.trim();
    if value.is_empty() {
        return Err(ConfigError::InvalidDuration("empty duration".to_string()));
    }
    if value == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = |reason: &str| ConfigError::InvalidDuration(format!("{reason} in {input:?}"));

    let mut total_ms: u128 = 0;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid("expected a number"));
        }
        let amount: u128 = rest[..digits]
            .parse()
            .map_err(|_| invalid("number out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ms" => 1,
            "s" => MS_PER_SECOND,
            "m" => MS_PER_MINUTE,
            "h" => MS_PER_HOUR,
            "d" => MS_PER_DAY,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };
        rest = &rest[unit_len..];

        total_ms = amount
            .checked_mul(scale)
            .and_then(|ms| total_ms.checked_add(ms))
            .ok_or_else(|| invalid("duration overflows"))?;
    }

    u64::try_from(total_ms)
        .map(Duration::from_millis)
        .map_err(|_| invalid("duration overflows"))
}

/// Render a duration in the format accepted by [`parse_duration`].
///
/// Uses hours, minutes, seconds and milliseconds, omitting zero parts;
/// sub-millisecond precision is dropped.
pub fn format_duration(duration: Duration) -> String {
    let mut ms = duration.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (scale, unit) in [
        (MS_PER_HOUR, "h"),
        (MS_PER_MINUTE, "m"),
        (MS_PER_SECOND, "s"),
        (1, "ms"),
    ] {
        let amount = ms / scale;
        if amount > 0 {
            out.push_str(&amount.to_string());
            out.push_str(unit);
            ms %= scale;
        }
    }
    out
}

/// Serde adapter for duration strings, for use with `#[serde(with = ...)]`.
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialise as a duration string.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    /// Deserialise from a duration string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        super::parse_duration(&value).map_err(serde::de::Error::custom)
    }
}

/// Values used when an admission request leaves a field out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterDefaults {
    /// Algorithm to use.
    pub algorithm: AlgorithmKind,
    /// Requests per window.
    pub limit: u64,
    /// Window length.
    #[serde(with = "duration_str")]
    pub window: Duration,
}

impl Default for LimiterDefaults {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::TokenBucket,
            limit: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Denial event publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Publish an event for every denied request.
    pub enabled: bool,
    /// Events buffered before new ones are dropped.
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1024,
        }
    }
}

/// Top-level configuration of an admission service.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Storage backend selection.
    #[cfg(any(feature = "memory", feature = "redis"))]
    pub storage: StorageConfig,
    /// Request defaults.
    pub limiter: LimiterDefaults,
    /// Denial events.
    pub events: EventsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1h0m1s500ms").unwrap(), Duration::from_millis(3_601_500));
        assert_eq!(parse_duration(" 10s ").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in ["", "   ", "10", "s", "10x", "1.5s", "-1s", "1m-", "99999999999999999999999999999999999999999d"] {
            let err = parse_duration(input).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidDuration(_)), "{input:?} should be rejected");
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_secs(60)), "1m");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1s500ms");
        assert_eq!(format_duration(Duration::from_secs(86_400)), "24h");

        for duration in [Duration::from_millis(7), Duration::from_secs(3_725)] {
            assert_eq!(parse_duration(&format_duration(duration)).unwrap(), duration);
        }
    }

    #[test]
    fn test_limiter_defaults() {
        let defaults = LimiterDefaults::default();
        assert_eq!(defaults.algorithm, AlgorithmKind::TokenBucket);
        assert_eq!(defaults.limit, 100);
        assert_eq!(defaults.window, Duration::from_secs(60));

        let defaults: LimiterDefaults =
            serde_json::from_str(r#"{"algorithm": "sliding_window", "window": "10s"}"#).unwrap();
        assert_eq!(defaults.algorithm, AlgorithmKind::SlidingWindow);
        assert_eq!(defaults.limit, 100);
        assert_eq!(defaults.window, Duration::from_secs(10));

        let json = serde_json::to_value(&defaults).unwrap();
        assert_eq!(json["window"], "10s");
    }

    #[test]
    fn test_service_config_deserialize() {
        let config: ServiceConfig = serde_json::from_str(
            r#"{
                "limiter": {"limit": 5, "window": "1s"},
                "events": {"capacity": 8}
            }"#,
        )
        .unwrap();
        assert_eq!(config.limiter.limit, 5);
        assert_eq!(config.limiter.window, Duration::from_secs(1));
        assert!(config.events.enabled);
        assert_eq!(config.events.capacity, 8);

        assert!(serde_json::from_str::<ServiceConfig>(r#"{"limiter": {"window": "soon"}}"#).is_err());
    }
}
