//! Shared utilities for CLI commands.

use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;

/// Pre-compiled regex for minute durations: `90`, `90m`, `2h`, `1h30m`.
static MINUTES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(\d+)h)?\s*(?:(\d+)m?)?$").unwrap());

/// Parse a duration given in minutes, optionally with hour/minute units.
///
/// Supports:
/// - Bare minutes: "90"
/// - Units: "90m", "2h", "1h30m", "1h 30m"
pub fn parse_minutes(s: &str) -> anyhow::Result<u32> {
    let trimmed = s.trim();
    let caps = MINUTES_RE
        .captures(trimmed)
        .filter(|_| !trimmed.is_empty())
        .with_context(|| format!("Invalid duration: {s}. Use minutes (e.g., 90) or units (e.g., 1h30m)"))?;

    let hours: u32 = match caps.get(1) {
        Some(m) => m.as_str().parse().context("failed to parse hours")?,
        None => 0,
    };
    let minutes: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().context("failed to parse minutes")?,
        None => 0,
    };

    hours
        .checked_mul(60)
        .and_then(|h| h.checked_add(minutes))
        .with_context(|| format!("Duration too large: {s}"))
}

/// Format milliseconds as `Hh MMm SSs`, dropping leading zero units.
pub fn format_duration_ms(ms: i64) -> String {
    let total_secs = ms.max(0) / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minutes_bare_number() {
        assert_eq!(parse_minutes("90").unwrap(), 90);
    }

    #[test]
    fn test_parse_minutes_with_units() {
        assert_eq!(parse_minutes("45m").unwrap(), 45);
        assert_eq!(parse_minutes("2h").unwrap(), 120);
        assert_eq!(parse_minutes("1h30m").unwrap(), 90);
        assert_eq!(parse_minutes("1h 30m").unwrap(), 90);
    }

    #[test]
    fn test_parse_minutes_rejects_garbage() {
        assert!(parse_minutes("").is_err());
        assert!(parse_minutes("soon").is_err());
        assert!(parse_minutes("-5").is_err());
        assert!(parse_minutes("10s").is_err());
    }

    #[test]
    fn test_parse_minutes_overflow() {
        assert!(parse_minutes("99999999h").is_err());
    }

    #[test]
    fn test_format_duration_ms() {
        assert_eq!(format_duration_ms(0), "0s");
        assert_eq!(format_duration_ms(42_500), "42s");
        assert_eq!(format_duration_ms(125_000), "2m 05s");
        assert_eq!(format_duration_ms(3_725_000), "1h 02m 05s");
        assert_eq!(format_duration_ms(-10), "0s");
    }
}
