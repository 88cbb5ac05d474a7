//! Stage timing arithmetic.
//!
//! Every function here is pure and total: inputs outside the meaningful range
//! are clamped rather than rejected, so callers on the hot tick path never
//! have to handle errors.

use thiserror::Error;

pub const SECOND_MS: u64 = 1_000;
pub const MINUTE_MS: u64 = 60 * SECOND_MS;
pub const HOUR_MS: u64 = 60 * MINUTE_MS;
pub const DAY_MS: u64 = 24 * HOUR_MS;

/// Milliseconds left until `end_at_ms`, never negative.
pub fn remaining(end_at_ms: i64, now_ms: i64) -> u64 {
    end_at_ms.saturating_sub(now_ms).max(0) as u64
}

pub fn is_overdue(end_at_ms: i64, now_ms: i64) -> bool {
    now_ms >= end_at_ms
}

/// Milliseconds elapsed past `end_at_ms`, never negative.
pub fn overdue_by(end_at_ms: i64, now_ms: i64) -> u64 {
    now_ms.saturating_sub(end_at_ms).max(0) as u64
}

/// Whole minutes, rounded up. Used for "N min left" wording.
pub fn minutes_ceil(ms: u64) -> u64 {
    ms.div_ceil(MINUTE_MS)
}

/// Renders `ms` as `"1d 2h 3m 4s"`.
///
/// Leading zero units are omitted; once a unit is shown every smaller unit is
/// shown too. Seconds are always present, so `format_duration(0) == "0s"`.
/// Sub-second remainders are truncated.
pub fn format_duration(ms: u64) -> String {
    let total_secs = ms / SECOND_MS;
    let total_mins = total_secs / 60;
    let total_hours = total_mins / 60;
    let days = total_hours / 24;

    let secs = total_secs % 60;
    let mins = total_mins % 60;
    let hours = total_hours % 24;

    let mut parts = Vec::with_capacity(4);
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 || days > 0 {
        parts.push(format!("{hours}h"));
    }
    if mins > 0 || hours > 0 || days > 0 {
        parts.push(format!("{mins}m"));
    }
    parts.push(format!("{secs}s"));
    parts.join(" ")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration `{0}`: expected forms like 90s, 10m, 1h30m, 2d")]
    Invalid(String),
    #[error("duration must be greater than zero")]
    Zero,
    #[error("duration `{0}` is too large")]
    Overflow(String),
}

/// Parses a duration expression into milliseconds.
///
/// Accepts a sequence of `<number><unit>` groups with units `d`, `h`, `m`,
/// `s`, optionally separated by whitespace (so the output of
/// [`format_duration`] parses back). A bare number is read as minutes.
pub fn parse_duration(expr: &str) -> Result<u64, DurationParseError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if let Ok(minutes) = trimmed.parse::<u64>() {
        return checked_total(minutes.checked_mul(MINUTE_MS), trimmed);
    }

    let invalid = || DurationParseError::Invalid(trimmed.to_string());
    let mut total: u64 = 0;
    let mut digits = String::new();
    for ch in trimmed.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        if ch.is_whitespace() {
            if digits.is_empty() {
                continue;
            }
            return Err(invalid());
        }
        let unit_ms = match ch.to_ascii_lowercase() {
            'd' => DAY_MS,
            'h' => HOUR_MS,
            'm' => MINUTE_MS,
            's' => SECOND_MS,
            _ => return Err(invalid()),
        };
        if digits.is_empty() {
            return Err(invalid());
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| DurationParseError::Overflow(trimmed.to_string()))?;
        digits.clear();
        total = value
            .checked_mul(unit_ms)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| DurationParseError::Overflow(trimmed.to_string()))?;
    }
    if !digits.is_empty() {
        return Err(invalid());
    }
    checked_total(Some(total), trimmed)
}

fn checked_total(total: Option<u64>, expr: &str) -> Result<u64, DurationParseError> {
    match total {
        None => Err(DurationParseError::Overflow(expr.to_string())),
        Some(0) => Err(DurationParseError::Zero),
        Some(ms) => Ok(ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_is_clamped_and_zero_exactly_when_overdue() {
        let end = 1_000_000;
        for now in [end - 150_000, end - 1, end, end + 1, end + 86_400_000] {
            let left = remaining(end, now);
            assert_eq!(left == 0, is_overdue(end, now), "now={now}");
        }
        assert_eq!(remaining(end, end - 1_500), 1_500);
        assert_eq!(remaining(i64::MIN, i64::MAX), 0);
        assert_eq!(remaining(i64::MAX, i64::MIN), i64::MAX as u64);
    }

    #[test]
    fn overdue_by_counts_only_past_deadline() {
        assert_eq!(overdue_by(10_000, 4_000), 0);
        assert_eq!(overdue_by(10_000, 10_000), 0);
        assert_eq!(overdue_by(10_000, 72_500), 62_500);
    }

    #[test]
    fn format_duration_breakdown() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(999), "0s");
        assert_eq!(format_duration(59_000), "59s");
        assert_eq!(format_duration(61_000), "1m 1s");
        assert_eq!(format_duration(HOUR_MS), "1h 0m 0s");
        assert_eq!(format_duration(DAY_MS + 5 * SECOND_MS), "1d 0h 0m 5s");
        assert_eq!(format_duration(2 * DAY_MS + 3 * HOUR_MS + 4 * MINUTE_MS), "2d 3h 4m 0s");
    }

    #[test]
    fn format_duration_preserves_order() {
        let samples = [
            0,
            1_000,
            59_999,
            60_000,
            119_000,
            120_000,
            3_599_000,
            HOUR_MS,
            DAY_MS - 1,
            DAY_MS,
            3 * DAY_MS + 7,
        ];
        for pair in samples.windows(2) {
            let a = parse_duration(&format_duration(pair[0])).unwrap_or(0);
            let b = parse_duration(&format_duration(pair[1])).unwrap_or(0);
            assert!(a <= b, "{} > {}", format_duration(pair[0]), format_duration(pair[1]));
        }
    }

    #[test]
    fn parse_duration_forms() {
        assert_eq!(parse_duration("90s"), Ok(90_000));
        assert_eq!(parse_duration("10m"), Ok(600_000));
        assert_eq!(parse_duration("1h30m"), Ok(90 * MINUTE_MS));
        assert_eq!(parse_duration("2d"), Ok(2 * DAY_MS));
        assert_eq!(parse_duration("1h 0m 5s"), Ok(HOUR_MS + 5_000));
        assert_eq!(parse_duration(" 15 "), Ok(15 * MINUTE_MS));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), Err(DurationParseError::Empty));
        assert_eq!(parse_duration("0m"), Err(DurationParseError::Zero));
        assert_eq!(parse_duration("0"), Err(DurationParseError::Zero));
        assert!(matches!(parse_duration("10x"), Err(DurationParseError::Invalid(_))));
        assert!(matches!(parse_duration("m"), Err(DurationParseError::Invalid(_))));
        assert!(matches!(parse_duration("5m3"), Err(DurationParseError::Invalid(_))));
        assert!(matches!(parse_duration("1 m"), Err(DurationParseError::Invalid(_))));
        assert!(matches!(
            parse_duration("99999999999999999999d"),
            Err(DurationParseError::Overflow(_))
        ));
    }

    #[test]
    fn minutes_round_up() {
        assert_eq!(minutes_ceil(1), 1);
        assert_eq!(minutes_ceil(60_000), 1);
        assert_eq!(minutes_ceil(60_001), 2);
        assert_eq!(minutes_ceil(120_000), 2);
    }
}
