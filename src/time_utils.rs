//! Conversions from human-friendly interval and date strings to epoch milliseconds.

use crate::error::ScanError;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const NAIVE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d %b, %Y",
    "%d %B, %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

/// Convert a Binance interval such as `1m`, `4h`, `1d` or `1w` into milliseconds.
pub fn interval_to_millis(interval: &str) -> Result<i64, ScanError> {
    let invalid = |reason: &str| ScanError::InvalidInterval {
        interval: interval.to_string(),
        reason: reason.to_string(),
    };

    let unit = interval.chars().last().ok_or_else(|| invalid("empty interval"))?;
    let seconds_per_unit: i64 = match unit {
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        'w' => 7 * 24 * 60 * 60,
        _ => return Err(invalid("unit must be one of m, h, d, w")),
    };

    let multiplier: i64 = interval[..interval.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid("multiplier must be an integer"))?;
    if multiplier <= 0 {
        return Err(invalid("multiplier must be positive"));
    }

    multiplier
        .checked_mul(seconds_per_unit * 1000)
        .ok_or_else(|| invalid("value is too large"))
}

/// Parse a date expression into epoch milliseconds, relative to the current time.
pub fn date_to_millis(input: &str) -> Result<i64, ScanError> {
    date_to_millis_at(input, Utc::now())
}

/// Parse a date expression into epoch milliseconds, resolving relative forms
/// ("5 minutes ago", "yesterday") against `now`.
///
/// Timezone-naive inputs are taken to be UTC.
pub fn date_to_millis_at(input: &str, now: DateTime<Utc>) -> Result<i64, ScanError> {
    let trimmed = input.trim();
    let parse_error = || ScanError::DateParse(input.to_string());

    if trimmed.is_empty() {
        return Err(parse_error());
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "now" => return Ok(now.timestamp_millis()),
        "today" => return Ok(midnight(now.date_naive())),
        "yesterday" => {
            let day = now
                .date_naive()
                .checked_sub_days(Days::new(1))
                .ok_or_else(parse_error)?;
            return Ok(midnight(day));
        }
        _ => {}
    }

    if let Some(offset_ms) = relative_offset_millis(trimmed) {
        return now
            .timestamp_millis()
            .checked_sub(offset_ms)
            .ok_or_else(parse_error);
    }

    if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return trimmed.parse::<i64>().map_err(|_| parse_error());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%z") {
        return Ok(dt.timestamp_millis());
    }

    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }
    for fmt in NAIVE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(midnight(date));
        }
    }

    Err(parse_error())
}

fn midnight(date: NaiveDate) -> i64 {
    date.and_time(chrono::NaiveTime::MIN)
        .and_utc()
        .timestamp_millis()
}

/// `"<n> <unit> ago"`, optionally followed by a timezone abbreviation that
/// has no effect on a relative instant (e.g. `"5 minutes ago JST"`).
fn relative_offset_millis(input: &str) -> Option<i64> {
    let tokens: Vec<&str> = input.split_whitespace().collect();

    let (count, unit) = match tokens.as_slice() {
        [count, unit, ago] if ago.eq_ignore_ascii_case("ago") => (count, unit),
        [count, unit, ago, tz] if ago.eq_ignore_ascii_case("ago") && is_zone_token(tz) => {
            (count, unit)
        }
        _ => return None,
    };

    let count: i64 = match count.to_ascii_lowercase().as_str() {
        "a" | "an" => 1,
        n => n.parse().ok()?,
    };
    let unit_ms: i64 = match unit.to_ascii_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000,
        "d" | "day" | "days" => 86_400_000,
        "w" | "wk" | "wks" | "week" | "weeks" => 604_800_000,
        _ => return None,
    };

    count.checked_mul(unit_ms)
}

/// Upper-case abbreviation such as `UTC`, `JST` or `CEST`.
fn is_zone_token(token: &str) -> bool {
    (2..=5).contains(&token.len()) && token.chars().all(|c| c.is_ascii_uppercase())
}
