//! Well-known message types that are treated as scalar leaves.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, SecondsFormat, Timelike, Utc};

pub const TIMESTAMP: &str = "google.protobuf.Timestamp";
pub const DURATION: &str = "google.protobuf.Duration";
pub const FIELD_MASK: &str = "google.protobuf.FieldMask";
pub const DATE: &str = "google.type.Date";
pub const TIME_OF_DAY: &str = "google.type.TimeOfDay";

/// Whether a message type is rendered as a single string rather than an
/// object.
pub fn is_leaf(full_name: &str) -> bool {
    format_hint(full_name).is_some()
}

pub fn format_hint(full_name: &str) -> Option<&'static str> {
    match full_name {
        TIMESTAMP => Some("RFC3339, e.g. 2006-01-02T15:04:05Z"),
        DURATION => Some("e.g. 1h30m"),
        FIELD_MASK => Some("comma-separated paths"),
        DATE => Some("YYYY-MM-DD, e.g. 2006-01-02"),
        TIME_OF_DAY => Some("HH:MM:SS, e.g. 15:04:05"),
        _ => None,
    }
}

// ── Timestamp ──

pub fn parse_timestamp(input: &str) -> Result<(i64, i32), String> {
    let parsed = DateTime::parse_from_rfc3339(input).map_err(|e| e.to_string())?;
    Ok((parsed.timestamp(), parsed.timestamp_subsec_nanos() as i32))
}

pub fn format_timestamp(seconds: i64, nanos: i32) -> Option<String> {
    let time = DateTime::<Utc>::from_timestamp(seconds, nanos.max(0) as u32)?;
    Some(time.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

// ── Duration ──

const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// Parses a duration such as `1h30m`, `-1.5s` or `300ms`.
///
/// Accepts a sequence of decimal numbers, each with an optional fraction and
/// a unit suffix (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`), and an optional
/// leading sign. The bare string `0` is also accepted.
pub fn parse_duration(input: &str) -> Result<(i64, i32), String> {
    let invalid = || format!("invalid duration {input:?}");

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };
    if rest == "0" {
        return Ok((0, 0));
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let limit = if negative {
        i64::MAX as u128 + 1
    } else {
        i64::MAX as u128
    };
    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (int_part, tail) = rest.split_at(int_len);
        rest = tail;

        let mut frac_part = "";
        if let Some(tail) = rest.strip_prefix('.') {
            let frac_len = tail.bytes().take_while(u8::is_ascii_digit).count();
            frac_part = &tail[..frac_len];
            rest = &tail[frac_len..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = rest
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (unit, tail) = rest.split_at(unit_len);
        rest = tail;
        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SECOND,
            "m" => 60 * NANOS_PER_SECOND,
            "h" => 3_600 * NANOS_PER_SECOND,
            "" => return Err(format!("missing unit in duration {input:?}")),
            other => return Err(format!("unknown unit {other:?} in duration {input:?}")),
        };

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let mut value = whole.checked_mul(unit_nanos).ok_or_else(invalid)?;
        if !frac_part.is_empty() {
            let digits = &frac_part[..frac_part.len().min(18)];
            let fraction: u128 = digits.parse().map_err(|_| invalid())?;
            value += fraction * unit_nanos / 10u128.pow(digits.len() as u32);
        }
        total = total.checked_add(value).ok_or_else(invalid)?;
        if total > limit {
            return Err(invalid());
        }
    }

    let seconds = (total / NANOS_PER_SECOND) as i64;
    let nanos = (total % NANOS_PER_SECOND) as i32;
    if negative {
        Ok((-seconds, -nanos))
    } else {
        Ok((seconds, nanos))
    }
}

/// Formats a duration the way protobuf JSON does: seconds with up to nine
/// fractional digits and an `s` suffix.
pub fn format_duration(seconds: i64, nanos: i32) -> String {
    let sign = if seconds < 0 || nanos < 0 { "-" } else { "" };
    let seconds = seconds.unsigned_abs();
    let nanos = nanos.unsigned_abs();
    if nanos == 0 {
        return format!("{sign}{seconds}s");
    }
    let mut fraction = format!("{nanos:09}");
    while fraction.len() > 3 && fraction.ends_with("000") {
        fraction.truncate(fraction.len() - 3);
    }
    format!("{sign}{seconds}.{fraction}s")
}

// ── Date and time of day ──

pub fn parse_date(input: &str) -> Result<(i32, i32, i32), String> {
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").map_err(|e| e.to_string())?;
    Ok((date.year(), date.month() as i32, date.day() as i32))
}

pub fn parse_time_of_day(input: &str) -> Result<(i32, i32, i32), String> {
    let time = NaiveTime::parse_from_str(input, "%H:%M:%S").map_err(|e| e.to_string())?;
    Ok((time.hour() as i32, time.minute() as i32, time.second() as i32))
}
