use chrono::{Datelike, Timelike};

/// Formats a date-time as `YYYY-MM-DD HH:MM:SS.mmm` in the value's own zone.
///
/// With `exclude_ms` the fraction is always `.00`. Every field but the year is
/// zero-padded to at least two digits.
pub fn to_timestamp<T>(value: &T, exclude_ms: bool) -> String
where
    T: Datelike + Timelike,
{
    let fraction = if exclude_ms {
        "00".to_string()
    } else {
        // Leap seconds carry nanosecond values above 1e9.
        pad2((value.nanosecond() % 1_000_000_000 / 1_000_000) as i64)
    };

    format!(
        "{}-{}-{} {}:{}:{}.{}",
        value.year(),
        pad2(value.month() as i64),
        pad2(value.day() as i64),
        pad2(value.hour() as i64),
        pad2(value.minute() as i64),
        pad2(value.second() as i64),
        fraction
    )
}

fn pad2(n: i64) -> String {
    if n < 0 {
        format!("-{:02}", n.unsigned_abs())
    } else {
        format!("{:02}", n)
    }
}
