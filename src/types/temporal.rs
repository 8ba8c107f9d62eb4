//! Date and timestamp parsing, formatting and interval arithmetic
//!
//! Dates are stored as days since 1970-01-01, timestamps as microseconds
//! since 1970-01-01 00:00:00. The textual formats are strict: exactly
//! `YYYY-MM-DD` and `YYYY-MM-DD HH:MM:SS`.

use crate::error::{Error, Result};
use chrono::{Datelike, NaiveDate};

pub const MICROS_PER_SEC: i64 = 1_000_000;
pub const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SEC;
pub const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;
pub const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

fn invalid(text: &str, target: &str) -> Error {
    Error::InvalidFormat {
        text: text.to_string(),
        target: target.to_string(),
        row: None,
    }
}

/// Gregorian leap-year rule: divisible by 4, except centuries not divisible
/// by 400.
pub fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn parse_fixed_digits(s: &str, width: usize) -> Option<u32> {
    if s.len() != width || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parse a strict `YYYY-MM-DD` date into days since the epoch.
pub fn parse_date(text: &str) -> Result<i32> {
    let err = || invalid(text, "DATE");
    let bytes = text.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return Err(err());
    }
    let year = parse_fixed_digits(&text[0..4], 4).ok_or_else(err)? as i32;
    let month = parse_fixed_digits(&text[5..7], 2).ok_or_else(err)?;
    let day = parse_fixed_digits(&text[8..10], 2).ok_or_else(err)?;
    if !(1..=12).contains(&month) || day < 1 || day > days_in_month(year, month) {
        return Err(err());
    }
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(err)?;
    Ok((date - epoch()).num_days() as i32)
}

/// Parse a strict `YYYY-MM-DD HH:MM:SS` timestamp into microseconds since
/// the epoch.
pub fn parse_timestamp(text: &str) -> Result<i64> {
    let err = || invalid(text, "TIMESTAMP");
    // A bare date reads as midnight.
    if text.len() == 10 {
        return Ok(parse_date(text).map_err(|_| err())? as i64 * MICROS_PER_DAY);
    }
    let bytes = text.as_bytes();
    if bytes.len() != 19 || bytes[10] != b' ' || bytes[13] != b':' || bytes[16] != b':' {
        return Err(err());
    }
    let days = parse_date(&text[0..10]).map_err(|_| err())? as i64;
    let hour = parse_fixed_digits(&text[11..13], 2).ok_or_else(err)?;
    let minute = parse_fixed_digits(&text[14..16], 2).ok_or_else(err)?;
    let second = parse_fixed_digits(&text[17..19], 2).ok_or_else(err)?;
    if hour > 23 || minute > 59 || second > 59 {
        return Err(err());
    }
    let time = hour as i64 * MICROS_PER_HOUR
        + minute as i64 * MICROS_PER_MINUTE
        + second as i64 * MICROS_PER_SEC;
    Ok(days * MICROS_PER_DAY + time)
}

pub fn format_date(days: i32) -> String {
    let date = epoch() + chrono::Duration::days(days as i64);
    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
}

pub fn format_timestamp(micros: i64) -> String {
    let days = micros.div_euclid(MICROS_PER_DAY);
    let mut rem = micros.rem_euclid(MICROS_PER_DAY);
    let hour = rem / MICROS_PER_HOUR;
    rem %= MICROS_PER_HOUR;
    let minute = rem / MICROS_PER_MINUTE;
    rem %= MICROS_PER_MINUTE;
    let second = rem / MICROS_PER_SEC;
    format!(
        "{} {:02}:{:02}:{:02}",
        format_date(days as i32),
        hour,
        minute,
        second
    )
}

/// A decomposed interval, the result of `age()`. Months and days are kept
/// separate because a month has no fixed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub micros: i64,
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let years = self.months / 12;
        let months = self.months % 12;
        let mut parts = Vec::new();
        if years != 0 {
            parts.push(format!("{} year{}", years, if years.abs() == 1 { "" } else { "s" }));
        }
        if months != 0 {
            parts.push(format!("{} mon{}", months, if months.abs() == 1 { "" } else { "s" }));
        }
        if self.days != 0 {
            parts.push(format!("{} day{}", self.days, if self.days.abs() == 1 { "" } else { "s" }));
        }
        if self.micros != 0 || parts.is_empty() {
            let sign = if self.micros < 0 { "-" } else { "" };
            let abs = self.micros.abs();
            parts.push(format!(
                "{}{:02}:{:02}:{:02}",
                sign,
                abs / MICROS_PER_HOUR,
                (abs % MICROS_PER_HOUR) / MICROS_PER_MINUTE,
                (abs % MICROS_PER_MINUTE) / MICROS_PER_SEC
            ));
        }
        write!(f, "{}", parts.join(" "))
    }
}

struct Fields {
    year: i32,
    month: i32,
    day: i32,
    time: i64,
}

fn decompose(micros: i64) -> Fields {
    let days = micros.div_euclid(MICROS_PER_DAY);
    let time = micros.rem_euclid(MICROS_PER_DAY);
    let date = epoch() + chrono::Duration::days(days);
    Fields {
        year: date.year(),
        month: date.month() as i32,
        day: date.day() as i32,
        time,
    }
}

/// Symbolic timestamp difference `a - b`, with months borrowing from years
/// and days borrowing from months using the source month's length. Signs
/// follow the difference as a whole.
pub fn age(a: i64, b: i64) -> Interval {
    let negate = a < b;
    let fa = decompose(a);
    let fb = decompose(b);

    let mut year = fa.year - fb.year;
    let mut month = fa.month - fb.month;
    let mut day = fa.day - fb.day;
    let mut time = fa.time - fb.time;
    if negate {
        year = -year;
        month = -month;
        day = -day;
        time = -time;
    }

    while time < 0 {
        time += MICROS_PER_DAY;
        day -= 1;
    }
    while day < 0 {
        // Borrow a month's worth of days from the earlier operand's month.
        let src = if negate { &fa } else { &fb };
        day += days_in_month(src.year, src.month as u32) as i32;
        month -= 1;
    }
    while month < 0 {
        month += 12;
        year -= 1;
    }

    let sign = if negate { -1 } else { 1 };
    Interval {
        months: sign * (year * 12 + month),
        days: sign * day,
        micros: sign as i64 * time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_date_parsing() {
        assert!(parse_date("1992-02-29").is_ok());
        assert!(parse_date("1900-02-29").is_err());
        assert!(parse_date("1993-02-29").is_err());
        assert!(parse_date("2000-02-29").is_ok());
        assert!(parse_date("1992-13-01").is_err());
        assert!(parse_date("1992-00-10").is_err());
        assert!(parse_date("1992/02/20").is_err());
        assert!(parse_date("92-02-20").is_err());
        assert!(parse_date("1992-2-20").is_err());
    }

    #[test]
    fn strict_timestamp_parsing() {
        assert!(parse_timestamp("2008-01-01 00:00:01").is_ok());
        assert!(parse_timestamp("2008-01-01T00:00:01").is_err());
        assert!(parse_timestamp("2008-01-01 24:00:00").is_err());
        assert!(parse_timestamp("2008-01-01 12:60:00").is_err());
        assert!(parse_timestamp("2008-01-01 12:00:61").is_err());
    }

    #[test]
    fn timestamp_round_trip() {
        for text in [
            "2008-01-01 00:00:01",
            "1969-12-31 23:59:59",
            "1992-02-29 12:30:45",
            "2019-07-11 11:00:00",
        ] {
            let micros = parse_timestamp(text).unwrap();
            assert_eq!(format_timestamp(micros), text);
        }
        assert_eq!(format_date(parse_date("1957-06-13").unwrap()), "1957-06-13");
    }

    #[test]
    fn age_decomposition() {
        let a = parse_timestamp("2001-04-10 00:00:00").unwrap();
        let b = parse_timestamp("1957-06-13 00:00:00").unwrap();
        assert_eq!(age(a, b).to_string(), "43 years 9 mons 27 days");

        let a = parse_timestamp("2019-06-11 12:00:00").unwrap();
        let b = parse_timestamp("2019-07-11 11:00:00").unwrap();
        assert_eq!(age(a, b).to_string(), "-29 days -23:00:00");
    }

    #[test]
    fn age_of_equal_timestamps_is_zero() {
        let t = parse_timestamp("2020-05-05 05:05:05").unwrap();
        assert_eq!(age(t, t).to_string(), "00:00:00");
    }

    #[test]
    fn age_is_antisymmetric_on_whole_months() {
        let a = parse_timestamp("2020-03-01 00:00:00").unwrap();
        let b = parse_timestamp("2020-01-01 00:00:00").unwrap();
        assert_eq!(age(a, b).to_string(), "2 mons");
        assert_eq!(age(b, a).to_string(), "-2 mons");
    }
}
