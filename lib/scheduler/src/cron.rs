//! Five-field cron expressions.
//!
//! The dialect is classic cron: `minute hour day-of-month month day-of-week`
//! plus the `@hourly`/`@daily`/`@weekly`/`@monthly`/`@yearly` aliases. Each
//! field accepts `*`, single values, `a-b` ranges, `a,b,c` lists, `*/n`
//! steps, and `a-b/n` ranged steps. Out-of-range values fail at parse time.
//!
//! Day-of-month and day-of-week compose the vixie way: when both fields are
//! restricted (neither starts with `*`), a day matches if either does;
//! otherwise both must match.
//!
//! Next-fire evaluation works in the schedule's wall-clock timezone. A fire
//! time swallowed by a DST spring-forward gap moves to the first instant
//! after the gap; a time repeated by fall-back fires only on its first
//! occurrence.

use crate::error::ScheduleError;
use chrono::{
    DateTime, Datelike, Days, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Timelike,
    Utc,
};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;

/// How far next-fire evaluation scans before concluding the expression
/// never matches (e.g. February 30th). Covers a leap cycle.
const MAX_SCAN_DAYS: u64 = 366 * 4 + 1;

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    expression: String,
    minute: u64,
    hour: u64,
    dom: u64,
    month: u64,
    dow: u64,
    dom_star: bool,
    dow_star: bool,
}

fn bit(mask: u64, value: u8) -> bool {
    mask & (1 << value) != 0
}

impl CronExpr {
    /// Parses a cron expression or alias.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCronExpression` for malformed or out-of-range input.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expanded = match expression.trim() {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: format!("expected 5 fields, got {}", fields.len()),
            });
        }

        let err = |reason: String| ScheduleError::InvalidCronExpression {
            expression: expression.to_string(),
            reason,
        };

        let minute = parse_field(fields[0], 0, 59).map_err(&err)?;
        let hour = parse_field(fields[1], 0, 23).map_err(&err)?;
        let dom = parse_field(fields[2], 1, 31).map_err(&err)?;
        let month = parse_field(fields[3], 1, 12).map_err(&err)?;
        // Day-of-week admits 7 as a synonym for Sunday
        let mut dow = parse_field(fields[4], 0, 7).map_err(&err)?;
        if bit(dow, 7) {
            dow = (dow & !(1 << 7)) | 1;
        }

        Ok(Self {
            expression: expression.trim().to_string(),
            minute,
            hour,
            dom,
            month,
            dow,
            dom_star: fields[2].starts_with('*'),
            dow_star: fields[4].starts_with('*'),
        })
    }

    /// Returns whether the date part (month, DOM, DOW) matches.
    fn matches_date(&self, date: chrono::NaiveDate) -> bool {
        if !bit(self.month, date.month() as u8) {
            return false;
        }
        let dom_ok = bit(self.dom, date.day() as u8);
        let dow_ok = bit(self.dow, date.weekday().num_days_from_sunday() as u8);
        match (self.dom_star, self.dow_star) {
            (true, true) => true,
            (true, false) => dow_ok,
            (false, true) => dom_ok,
            (false, false) => dom_ok || dow_ok,
        }
    }

    /// Computes the smallest matching instant strictly after `after`,
    /// evaluated in `tz`.
    ///
    /// Returns `None` when the expression can never match (for example a
    /// day-of-month that exists in no month it names).
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&tz).naive_local();
        let start = local
            .with_second(0)?
            .with_nanosecond(0)?
            .checked_add_signed(Duration::minutes(1))?;
        let start_date = start.date();
        let start_time = start.time();

        for day_offset in 0..MAX_SCAN_DAYS {
            let date = start_date.checked_add_days(Days::new(day_offset))?;
            if !self.matches_date(date) {
                continue;
            }
            let floor = if day_offset == 0 {
                start_time
            } else {
                NaiveTime::MIN
            };
            for hour in 0..24u8 {
                if !bit(self.hour, hour) {
                    continue;
                }
                for minute in 0..60u8 {
                    if !bit(self.minute, minute) {
                        continue;
                    }
                    let time = NaiveTime::from_hms_opt(u32::from(hour), u32::from(minute), 0)?;
                    if time < floor {
                        continue;
                    }
                    let candidate = NaiveDateTime::new(date, time);
                    if let Some(instant) = resolve_local(candidate, tz) {
                        let instant = instant.with_timezone(&Utc);
                        if instant > after {
                            return Some(instant);
                        }
                    }
                }
            }
        }
        None
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

impl FromStr for CronExpr {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Maps a wall-clock time to an instant, handling DST transitions.
fn resolve_local(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        // Fall-back repeats the wall-clock hour; fire on the first pass only
        LocalResult::Ambiguous(first, _) => Some(first),
        LocalResult::None => {
            // Spring-forward swallowed this wall-clock minute; the fire
            // moves to the first instant after the gap. Transitions are at
            // most a few hours, so a bounded probe suffices.
            let mut probe = naive;
            for _ in 0..240 {
                probe = probe.checked_add_signed(Duration::minutes(1))?;
                match tz.from_local_datetime(&probe) {
                    LocalResult::Single(dt) => return Some(dt),
                    LocalResult::Ambiguous(first, _) => return Some(first),
                    LocalResult::None => {}
                }
            }
            None
        }
    }
}

fn parse_value(text: &str, min: u8, max: u8) -> Result<u8, String> {
    let value: u8 = text
        .parse()
        .map_err(|_| format!("'{text}' is not a number"))?;
    if value < min || value > max {
        return Err(format!("value {value} out of range {min}-{max}"));
    }
    Ok(value)
}

/// Parses one cron field into a bitmask of matching values.
fn parse_field(text: &str, min: u8, max: u8) -> Result<u64, String> {
    let mut bits: u64 = 0;
    for part in text.split(',') {
        if part.is_empty() {
            return Err("empty list item".to_string());
        }
        let (range_text, step) = match part.split_once('/') {
            Some((range_text, step_text)) => {
                let step: u8 = step_text
                    .parse()
                    .map_err(|_| format!("invalid step '{step_text}'"))?;
                if step == 0 {
                    return Err("step must be at least 1".to_string());
                }
                (range_text, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range_text == "*" {
            (min, max)
        } else if let Some((lo_text, hi_text)) = range_text.split_once('-') {
            let lo = parse_value(lo_text, min, max)?;
            let hi = parse_value(hi_text, min, max)?;
            if lo > hi {
                return Err(format!("range {lo}-{hi} is inverted"));
            }
            (lo, hi)
        } else {
            if step != 1 {
                return Err(format!("step requires a range, got '{part}'"));
            }
            let value = parse_value(range_text, min, max)?;
            (value, value)
        };

        let mut value = u16::from(lo);
        while value <= u16::from(hi) {
            bits |= 1 << value;
            value += u16::from(step);
        }
    }
    Ok(bits)
}
