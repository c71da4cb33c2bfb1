//! Sweep Scheduling
//!
//! The sweeper fires on a cron-like schedule. [`CronSchedule`] understands
//! the classic five fields, evaluated in UTC:
//!
//! ```text
//!  ┌───────────── minute        (0-59)
//!  │ ┌─────────── hour          (0-23)
//!  │ │ ┌───────── day of month  (1-31)
//!  │ │ │ ┌─────── month         (1-12)
//!  │ │ │ │ ┌───── day of week   (0-7, 0 and 7 are Sunday)
//!  │ │ │ │ │
//!  0 0 * * *      once a day at 00:00
//! ```
//!
//! Each field accepts `*`, `N`, `A-B`, `*/S`, `A-B/S`, `N/S` and comma
//! separated lists of those. When both day fields are restricted a day
//! matches if either one does.

use chrono::{DateTime, Datelike, NaiveDate, Timelike};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How far ahead `next_after` searches before giving up on a schedule that
/// can never fire (e.g. `0 0 30 2 *`).
const SEARCH_DAYS: usize = 366 * 9;

/// Errors from parsing a cron expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("expected 5 fields (minute hour day-of-month month day-of-week), got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minutes: u64,
    hours: u64,
    days: u64,
    months: u64,
    weekdays: u64,
    day_restricted: bool,
    weekday_restricted: bool,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
const WEEKDAY: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7 };

impl CronSchedule {
    /// Parses a cron expression such as `"0 0 * * *"`.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount(fields.len()));
        }

        let minutes = parse_field(fields[0], &MINUTE)?;
        let hours = parse_field(fields[1], &HOUR)?;
        let days = parse_field(fields[2], &DAY)?;
        let months = parse_field(fields[3], &MONTH)?;
        let mut weekdays = parse_field(fields[4], &WEEKDAY)?;

        // 7 is an alias for Sunday
        if weekdays & (1 << 7) != 0 {
            weekdays = (weekdays & !(1 << 7)) | 1;
        }

        Ok(Self {
            expr: fields.join(" "),
            minutes,
            hours,
            days,
            months,
            weekdays,
            day_restricted: !fields[2].starts_with('*'),
            weekday_restricted: !fields[4].starts_with('*'),
        })
    }

    /// Fires once a day at `hour:minute` UTC.
    pub fn daily_at(hour: u32, minute: u32) -> Self {
        let hour = hour.min(HOUR.max);
        let minute = minute.min(MINUTE.max);
        Self {
            expr: format!("{} {} * * *", minute, hour),
            minutes: 1 << minute,
            hours: 1 << hour,
            days: range_bits(DAY.min, DAY.max, 1),
            months: range_bits(MONTH.min, MONTH.max, 1),
            weekdays: range_bits(0, 6, 1),
            day_restricted: false,
            weekday_restricted: false,
        }
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// The first fire time strictly after `after` (both epoch seconds), or
    /// `None` if the expression never matches.
    pub fn next_after(&self, after: i64) -> Option<i64> {
        let start = DateTime::from_timestamp((after.div_euclid(60) + 1) * 60, 0)?;
        let first_day = start.date_naive();
        let first_minute = start.hour() * 60 + start.minute();

        for date in first_day.iter_days().take(SEARCH_DAYS) {
            if !self.matches_day(date) {
                continue;
            }
            let from = if date == first_day { first_minute } else { 0 };
            for hour in 0..24u32 {
                if self.hours & (1 << hour) == 0 {
                    continue;
                }
                for minute in 0..60u32 {
                    if self.minutes & (1 << minute) == 0 || hour * 60 + minute < from {
                        continue;
                    }
                    return Some(date.and_hms_opt(hour, minute, 0)?.and_utc().timestamp());
                }
            }
        }
        None
    }

    fn matches_day(&self, date: NaiveDate) -> bool {
        if self.months & (1 << date.month()) == 0 {
            return false;
        }
        let dom = self.days & (1 << date.day()) != 0;
        let dow = self.weekdays & (1 << date.weekday().num_days_from_sunday()) != 0;

        if self.day_restricted && self.weekday_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

fn range_bits(lo: u32, hi: u32, step: u32) -> u64 {
    (lo..=hi).step_by(step as usize).fold(0u64, |bits, v| bits | (1 << v))
}

fn parse_field(text: &str, spec: &FieldSpec) -> Result<u64, ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidField {
        field: spec.name,
        value: text.to_string(),
        reason,
    };
    let number = |s: &str| -> Result<u32, ScheduleError> {
        s.parse::<u32>()
            .map_err(|_| invalid(format!("'{}' is not a number", s)))
    };

    let mut bits = 0u64;
    for part in text.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(number(step)?)),
            None => (part, None),
        };
        if step == Some(0) {
            return Err(invalid("step must be positive".into()));
        }

        let (lo, hi) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (number(a)?, number(b)?)
        } else {
            let n = number(range)?;
            // N/S runs from N to the end of the field
            if step.is_some() {
                (n, spec.max)
            } else {
                (n, n)
            }
        };

        if lo < spec.min || hi > spec.max {
            return Err(invalid(format!(
                "out of range {}-{}",
                spec.min, spec.max
            )));
        }
        if lo > hi {
            return Err(invalid(format!("range start {} is after end {}", lo, hi)));
        }
        bits |= range_bits(lo, hi, step.unwrap_or(1));
    }
    Ok(bits)
}

/// When the expiry sweeper runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepSchedule {
    /// Wall-clock schedule, in UTC.
    Cron(CronSchedule),
    /// Fixed delay between runs.
    Interval(Duration),
}

impl Default for SweepSchedule {
    /// Once a day at midnight.
    fn default() -> Self {
        SweepSchedule::Cron(CronSchedule::daily_at(0, 0))
    }
}

impl SweepSchedule {
    pub fn cron(expr: &str) -> Result<Self, ScheduleError> {
        CronSchedule::parse(expr).map(SweepSchedule::Cron)
    }

    /// How long to wait from `now` (epoch seconds) until the next run.
    pub fn next_delay(&self, now: i64) -> Option<Duration> {
        match self {
            SweepSchedule::Cron(cron) => cron
                .next_after(now)
                .map(|at| Duration::from_secs((at - now).max(0) as u64)),
            SweepSchedule::Interval(every) => Some(*every),
        }
    }
}

impl fmt::Display for SweepSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepSchedule::Cron(cron) => write!(f, "{}", cron),
            SweepSchedule::Interval(every) => write!(f, "every {:?}", every),
        }
    }
}
