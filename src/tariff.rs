//! Time-of-day tariff
//!
//! Picks the active price per kWh from a night window and the wall clock, and
//! provides the clock source shared with the seasonal heuristic.

use crate::error::Result;
use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// How the current time is compared against the window endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowComparison {
    /// Endpoint hour and minute are each compared independently against now
    #[default]
    Literal,

    /// Conventional half-open clock interval, wrapping past midnight
    ClockRange,
}

/// Night window and the two prices it selects between
#[derive(Debug, Clone, PartialEq)]
pub struct TariffWindow {
    pub night_start: NaiveTime,
    pub night_end: NaiveTime,
    pub day_rate: f64,
    pub night_rate: f64,
    pub comparison: WindowComparison,
}

/// Parse an "HH:MM" time of day
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    Ok(NaiveTime::parse_from_str(value.trim(), "%H:%M")?)
}

/// True when both the hour and the minute of `time` are at or after those of `now`.
///
/// This is not a clock comparison: 01:10 is not "past" 00:20 because 10 < 20.
pub fn past_this_time(time: NaiveTime, now: NaiveTime) -> bool {
    time.hour() >= now.hour() && time.minute() >= now.minute()
}

impl TariffWindow {
    /// Whether the discounted price applies at `now`
    pub fn is_night(&self, now: NaiveTime) -> bool {
        match self.comparison {
            WindowComparison::Literal => {
                past_this_time(self.night_start, now) && !past_this_time(self.night_end, now)
            }
            WindowComparison::ClockRange => {
                let now = now.with_second(0).unwrap_or(now).with_nanosecond(0).unwrap_or(now);
                if self.night_start <= self.night_end {
                    self.night_start <= now && now < self.night_end
                } else {
                    now >= self.night_start || now < self.night_end
                }
            }
        }
    }

    /// Active price per kWh at `now`
    pub fn price(&self, now: NaiveTime) -> f64 {
        if self.is_night(now) {
            self.night_rate
        } else {
            self.day_rate
        }
    }
}

/// Wall clock in the installation's timezone
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;

    /// Local time of day
    fn time_of_day(&self) -> NaiveTime {
        self.now().time()
    }

    /// Day of the month, used to recognise "today" in the seasonal heuristic
    fn day_of_month(&self) -> u32 {
        self.now().day()
    }
}

/// System clock converted to a fixed timezone
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}

/// Manually advanced clock for replaying recorded data and for tests
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Tz>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Tz>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Tz>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Tz> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
