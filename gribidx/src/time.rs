//! Calendar instants and integer period arithmetic.
//!
//! Runtimes are UTC instants at millisecond resolution. Time coordinates are
//! integer multiples of a `Period` from a reference date, so all offset math
//! must divide evenly; a fractional distance is a data error, not something
//! to truncate.

use std::fmt;
use std::io::{Read, Write};

use chrono::{DateTime, Datelike, Months, TimeZone, Timelike, Utc};

use crate::errors::{Error, Result};
use crate::extio::{ExtendedRead, ExtendedWrite, Serialize};

/// A UTC instant with millisecond resolution.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDate(i64);

impl CalendarDate {
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Construct from year/month/day/hour, all UTC.
    pub fn of(year: i32, month: u32, day: u32, hour: u32) -> Result<Self> {
        let date = Utc
            .with_ymd_and_hms(year, month, day, hour, 0, 0)
            .single()
            .ok_or_else(|| Error::TimeRange(format!("{year}-{month}-{day}T{hour}Z")))?;

        Ok(Self(date.timestamp_millis()))
    }

    pub fn millis(self) -> i64 {
        self.0
    }

    pub fn hour_of_day(self) -> u32 {
        match self.datetime() {
            Ok(date) => date.hour(),
            Err(_) => 0,
        }
    }

    fn datetime(self) -> Result<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0)
            .single()
            .ok_or_else(|| Error::TimeRange(format!("{}ms", self.0)))
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.datetime() {
            Ok(date) if self.0 % 1000 == 0 => write!(f, "{}", date.format("%Y-%m-%dT%H:%M:%SZ")),
            Ok(date) => write!(f, "{}", date.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            Err(_) => write!(f, "{}ms", self.0),
        }
    }
}

impl fmt::Debug for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for CalendarDate {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_varint_signed(self.0)?;

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        Ok(Self(stream.read_varint_signed()?))
    }
}

/// GRIB time unit (code table 4.4). Month and year are calendar units; the
/// rest are fixed spans.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Month,
    Year,
    Hour3,
    Hour6,
    Hour12,
    Second,
}

impl TimeUnit {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TimeUnit::Minute),
            1 => Some(TimeUnit::Hour),
            2 => Some(TimeUnit::Day),
            3 => Some(TimeUnit::Month),
            4 => Some(TimeUnit::Year),
            10 => Some(TimeUnit::Hour3),
            11 => Some(TimeUnit::Hour6),
            12 => Some(TimeUnit::Hour12),
            13 => Some(TimeUnit::Second),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            TimeUnit::Minute => 0,
            TimeUnit::Hour => 1,
            TimeUnit::Day => 2,
            TimeUnit::Month => 3,
            TimeUnit::Year => 4,
            TimeUnit::Hour3 => 10,
            TimeUnit::Hour6 => 11,
            TimeUnit::Hour12 => 12,
            TimeUnit::Second => 13,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Month => "month",
            TimeUnit::Year => "year",
            TimeUnit::Hour3 => "3 hours",
            TimeUnit::Hour6 => "6 hours",
            TimeUnit::Hour12 => "12 hours",
            TimeUnit::Second => "second",
        }
    }

    fn span(self) -> Span {
        match self {
            TimeUnit::Second => Span::Millis(1_000),
            TimeUnit::Minute => Span::Millis(60_000),
            TimeUnit::Hour => Span::Millis(3_600_000),
            TimeUnit::Hour3 => Span::Millis(3 * 3_600_000),
            TimeUnit::Hour6 => Span::Millis(6 * 3_600_000),
            TimeUnit::Hour12 => Span::Millis(12 * 3_600_000),
            TimeUnit::Day => Span::Millis(24 * 3_600_000),
            TimeUnit::Month => Span::Months(1),
            TimeUnit::Year => Span::Months(12),
        }
    }
}

/// The extent of one time unit: a fixed span or a calendar month count.
enum Span {
    Millis(i64),
    Months(i64),
}

/// A time duration: some number of a `TimeUnit`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Period {
    pub value: u32,
    pub unit: TimeUnit,
}

impl Period {
    pub fn new(value: u32, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn hour() -> Self {
        Self::new(1, TimeUnit::Hour)
    }

    /// The exact number of periods from `start` to `end` (negative when `end`
    /// precedes `start`). A distance that is not a whole number of periods is
    /// an error.
    pub fn offset_between(&self, start: CalendarDate, end: CalendarDate) -> Result<i64> {
        let fractional = || Error::FractionalOffset {
            start: start.millis(),
            end: end.millis(),
            period: self.to_string(),
        };

        match self.unit.span() {
            Span::Millis(unit_millis) => {
                let span = unit_millis * self.value as i64;
                let diff = end.millis() - start.millis();
                if diff % span != 0 {
                    return Err(fractional());
                }
                Ok(diff / span)
            }
            Span::Months(unit_months) => {
                // Count months between the field values, then verify the
                // distance is exact.
                let months_per = unit_months * self.value as i64;
                let from = start.datetime()?;
                let to = end.datetime()?;
                let months = (to.year() as i64 * 12 + to.month0() as i64)
                    - (from.year() as i64 * 12 + from.month0() as i64);
                if months % months_per != 0 || add_months(from, months)? != to {
                    return Err(fractional());
                }
                Ok(months / months_per)
            }
        }
    }

    /// `date` plus `n` periods; the inverse of `offset_between`.
    pub fn added_to(&self, date: CalendarDate, n: i64) -> Result<CalendarDate> {
        let out_of_range = || Error::TimeRange(format!("{date} + {n} x {self}"));

        match self.unit.span() {
            Span::Millis(unit_millis) => {
                let span = unit_millis * self.value as i64;
                let millis = n
                    .checked_mul(span)
                    .and_then(|d| date.millis().checked_add(d))
                    .ok_or_else(out_of_range)?;
                Ok(CalendarDate::from_millis(millis))
            }
            Span::Months(unit_months) => {
                let months = n
                    .checked_mul(unit_months * self.value as i64)
                    .ok_or_else(out_of_range)?;
                let result = add_months(date.datetime()?, months)?;
                Ok(CalendarDate::from_millis(result.timestamp_millis()))
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value == 1 {
            write!(f, "{}", self.unit.label())
        } else {
            write!(f, "{} {}s", self.value, self.unit.label())
        }
    }
}

impl Serialize for Period {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_varint(self.value as u64)?;
        stream.write_byte(self.unit.code())?;

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        let value = stream.read_varint()? as u32;
        let code = stream.read_byte()?;
        let unit = TimeUnit::from_code(code)
            .ok_or_else(|| Error::Corrupt(format!("unknown time unit code {code}")))?;

        Ok(Self { value, unit })
    }
}

fn add_months(date: DateTime<Utc>, months: i64) -> Result<DateTime<Utc>> {
    let out_of_range = || Error::TimeRange(format!("{date} + {months} months"));
    let magnitude = Months::new(months.unsigned_abs().try_into().map_err(|_| out_of_range())?);
    if months >= 0 {
        date.checked_add_months(magnitude).ok_or_else(out_of_range)
    } else {
        date.checked_sub_months(magnitude).ok_or_else(out_of_range)
    }
}
