use std::io::{Read, Write};

use crate::errors::{Error, Result};
use crate::extio::{ExtendedRead, ExtendedWrite, Serialize};
use crate::time::{CalendarDate, Period};

/// A forecast time interval: start and end offsets from a reference date, in
/// the owning axis's time unit. Ordered by start, ties broken by end.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TimeInterval {
    pub start: i32,
    pub end: i32,
}

impl TimeInterval {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn length(self) -> i32 {
        self.end - self.start
    }

    pub fn shifted(self, offset: i32) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
        }
    }
}

/// A single time coordinate value: instantaneous offset or interval.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum TimeValue {
    Offset(i32),
    Interval(TimeInterval),
}

impl TimeValue {
    pub fn is_interval(self) -> bool {
        matches!(self, TimeValue::Interval(_))
    }

    pub fn shifted(self, offset: i32) -> Self {
        match self {
            TimeValue::Offset(off) => TimeValue::Offset(off + offset),
            TimeValue::Interval(intv) => TimeValue::Interval(intv.shifted(offset)),
        }
    }
}

/// Instantaneous forecast-time axis: distinct integer offsets from one
/// reference date, ascending.
///
/// A "Best" axis additionally carries `time2runtime`: for each time, the
/// 1-based index into the master runtime of the run that supplies it (0 =
/// missing).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CoordinateTime {
    code: u8,
    period: Period,
    ref_date: CalendarDate,
    offsets: Vec<i32>,
    time2runtime: Option<Vec<u32>>,
}

impl CoordinateTime {
    pub(crate) fn new(code: u8, period: Period, ref_date: CalendarDate, offsets: Vec<i32>) -> Self {
        debug_assert!(offsets.windows(2).all(|w| w[0] < w[1]));

        Self {
            code,
            period,
            ref_date,
            offsets,
            time2runtime: None,
        }
    }

    pub(crate) fn with_time2runtime(mut self, time2runtime: Vec<u32>) -> Self {
        debug_assert_eq!(time2runtime.len(), self.offsets.len());
        self.time2runtime = Some(time2runtime);
        self
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn ref_date(&self) -> CalendarDate {
        self.ref_date
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[i32] {
        &self.offsets
    }

    pub fn value(&self, idx: usize) -> i32 {
        self.offsets[idx]
    }

    pub fn index(&self, offset: i32) -> Option<usize> {
        self.offsets.binary_search(&offset).ok()
    }

    pub fn time2runtime(&self) -> Option<&[u32]> {
        self.time2runtime.as_deref()
    }
}

/// Interval forecast-time axis, ascending by start then end.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CoordinateTimeIntv {
    code: u8,
    period: Period,
    ref_date: CalendarDate,
    intervals: Vec<TimeInterval>,
    time2runtime: Option<Vec<u32>>,
}

impl CoordinateTimeIntv {
    pub(crate) fn new(
        code: u8,
        period: Period,
        ref_date: CalendarDate,
        intervals: Vec<TimeInterval>,
    ) -> Self {
        debug_assert!(intervals.windows(2).all(|w| w[0] < w[1]));

        Self {
            code,
            period,
            ref_date,
            intervals,
            time2runtime: None,
        }
    }

    pub(crate) fn with_time2runtime(mut self, time2runtime: Vec<u32>) -> Self {
        debug_assert_eq!(time2runtime.len(), self.intervals.len());
        self.time2runtime = Some(time2runtime);
        self
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn ref_date(&self) -> CalendarDate {
        self.ref_date
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> &[TimeInterval] {
        &self.intervals
    }

    pub fn value(&self, idx: usize) -> TimeInterval {
        self.intervals[idx]
    }

    pub fn index(&self, intv: TimeInterval) -> Option<usize> {
        self.intervals.binary_search(&intv).ok()
    }

    pub fn time2runtime(&self) -> Option<&[u32]> {
        self.time2runtime.as_deref()
    }

    /// Name of the common interval length, or "mixed intervals" when the
    /// lengths differ.
    pub fn interval_name(&self) -> String {
        let mut lengths = self.intervals.iter().map(|intv| intv.length());
        match lengths.next() {
            None => String::from("none"),
            Some(first) if lengths.all(|len| len == first) => {
                format!("{first} {}", self.period.unit.label())
            }
            Some(_) => String::from("mixed intervals"),
        }
    }
}

fn write_time2runtime(
    stream: &mut impl Write,
    time2runtime: &Option<Vec<u32>>,
) -> Result<()> {
    match time2runtime {
        None => stream.write_byte(0)?,
        Some(map) => {
            stream.write_byte(1)?;
            for &idx in map {
                stream.write_varint(idx as u64)?;
            }
        }
    }

    Ok(())
}

fn read_time2runtime(stream: &mut impl Read, n: usize) -> Result<Option<Vec<u32>>> {
    match stream.read_byte()? {
        0 => Ok(None),
        1 => {
            let mut map = Vec::with_capacity(n);
            for _ in 0..n {
                map.push(stream.read_varint()? as u32);
            }
            Ok(Some(map))
        }
        other => Err(Error::Corrupt(format!("bad time2runtime tag {other}"))),
    }
}

impl Serialize for CoordinateTime {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_byte(self.code)?;
        self.period.write_to(stream)?;
        self.ref_date.write_to(stream)?;
        stream.write_varint(self.offsets.len() as u64)?;
        for &offset in &self.offsets {
            stream.write_varint_signed(offset as i64)?;
        }
        write_time2runtime(stream, &self.time2runtime)?;

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        let code = stream.read_byte()?;
        let period = Period::read_from(stream)?;
        let ref_date = CalendarDate::read_from(stream)?;
        let n = stream.read_varint()? as usize;
        let mut offsets = Vec::with_capacity(n);
        for _ in 0..n {
            offsets.push(stream.read_varint_signed()? as i32);
        }
        let time2runtime = read_time2runtime(stream, n)?;

        Ok(Self {
            code,
            period,
            ref_date,
            offsets,
            time2runtime,
        })
    }
}

impl Serialize for CoordinateTimeIntv {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_byte(self.code)?;
        self.period.write_to(stream)?;
        self.ref_date.write_to(stream)?;
        stream.write_varint(self.intervals.len() as u64)?;
        for intv in &self.intervals {
            stream.write_varint_signed(intv.start as i64)?;
            stream.write_varint_signed(intv.end as i64)?;
        }
        write_time2runtime(stream, &self.time2runtime)?;

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        let code = stream.read_byte()?;
        let period = Period::read_from(stream)?;
        let ref_date = CalendarDate::read_from(stream)?;
        let n = stream.read_varint()? as usize;
        let mut intervals = Vec::with_capacity(n);
        for _ in 0..n {
            let start = stream.read_varint_signed()? as i32;
            let end = stream.read_varint_signed()? as i32;
            intervals.push(TimeInterval::new(start, end));
        }
        let time2runtime = read_time2runtime(stream, n)?;

        Ok(Self {
            code,
            period,
            ref_date,
            intervals,
            time2runtime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeUnit;
    use std::io::Cursor;

    fn time_axis(offsets: Vec<i32>) -> CoordinateTime {
        CoordinateTime::new(1, Period::hour(), CalendarDate::from_millis(0), offsets)
    }

    #[test]
    fn test_index_lookup() {
        let axis = time_axis(vec![0, 6, 12]);
        assert_eq!(axis.index(6), Some(1));
        assert_eq!(axis.index(7), None);
        assert_eq!(axis.value(2), 12);
    }

    #[test]
    fn test_interval_ordering_and_name() {
        let intervals = vec![
            TimeInterval::new(0, 6),
            TimeInterval::new(0, 12),
            TimeInterval::new(6, 12),
        ];
        let axis = CoordinateTimeIntv::new(
            11,
            Period::hour(),
            CalendarDate::from_millis(0),
            intervals,
        );
        assert_eq!(axis.index(TimeInterval::new(0, 12)), Some(1));
        assert_eq!(axis.interval_name(), "mixed intervals");

        let uniform = CoordinateTimeIntv::new(
            11,
            Period::hour(),
            CalendarDate::from_millis(0),
            vec![TimeInterval::new(0, 6), TimeInterval::new(6, 12)],
        );
        assert_eq!(uniform.interval_name(), "6 hour");
    }

    #[test]
    fn test_serialize_round_trip() -> Result<()> {
        let axis = time_axis(vec![-3, 0, 6, 12]).with_time2runtime(vec![1, 1, 2, 0]);
        let mut buffer = Vec::new();
        axis.write_to(&mut buffer)?;
        assert_eq!(CoordinateTime::read_from(&mut Cursor::new(buffer))?, axis);

        let intv = CoordinateTimeIntv::new(
            11,
            Period::new(6, TimeUnit::Hour),
            CalendarDate::from_millis(3_600_000),
            vec![TimeInterval::new(-6, 0), TimeInterval::new(0, 6)],
        );
        let mut buffer = Vec::new();
        intv.write_to(&mut buffer)?;
        assert_eq!(CoordinateTimeIntv::read_from(&mut Cursor::new(buffer))?, intv);

        Ok(())
    }
}
