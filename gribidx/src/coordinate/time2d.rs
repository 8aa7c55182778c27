//! The composite runtime x time axis.
//!
//! Each forecast run carries its own time axis, with offsets relative to that
//! run. The run's integer `offset` from the first runtime (in the time unit)
//! rebases per-run offsets onto a shared epoch when a single valid-time view
//! is needed.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use crate::errors::{Error, Result};
use crate::extio::{ExtendedRead, ExtendedWrite, Serialize};
use crate::time::{CalendarDate, Period};

use super::runtime::CoordinateRuntime;
use super::time::{CoordinateTime, CoordinateTimeIntv, TimeValue};

/// A per-run time axis: instantaneous offsets or intervals.
#[derive(Clone, PartialEq, Debug)]
pub enum TimeAxis {
    Time(CoordinateTime),
    Intv(CoordinateTimeIntv),
}

impl TimeAxis {
    pub fn is_interval(&self) -> bool {
        matches!(self, TimeAxis::Intv(_))
    }

    pub fn len(&self) -> usize {
        match self {
            TimeAxis::Time(axis) => axis.len(),
            TimeAxis::Intv(axis) => axis.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn code(&self) -> u8 {
        match self {
            TimeAxis::Time(axis) => axis.code(),
            TimeAxis::Intv(axis) => axis.code(),
        }
    }

    pub fn period(&self) -> Period {
        match self {
            TimeAxis::Time(axis) => axis.period(),
            TimeAxis::Intv(axis) => axis.period(),
        }
    }

    pub fn ref_date(&self) -> CalendarDate {
        match self {
            TimeAxis::Time(axis) => axis.ref_date(),
            TimeAxis::Intv(axis) => axis.ref_date(),
        }
    }

    pub fn value(&self, idx: usize) -> TimeValue {
        match self {
            TimeAxis::Time(axis) => TimeValue::Offset(axis.value(idx)),
            TimeAxis::Intv(axis) => TimeValue::Interval(axis.value(idx)),
        }
    }

    pub fn index(&self, value: TimeValue) -> Option<usize> {
        match (self, value) {
            (TimeAxis::Time(axis), TimeValue::Offset(off)) => axis.index(off),
            (TimeAxis::Intv(axis), TimeValue::Interval(intv)) => axis.index(intv),
            _ => None,
        }
    }

    pub fn values(&self) -> Vec<TimeValue> {
        (0..self.len()).map(|i| self.value(i)).collect()
    }

    pub fn time2runtime(&self) -> Option<&[u32]> {
        match self {
            TimeAxis::Time(axis) => axis.time2runtime(),
            TimeAxis::Intv(axis) => axis.time2runtime(),
        }
    }

    /// Build an axis of this kind from a sorted unique value set.
    pub(crate) fn from_values(
        is_interval: bool,
        code: u8,
        period: Period,
        ref_date: CalendarDate,
        values: Vec<TimeValue>,
    ) -> Self {
        if is_interval {
            let intervals = values
                .into_iter()
                .filter_map(|v| match v {
                    TimeValue::Interval(intv) => Some(intv),
                    TimeValue::Offset(_) => None,
                })
                .collect();
            TimeAxis::Intv(CoordinateTimeIntv::new(code, period, ref_date, intervals))
        } else {
            let offsets = values
                .into_iter()
                .filter_map(|v| match v {
                    TimeValue::Offset(off) => Some(off),
                    TimeValue::Interval(_) => None,
                })
                .collect();
            TimeAxis::Time(CoordinateTime::new(code, period, ref_date, offsets))
        }
    }
}

impl Serialize for TimeAxis {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        match self {
            TimeAxis::Time(axis) => {
                stream.write_byte(0)?;
                axis.write_to(stream)?;
            }
            TimeAxis::Intv(axis) => {
                stream.write_byte(1)?;
                axis.write_to(stream)?;
            }
        }

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        match stream.read_byte()? {
            0 => Ok(TimeAxis::Time(CoordinateTime::read_from(stream)?)),
            1 => Ok(TimeAxis::Intv(CoordinateTimeIntv::read_from(stream)?)),
            other => Err(Error::Corrupt(format!("bad time axis tag {other}"))),
        }
    }
}

/// Storage for the per-run time axes.
///
/// Orthogonal: every run has the same offsets, one shared axis. Regular: the
/// offsets depend only on the run's hour of day (00Z runs alike, 06Z runs
/// alike, ...), one axis per hour. Irregular: one axis per run.
#[derive(Clone, PartialEq, Debug)]
pub enum Time2DTimes {
    Irregular(Vec<TimeAxis>),
    Orthogonal(Box<TimeAxis>),
    Regular(BTreeMap<u32, TimeAxis>),
}

#[derive(Clone, Debug)]
pub struct CoordinateTime2D {
    runtime: CoordinateRuntime,
    times: Time2DTimes,
    /// Exact per-run inventories, available while building. Not serialized:
    /// the compact storage stands in after a read, where orthogonal storage
    /// treats every run as carrying the full union.
    build_times: Option<Vec<TimeAxis>>,
    offsets: Vec<i64>,
    period: Period,
    is_interval: bool,
    ntimes: usize,
}

/// The transient per-run inventory never participates in equality; two axes
/// that serialize identically are equal.
impl PartialEq for CoordinateTime2D {
    fn eq(&self, other: &Self) -> bool {
        self.runtime == other.runtime
            && self.times == other.times
            && self.offsets == other.offsets
            && self.period == other.period
            && self.is_interval == other.is_interval
            && self.ntimes == other.ntimes
    }
}

impl CoordinateTime2D {
    /// Assemble from a runtime axis and one finished time axis per run (in
    /// runtime order). Computes each run's offset from the first date and
    /// classifies the per-run axes as orthogonal, regular, or irregular.
    pub(crate) fn new(runtime: CoordinateRuntime, per_run: Vec<TimeAxis>) -> Result<Self> {
        debug_assert_eq!(runtime.len(), per_run.len());

        let is_interval = per_run.first().map(|t| t.is_interval()).unwrap_or(false);
        let period = per_run
            .first()
            .map(|t| t.period())
            .unwrap_or_else(|| runtime.period());
        let ntimes = per_run.iter().map(|t| t.len()).max().unwrap_or(0);

        let mut offsets = Vec::with_capacity(runtime.len());
        if let Some(first_date) = runtime.first_date() {
            for idx in 0..runtime.len() {
                offsets.push(period.offset_between(first_date, runtime.date(idx))?);
            }
        }

        let build_times = per_run.clone();
        let times = classify(&runtime, per_run);

        Ok(Self {
            runtime,
            times,
            build_times: Some(build_times),
            offsets,
            period,
            is_interval,
            ntimes,
        })
    }

    pub fn runtime(&self) -> &CoordinateRuntime {
        &self.runtime
    }

    pub fn nruns(&self) -> usize {
        self.runtime.len()
    }

    pub fn ntimes(&self) -> usize {
        self.ntimes
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.nruns(), self.ntimes]
    }

    pub fn is_interval(&self) -> bool {
        self.is_interval
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn is_orthogonal(&self) -> bool {
        matches!(self.times, Time2DTimes::Orthogonal(_))
    }

    pub fn is_regular(&self) -> bool {
        matches!(self.times, Time2DTimes::Regular(_))
    }

    /// Offset of run `idx` from the first date, in time units.
    pub fn offset(&self, idx: usize) -> i64 {
        self.offsets[idx]
    }

    pub fn offsets(&self) -> &[i64] {
        &self.offsets
    }

    /// The time axis covering run `idx`, with storage semantics: orthogonal
    /// and regular storages answer for every run they cover. Time indices in
    /// a sparse array follow this axis.
    pub fn time_coordinate(&self, run_idx: usize) -> Option<&TimeAxis> {
        match &self.times {
            Time2DTimes::Irregular(axes) => axes.get(run_idx),
            Time2DTimes::Orthogonal(axis) => Some(axis),
            Time2DTimes::Regular(by_hour) => {
                by_hour.get(&self.runtime.date(run_idx).hour_of_day())
            }
        }
    }

    /// What run `idx` actually recorded: the exact build-time inventory when
    /// still available, the storage axis otherwise.
    pub fn inventory(&self, run_idx: usize) -> Option<&TimeAxis> {
        match &self.build_times {
            Some(times) => times.get(run_idx),
            None => self.time_coordinate(run_idx),
        }
    }

    /// (run index, time index) for a run instant and run-relative time value.
    pub fn index2d(&self, run_millis: i64, value: TimeValue) -> Option<(usize, usize)> {
        let run_idx = self.runtime.index(run_millis)?;
        let time_idx = self.time_coordinate(run_idx)?.index(value)?;

        Some((run_idx, time_idx))
    }

    /// Sorted union of the raw (run-relative) time values across all runs.
    pub fn unique_values(&self) -> Vec<TimeValue> {
        let mut set = BTreeSet::new();
        for run_idx in 0..self.nruns() {
            if let Some(axis) = self.inventory(run_idx) {
                set.extend(axis.values());
            }
        }

        set.into_iter().collect()
    }

    /// First and last valid instant covered by any run.
    pub fn valid_time_range(&self) -> Result<Option<(CalendarDate, CalendarDate)>> {
        let mut range: Option<(CalendarDate, CalendarDate)> = None;
        for run_idx in 0..self.nruns() {
            let axis = match self.inventory(run_idx) {
                Some(axis) if !axis.is_empty() => axis,
                _ => continue,
            };
            let run_date = self.runtime.date(run_idx);
            let first = match axis.value(0) {
                TimeValue::Offset(off) => off,
                TimeValue::Interval(intv) => intv.start,
            };
            let last = match axis.value(axis.len() - 1) {
                TimeValue::Offset(off) => off,
                TimeValue::Interval(intv) => intv.end,
            };
            let start = self.period.added_to(run_date, first as i64)?;
            let end = self.period.added_to(run_date, last as i64)?;
            range = Some(match range {
                None => (start, end),
                Some((lo, hi)) => (lo.min(start), hi.max(end)),
            });
        }

        Ok(range)
    }

    /// Derive the "Best" single valid-time axis: the union, across runs, of
    /// run-offset plus run-relative value, where each valid time is owned by
    /// the latest run that produced it. The ownership map is recorded as
    /// `time2runtime`: 1-based indexes into `master` (0 = missing).
    pub fn make_best(&self, master: &CoordinateRuntime) -> Result<TimeAxis> {
        let mut values: BTreeSet<TimeValue> = BTreeSet::new();
        for run_idx in 0..self.nruns() {
            let shift = self.run_shift(run_idx)?;
            if let Some(axis) = self.inventory(run_idx) {
                for value in axis.values() {
                    values.insert(value.shifted(shift));
                }
            }
        }
        let sorted: Vec<TimeValue> = values.into_iter().collect();
        let positions: BTreeMap<TimeValue, usize> =
            sorted.iter().enumerate().map(|(i, &v)| (v, i)).collect();

        // Later runs override earlier ones at shared valid times.
        let mut time2runtime = vec![0u32; sorted.len()];
        for run_idx in 0..self.nruns() {
            let run_millis = self.runtime.date(run_idx).millis();
            let master_idx = master.index(run_millis).ok_or_else(|| {
                Error::Merge(format!(
                    "run {} missing from master runtime",
                    self.runtime.date(run_idx)
                ))
            })?;
            let shift = self.run_shift(run_idx)?;
            if let Some(axis) = self.inventory(run_idx) {
                for value in axis.values() {
                    if let Some(&pos) = positions.get(&value.shifted(shift)) {
                        time2runtime[pos] = master_idx as u32 + 1;
                    }
                }
            }
        }

        let ref_date = self
            .runtime
            .first_date()
            .unwrap_or(CalendarDate::from_millis(0));
        let code = self
            .time_coordinate(0)
            .map(|axis| axis.code())
            .unwrap_or_default();
        let axis = TimeAxis::from_values(self.is_interval, code, self.period, ref_date, sorted);

        Ok(match axis {
            TimeAxis::Time(time) => TimeAxis::Time(time.with_time2runtime(time2runtime)),
            TimeAxis::Intv(intv) => TimeAxis::Intv(intv.with_time2runtime(time2runtime)),
        })
    }

    fn run_shift(&self, run_idx: usize) -> Result<i32> {
        let offset = self.offsets[run_idx];
        i32::try_from(offset)
            .map_err(|_| Error::TimeRange(format!("run offset {offset} overflows")))
    }
}

/// Pick the most compact storage the per-run axes allow.
fn classify(runtime: &CoordinateRuntime, per_run: Vec<TimeAxis>) -> Time2DTimes {
    if let Some(axis) = test_orthogonal(per_run.iter()) {
        return Time2DTimes::Orthogonal(Box::new(axis));
    }

    if per_run.len() > 1 {
        let mut by_hour: BTreeMap<u32, Vec<&TimeAxis>> = BTreeMap::new();
        for (idx, axis) in per_run.iter().enumerate() {
            by_hour
                .entry(runtime.date(idx).hour_of_day())
                .or_default()
                .push(axis);
        }
        let mut regular = BTreeMap::new();
        let mut is_regular = by_hour.len() > 1;
        for (&hour, axes) in &by_hour {
            match test_orthogonal(axes.iter().copied()) {
                Some(axis) => {
                    regular.insert(hour, axis);
                }
                None => {
                    is_regular = false;
                    break;
                }
            }
        }
        if is_regular {
            return Time2DTimes::Regular(regular);
        }
    }

    Time2DTimes::Irregular(per_run)
}

/// The axes are orthogonal when their union is no larger than the largest
/// single axis, i.e. every axis is a subset of the largest. Returns the union
/// axis.
fn test_orthogonal<'a>(axes: impl Iterator<Item = &'a TimeAxis>) -> Option<TimeAxis> {
    let mut max = 0;
    let mut template: Option<&TimeAxis> = None;
    let mut union: BTreeSet<TimeValue> = BTreeSet::new();
    for axis in axes {
        max = max.max(axis.len());
        union.extend(axis.values());
        if template.is_none() {
            template = Some(axis);
        }
    }
    let template = template?;
    if union.len() != max {
        return None;
    }

    Some(TimeAxis::from_values(
        template.is_interval(),
        template.code(),
        template.period(),
        template.ref_date(),
        union.into_iter().collect(),
    ))
}

impl Serialize for CoordinateTime2D {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        self.runtime.write_to(stream)?;
        self.period.write_to(stream)?;
        stream.write_byte(self.is_interval as u8)?;
        stream.write_varint(self.ntimes as u64)?;
        for &offset in &self.offsets {
            stream.write_varint_signed(offset)?;
        }
        match &self.times {
            Time2DTimes::Irregular(axes) => {
                stream.write_byte(0)?;
                for axis in axes {
                    axis.write_to(stream)?;
                }
            }
            Time2DTimes::Orthogonal(axis) => {
                stream.write_byte(1)?;
                axis.write_to(stream)?;
            }
            Time2DTimes::Regular(by_hour) => {
                stream.write_byte(2)?;
                stream.write_varint(by_hour.len() as u64)?;
                for (&hour, axis) in by_hour {
                    stream.write_byte(hour as u8)?;
                    axis.write_to(stream)?;
                }
            }
        }

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        let runtime = CoordinateRuntime::read_from(stream)?;
        let period = Period::read_from(stream)?;
        let is_interval = stream.read_byte()? != 0;
        let ntimes = stream.read_varint()? as usize;
        let mut offsets = Vec::with_capacity(runtime.len());
        for _ in 0..runtime.len() {
            offsets.push(stream.read_varint_signed()?);
        }
        let times = match stream.read_byte()? {
            0 => {
                let mut axes = Vec::with_capacity(runtime.len());
                for _ in 0..runtime.len() {
                    axes.push(TimeAxis::read_from(stream)?);
                }
                Time2DTimes::Irregular(axes)
            }
            1 => Time2DTimes::Orthogonal(Box::new(TimeAxis::read_from(stream)?)),
            2 => {
                let n = stream.read_varint()? as usize;
                let mut by_hour = BTreeMap::new();
                for _ in 0..n {
                    let hour = stream.read_byte()? as u32;
                    by_hour.insert(hour, TimeAxis::read_from(stream)?);
                }
                Time2DTimes::Regular(by_hour)
            }
            other => return Err(Error::Corrupt(format!("bad time2d storage tag {other}"))),
        };

        Ok(Self {
            runtime,
            times,
            build_times: None,
            offsets,
            period,
            is_interval,
            ntimes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeUnit;
    use std::io::Cursor;

    const HOUR: i64 = 3_600_000;

    fn runtime(hours: &[i64]) -> CoordinateRuntime {
        CoordinateRuntime::new(
            hours.iter().map(|h| h * HOUR).collect(),
            Period::new(1, TimeUnit::Hour),
        )
    }

    fn time_axis(ref_hour: i64, offsets: Vec<i32>) -> TimeAxis {
        TimeAxis::Time(CoordinateTime::new(
            1,
            Period::hour(),
            CalendarDate::from_millis(ref_hour * HOUR),
            offsets,
        ))
    }

    fn two_run_axis() -> CoordinateTime2D {
        CoordinateTime2D::new(
            runtime(&[0, 6]),
            vec![time_axis(0, vec![0, 6, 12]), time_axis(6, vec![0, 6])],
        )
        .unwrap()
    }

    #[test]
    fn test_offsets_match_period_arithmetic() {
        let coord = two_run_axis();
        assert_eq!(coord.offsets(), &[0, 6]);
        assert_eq!(coord.shape(), [2, 3]);

        let period = coord.period();
        let first = coord.runtime().first_date().unwrap();
        for idx in 0..coord.nruns() {
            assert_eq!(
                period.added_to(first, coord.offset(idx)).unwrap(),
                coord.runtime().date(idx)
            );
        }
    }

    #[test]
    fn test_classification_orthogonal() {
        let coord = CoordinateTime2D::new(
            runtime(&[0, 24]),
            vec![time_axis(0, vec![0, 6, 12]), time_axis(24, vec![0, 6, 12])],
        )
        .unwrap();
        assert!(coord.is_orthogonal());
        assert_eq!(coord.ntimes(), 3);

        // A subset run is still orthogonal.
        let coord = CoordinateTime2D::new(
            runtime(&[0, 24]),
            vec![time_axis(0, vec![0, 6, 12]), time_axis(24, vec![0, 6])],
        )
        .unwrap();
        assert!(coord.is_orthogonal());
    }

    #[test]
    fn test_classification_regular() {
        // 00Z runs reach further out than 12Z runs; within an hour group the
        // axes agree.
        let coord = CoordinateTime2D::new(
            runtime(&[0, 12, 24, 36]),
            vec![
                time_axis(0, vec![0, 6, 12, 18]),
                time_axis(12, vec![0, 3]),
                time_axis(24, vec![0, 6, 12, 18]),
                time_axis(36, vec![0, 3]),
            ],
        )
        .unwrap();
        assert!(coord.is_regular());
        assert_eq!(coord.ntimes(), 4);
        assert_eq!(
            coord.time_coordinate(1).unwrap().values(),
            vec![TimeValue::Offset(0), TimeValue::Offset(3)]
        );
    }

    #[test]
    fn test_classification_irregular() {
        let coord = CoordinateTime2D::new(
            runtime(&[0, 24]),
            vec![time_axis(0, vec![0, 6]), time_axis(24, vec![0, 9])],
        )
        .unwrap();
        assert!(!coord.is_orthogonal());
        assert!(!coord.is_regular());
    }

    #[test]
    fn test_index2d() {
        let coord = two_run_axis();
        assert_eq!(coord.index2d(0, TimeValue::Offset(12)), Some((0, 2)));
        assert_eq!(coord.index2d(6 * HOUR, TimeValue::Offset(6)), Some((1, 1)));
        assert_eq!(coord.index2d(6 * HOUR, TimeValue::Offset(12)), None);
        assert_eq!(coord.index2d(3 * HOUR, TimeValue::Offset(0)), None);
    }

    #[test]
    fn test_make_best_latest_run_wins() {
        let coord = two_run_axis();
        let master = runtime(&[0, 6]);
        let best = coord.make_best(&master).unwrap();

        // Valid hours 0,6,12 from run 0 and 6,12 from run 6 (offsets 0,6
        // shifted by 6).
        match &best {
            TimeAxis::Time(axis) => {
                assert_eq!(axis.offsets(), &[0, 6, 12]);
                // Hour 0 only run 0 supplies; hours 6 and 12 the later run.
                assert_eq!(axis.time2runtime(), Some(&[1, 2, 2][..]));
            }
            TimeAxis::Intv(_) => panic!("expected instantaneous axis"),
        }
    }

    #[test]
    fn test_serialize_round_trip() -> Result<()> {
        for coord in [
            two_run_axis(),
            CoordinateTime2D::new(
                runtime(&[0, 24]),
                vec![time_axis(0, vec![0, 6, 12]), time_axis(24, vec![0, 6, 12])],
            )?,
        ] {
            let mut buffer = Vec::new();
            coord.write_to(&mut buffer)?;
            assert_eq!(CoordinateTime2D::read_from(&mut Cursor::new(buffer))?, coord);
        }

        Ok(())
    }
}
