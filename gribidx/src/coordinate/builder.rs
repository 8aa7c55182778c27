//! Coordinate builders: accumulate distinct values while scanning records,
//! then `finish` into an immutable axis in canonical order.
//!
//! Accumulation goes through ordered sets, so the finished axis is identical
//! for any insertion order. A builder that saw nothing finishes to a
//! zero-length axis; dropping the empty variable is the caller's job.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::Result;
use crate::time::{CalendarDate, Period};

use super::ensemble::{CoordinateEns, EnsMember};
use super::runtime::CoordinateRuntime;
use super::time::TimeValue;
use super::time2d::{CoordinateTime2D, TimeAxis};
use super::vertical::{CoordinateVert, VertLevel};

pub struct RuntimeBuilder {
    period: Period,
    runtimes: BTreeSet<i64>,
}

impl RuntimeBuilder {
    pub fn new(period: Period) -> Self {
        Self {
            period,
            runtimes: BTreeSet::new(),
        }
    }

    pub fn add(&mut self, date: CalendarDate) {
        self.runtimes.insert(date.millis());
    }

    pub fn add_all(&mut self, axis: &CoordinateRuntime) {
        self.runtimes.extend(axis.millis());
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    pub fn finish(self) -> CoordinateRuntime {
        CoordinateRuntime::new(self.runtimes.into_iter().collect(), self.period)
    }
}

/// Builder for one run's time axis, instantaneous or interval.
pub struct TimeAxisBuilder {
    is_interval: bool,
    code: u8,
    period: Period,
    ref_date: CalendarDate,
    values: BTreeSet<TimeValue>,
}

impl TimeAxisBuilder {
    pub fn new(is_interval: bool, code: u8, period: Period, ref_date: CalendarDate) -> Self {
        Self {
            is_interval,
            code,
            period,
            ref_date,
            values: BTreeSet::new(),
        }
    }

    /// Insert one value. A value of the wrong flavor (interval into an
    /// instantaneous axis or vice versa) is refused.
    pub fn add(&mut self, value: TimeValue) -> bool {
        if value.is_interval() != self.is_interval {
            return false;
        }
        self.values.insert(value);
        true
    }

    pub fn add_all(&mut self, axis: &TimeAxis) {
        for value in axis.values() {
            self.add(value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn finish(self) -> TimeAxis {
        TimeAxis::from_values(
            self.is_interval,
            self.code,
            self.period,
            self.ref_date,
            self.values.into_iter().collect(),
        )
    }
}

pub struct VertBuilder {
    code: u8,
    unit: String,
    levels: BTreeSet<VertLevel>,
}

impl VertBuilder {
    pub fn new(code: u8, unit: String) -> Self {
        Self {
            code,
            unit,
            levels: BTreeSet::new(),
        }
    }

    pub fn add(&mut self, level: VertLevel) {
        self.levels.insert(level);
    }

    pub fn add_all(&mut self, axis: &CoordinateVert) {
        self.levels.extend(axis.levels().iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn finish(self) -> CoordinateVert {
        CoordinateVert::new(self.code, self.unit, self.levels.into_iter().collect())
    }
}

pub struct EnsBuilder {
    members: BTreeSet<EnsMember>,
}

impl EnsBuilder {
    pub fn new() -> Self {
        Self {
            members: BTreeSet::new(),
        }
    }

    pub fn add(&mut self, member: EnsMember) {
        self.members.insert(member);
    }

    pub fn add_all(&mut self, axis: &CoordinateEns) {
        self.members.extend(axis.members().iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn finish(self) -> CoordinateEns {
        CoordinateEns::new(self.members.into_iter().collect())
    }
}

impl Default for EnsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Two-level builder for the composite runtime x time axis: a runtime builder
/// plus one nested time builder per run. Values are run-relative; `finish`
/// computes each run's integer offset from the master first date.
pub struct Time2DBuilder {
    is_interval: bool,
    code: u8,
    period: Period,
    runtimes: RuntimeBuilder,
    times: BTreeMap<i64, TimeAxisBuilder>,
}

impl Time2DBuilder {
    pub fn new(is_interval: bool, code: u8, period: Period) -> Self {
        Self {
            is_interval,
            code,
            period,
            runtimes: RuntimeBuilder::new(period),
            times: BTreeMap::new(),
        }
    }

    pub fn is_interval(&self) -> bool {
        self.is_interval
    }

    /// Insert one (run, run-relative value) pair.
    pub fn add(&mut self, run: CalendarDate, value: TimeValue) -> bool {
        self.runtimes.add(run);
        let builder = self.times.entry(run.millis()).or_insert_with(|| {
            TimeAxisBuilder::new(self.is_interval, self.code, self.period, run)
        });

        builder.add(value)
    }

    /// Merge an already-finished composite axis, run by run.
    pub fn add_all(&mut self, coord: &CoordinateTime2D) {
        for run_idx in 0..coord.nruns() {
            let run = coord.runtime().date(run_idx);
            if let Some(axis) = coord.inventory(run_idx) {
                for value in axis.values() {
                    self.add(run, value);
                }
            } else {
                // Keep the run even when it carries no times.
                self.runtimes.add(run);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    pub fn finish(mut self) -> Result<CoordinateTime2D> {
        let runtime = self.runtimes.finish();
        let mut per_run = Vec::with_capacity(runtime.len());
        for idx in 0..runtime.len() {
            let millis = runtime.date(idx).millis();
            let builder = self.times.remove(&millis).unwrap_or_else(|| {
                TimeAxisBuilder::new(self.is_interval, self.code, self.period, runtime.date(idx))
            });
            per_run.push(builder.finish());
        }

        CoordinateTime2D::new(runtime, per_run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::time::TimeInterval;
    use crate::time::TimeUnit;

    const HOUR: i64 = 3_600_000;

    #[test]
    fn test_canonical_order_is_insertion_independent() {
        let mut forward = RuntimeBuilder::new(Period::hour());
        let mut backward = RuntimeBuilder::new(Period::hour());
        for h in [0i64, 6, 12, 6] {
            forward.add(CalendarDate::from_millis(h * HOUR));
        }
        for h in [6i64, 12, 0] {
            backward.add(CalendarDate::from_millis(h * HOUR));
        }
        assert_eq!(forward.finish(), backward.finish());
    }

    #[test]
    fn test_empty_builder_finishes_empty() {
        let axis = VertBuilder::new(100, String::from("Pa")).finish();
        assert!(axis.is_empty());

        let coord = Time2DBuilder::new(false, 1, Period::hour()).finish().unwrap();
        assert_eq!(coord.nruns(), 0);
        assert_eq!(coord.ntimes(), 0);
    }

    #[test]
    fn test_time_builder_refuses_mixed_flavors() {
        let mut builder =
            TimeAxisBuilder::new(false, 1, Period::hour(), CalendarDate::from_millis(0));
        assert!(builder.add(TimeValue::Offset(6)));
        assert!(!builder.add(TimeValue::Interval(TimeInterval::new(0, 6))));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_time2d_scenario() -> Result<()> {
        // Three offsets at the 00Z run, two at the 06Z run.
        let mut builder = Time2DBuilder::new(false, 1, Period::hour());
        for off in [12, 0, 6] {
            builder.add(CalendarDate::from_millis(0), TimeValue::Offset(off));
        }
        for off in [6, 0] {
            builder.add(CalendarDate::from_millis(6 * HOUR), TimeValue::Offset(off));
        }

        let coord = builder.finish()?;
        assert_eq!(coord.nruns(), 2);
        assert_eq!(coord.ntimes(), 3);
        assert_eq!(coord.offsets(), &[0, 6]);

        Ok(())
    }

    #[test]
    fn test_add_all_round_trip() -> Result<()> {
        let mut builder = Time2DBuilder::new(false, 1, Period::new(1, TimeUnit::Hour));
        builder.add(CalendarDate::from_millis(0), TimeValue::Offset(0));
        builder.add(CalendarDate::from_millis(0), TimeValue::Offset(6));
        builder.add(CalendarDate::from_millis(6 * HOUR), TimeValue::Offset(0));
        let coord = builder.finish()?;

        let mut again = Time2DBuilder::new(false, 1, Period::new(1, TimeUnit::Hour));
        again.add_all(&coord);
        assert_eq!(again.finish()?, coord);

        Ok(())
    }
}
