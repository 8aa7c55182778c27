//! Coordinate sharing and unions.
//!
//! Within one group, variables that use the same axis get one shared axis
//! object: the union per axis identity, with each variable's sparse array
//! reindexed onto the shared shape. Across partitions, the same logical
//! variable's axes are unioned with an optional interval filter; the
//! partition that supplies a coordinate combination is resolved later
//! through the run-to-partition map, so only per-axis unions happen here.

use std::collections::{BTreeMap, BTreeSet};

use log::warn;

use crate::errors::{Error, Result};
use crate::record::RecordLocator;
use crate::sparse::SparseArray;

use super::builder::{EnsBuilder, Time2DBuilder, VertBuilder};
use super::runtime::CoordinateRuntime;
use super::time::{TimeInterval, TimeValue};
use super::{AxisIdentity, Coordinate};

/// Drops time-interval values of unwanted lengths before a union.
#[derive(Clone, Debug, Default)]
pub struct IntervalFilter {
    exclude: BTreeSet<i32>,
}

impl IntervalFilter {
    pub fn exclude_lengths(lengths: impl IntoIterator<Item = i32>) -> Self {
        Self {
            exclude: lengths.into_iter().collect(),
        }
    }

    pub fn keep(&self, intv: TimeInterval) -> bool {
        !self.exclude.contains(&intv.length())
    }

    fn keep_value(&self, value: TimeValue) -> bool {
        match value {
            TimeValue::Offset(_) => true,
            TimeValue::Interval(intv) => self.keep(intv),
        }
    }
}

/// One variable's reindexed result from intra-group sharing.
pub(crate) struct SharedVariable {
    /// Indices into the group's shared coordinate list, in this variable's
    /// axis order.
    pub coord_indexes: Vec<usize>,
    pub array: SparseArray<RecordLocator>,
}

/// Compute shared axes for one group and re-home every variable's sparse
/// array onto them. Input and output variables correspond by position.
pub(crate) fn share_group(
    variables: Vec<(Vec<Coordinate>, SparseArray<RecordLocator>)>,
) -> Result<(Vec<Coordinate>, Vec<SharedVariable>)> {
    // Union per axis identity, in canonical identity order.
    let mut by_identity: BTreeMap<AxisIdentity, Vec<&Coordinate>> = BTreeMap::new();
    for (axes, _) in &variables {
        for axis in axes {
            by_identity.entry(axis.identity()).or_default().push(axis);
        }
    }
    let mut shared = Vec::with_capacity(by_identity.len());
    let mut positions = BTreeMap::new();
    for (identity, axes) in &by_identity {
        positions.insert(*identity, shared.len());
        shared.push(union_same_identity(axes)?);
    }

    let mut out = Vec::with_capacity(variables.len());
    for (axes, array) in &variables {
        let mut coord_indexes = Vec::with_capacity(axes.len());
        let mut maps = Vec::with_capacity(axes.len());
        for axis in axes {
            let pos = positions[&axis.identity()];
            coord_indexes.push(pos);
            maps.push(axis_map(axis, &shared[pos])?);
        }

        let mut shape = Vec::new();
        for &pos in &coord_indexes {
            shared[pos].push_shape(&mut shape);
        }

        let mut reindexed = SparseArray::new(shape);
        let mut lost = 0u32;
        for (tuple, record) in array.iter_filled() {
            let moved = remap_tuple(&tuple, &maps)
                .map(|new_tuple| reindexed.add(&new_tuple, *record))
                .unwrap_or(false);
            if !moved {
                lost += 1;
            }
        }
        if lost > 0 {
            warn!("sharing lost {lost} records; shared axes do not cover the originals");
        }
        reindexed.set_ndups(array.ndups());

        out.push(SharedVariable {
            coord_indexes,
            array: reindexed,
        });
    }

    Ok((shared, out))
}

/// Union axes that already share an identity.
pub(crate) fn union_same_identity(axes: &[&Coordinate]) -> Result<Coordinate> {
    let first = axes.first().ok_or_else(|| Error::Merge(String::from("empty union")))?;

    match first {
        Coordinate::Runtime(axis) => {
            let mut builder = super::builder::RuntimeBuilder::new(axis.period());
            for other in axes {
                if let Coordinate::Runtime(other) = other {
                    builder.add_all(other);
                }
            }
            Ok(Coordinate::Runtime(builder.finish()))
        }
        Coordinate::Vert(axis) => {
            let mut builder = VertBuilder::new(axis.code(), axis.unit().to_string());
            for other in axes {
                if let Coordinate::Vert(other) = other {
                    builder.add_all(other);
                }
            }
            Ok(Coordinate::Vert(builder.finish()))
        }
        Coordinate::Ens(_) => {
            let mut builder = EnsBuilder::new();
            for other in axes {
                if let Coordinate::Ens(other) = other {
                    builder.add_all(other);
                }
            }
            Ok(Coordinate::Ens(builder.finish()))
        }
        Coordinate::Time2D(axis) => {
            let mut builder =
                Time2DBuilder::new(axis.is_interval(), identity_code(first), axis.period());
            for other in axes {
                if let Coordinate::Time2D(other) = other {
                    builder.add_all(other);
                }
            }
            Ok(Coordinate::Time2D(builder.finish()?))
        }
        Coordinate::Time(_) | Coordinate::TimeIntv(_) => {
            let masters = vec![None; axes.len()];
            union_time_like_parts(axes, &masters, None)
        }
    }
}

fn identity_code(axis: &Coordinate) -> u8 {
    axis.identity().code
}

/// How to carry one variable's axis indices onto a shared axis: a plain
/// position map, or a two-level map for the composite axis.
enum AxisMap {
    One(Vec<usize>),
    Two(Vec<Vec<Option<(usize, usize)>>>),
}

fn axis_map(from: &Coordinate, to: &Coordinate) -> Result<AxisMap> {
    let mismatch = || {
        Error::Merge(format!(
            "cannot map {:?} axis onto {:?} axis",
            from.kind(),
            to.kind()
        ))
    };
    let missing = || Error::Merge(String::from("shared axis is missing a value"));

    match (from, to) {
        (Coordinate::Runtime(from), Coordinate::Runtime(to)) => {
            let map = from
                .millis()
                .iter()
                .map(|&m| to.index(m).ok_or_else(missing))
                .collect::<Result<_>>()?;
            Ok(AxisMap::One(map))
        }
        (Coordinate::Time(from), Coordinate::Time(to)) => {
            let map = from
                .offsets()
                .iter()
                .map(|&off| to.index(off).ok_or_else(missing))
                .collect::<Result<_>>()?;
            Ok(AxisMap::One(map))
        }
        (Coordinate::TimeIntv(from), Coordinate::TimeIntv(to)) => {
            let map = from
                .intervals()
                .iter()
                .map(|&intv| to.index(intv).ok_or_else(missing))
                .collect::<Result<_>>()?;
            Ok(AxisMap::One(map))
        }
        (Coordinate::Vert(from), Coordinate::Vert(to)) => {
            let map = from
                .levels()
                .iter()
                .map(|&level| to.index(level).ok_or_else(missing))
                .collect::<Result<_>>()?;
            Ok(AxisMap::One(map))
        }
        (Coordinate::Ens(from), Coordinate::Ens(to)) => {
            let map = from
                .members()
                .iter()
                .map(|&member| to.index(member).ok_or_else(missing))
                .collect::<Result<_>>()?;
            Ok(AxisMap::One(map))
        }
        (Coordinate::Time2D(from), Coordinate::Time2D(to)) => {
            let mut map = Vec::with_capacity(from.nruns());
            for run_idx in 0..from.nruns() {
                let run_millis = from.runtime().date(run_idx).millis();
                let new_run = to.runtime().index(run_millis).ok_or_else(missing)?;
                let from_axis = from.time_coordinate(run_idx).ok_or_else(missing)?;
                let to_axis = to.time_coordinate(new_run).ok_or_else(missing)?;
                let mut run_map = Vec::with_capacity(from_axis.len());
                for time_idx in 0..from_axis.len() {
                    run_map.push(
                        to_axis
                            .index(from_axis.value(time_idx))
                            .map(|new_time| (new_run, new_time)),
                    );
                }
                map.push(run_map);
            }
            Ok(AxisMap::Two(map))
        }
        _ => Err(mismatch()),
    }
}

fn remap_tuple(old: &[usize], maps: &[AxisMap]) -> Option<Vec<usize>> {
    let mut out = Vec::with_capacity(old.len());
    let mut pos = 0;
    for map in maps {
        match map {
            AxisMap::One(map) => {
                out.push(*map.get(old[pos])?);
                pos += 1;
            }
            AxisMap::Two(map) => {
                let (run, time) = (*map.get(old[pos])?.get(old[pos + 1])?)?;
                out.push(run);
                out.push(time);
                pos += 2;
            }
        }
    }

    Some(out)
}

/// One partition's contribution to a cross-partition variable union.
pub(crate) struct PartAxes<'a> {
    pub axes: Vec<&'a Coordinate>,
    /// The child's master runtime; needed to unfold a single-valid-time axis
    /// back into runs.
    pub master: Option<&'a CoordinateRuntime>,
}

pub(crate) struct UnionAxes {
    pub coordinates: Vec<Coordinate>,
    /// Vertical or ensemble axes disagreed across partitions.
    pub axes_differ: bool,
}

/// Union one logical variable's axes across partitions. Time-like axes of
/// any flavor merge into a composite runtime x time axis; vertical and
/// ensemble axes union per identity, with disagreements flagged rather than
/// rejected.
pub(crate) fn unionize_variable(
    parts: &[PartAxes<'_>],
    filter: Option<&IntervalFilter>,
) -> Result<UnionAxes> {
    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    enum UnionKey {
        TimeLike(u8),
        Vert(u8),
        Ens,
    }

    let mut buckets: BTreeMap<UnionKey, Vec<(usize, &Coordinate)>> = BTreeMap::new();
    for (part_idx, part) in parts.iter().enumerate() {
        for &axis in &part.axes {
            let key = match axis {
                Coordinate::Time(_) | Coordinate::TimeIntv(_) | Coordinate::Time2D(_) => {
                    UnionKey::TimeLike(identity_code(axis))
                }
                Coordinate::Vert(vert) => UnionKey::Vert(vert.code()),
                Coordinate::Ens(_) => UnionKey::Ens,
                Coordinate::Runtime(_) => continue,
            };
            buckets.entry(key).or_default().push((part_idx, axis));
        }
    }

    let mut coordinates = Vec::with_capacity(buckets.len());
    let mut axes_differ = false;
    for (key, axes) in &buckets {
        match key {
            UnionKey::TimeLike(_) => {
                let masters: Vec<Option<&CoordinateRuntime>> =
                    axes.iter().map(|&(part_idx, _)| parts[part_idx].master).collect();
                let bare: Vec<&Coordinate> = axes.iter().map(|&(_, axis)| axis).collect();
                coordinates.push(union_time_like_parts(&bare, &masters, filter)?);
            }
            UnionKey::Vert(_) | UnionKey::Ens => {
                let bare: Vec<&Coordinate> = axes.iter().map(|&(_, axis)| axis).collect();
                axes_differ |= bare.windows(2).any(|pair| pair[0] != pair[1]);
                coordinates.push(union_same_identity(&bare)?);
            }
        }
    }

    Ok(UnionAxes {
        coordinates,
        axes_differ,
    })
}

fn union_time_like_parts(
    axes: &[&Coordinate],
    masters: &[Option<&CoordinateRuntime>],
    filter: Option<&IntervalFilter>,
) -> Result<Coordinate> {
    let (is_interval, code, period) = match axes.first() {
        Some(Coordinate::Time2D(axis)) => (axis.is_interval(), identity_code(axes[0]), axis.period()),
        Some(Coordinate::Time(axis)) => (false, axis.code(), axis.period()),
        Some(Coordinate::TimeIntv(axis)) => (true, axis.code(), axis.period()),
        _ => return Err(Error::Merge(String::from("empty time union"))),
    };

    let mut builder = Time2DBuilder::new(is_interval, code, period);
    for (idx, axis) in axes.iter().enumerate() {
        match axis {
            Coordinate::Time2D(two_d) => {
                for run_idx in 0..two_d.nruns() {
                    let run = two_d.runtime().date(run_idx);
                    if let Some(time_axis) = two_d.inventory(run_idx) {
                        for value in time_axis.values() {
                            if filter.map_or(true, |f| f.keep_value(value)) {
                                builder.add(run, value);
                            }
                        }
                    }
                }
            }
            Coordinate::Time(_) | Coordinate::TimeIntv(_) => {
                add_flattened(&mut builder, axis, masters.get(idx).copied().flatten(), filter)?;
            }
            _ => {
                return Err(Error::Merge(String::from(
                    "vertical or ensemble axis in a time union",
                )))
            }
        }
    }

    Ok(Coordinate::Time2D(builder.finish()?))
}

/// Unfold a single-valid-time axis (offsets from one reference date, with an
/// optional run ownership map) back into (run, run-relative value) pairs.
fn add_flattened(
    builder: &mut Time2DBuilder,
    axis: &Coordinate,
    master: Option<&CoordinateRuntime>,
    filter: Option<&IntervalFilter>,
) -> Result<()> {
    let (ref_date, period, values, time2runtime) = match axis {
        Coordinate::Time(time) => (
            time.ref_date(),
            time.period(),
            time.offsets()
                .iter()
                .map(|&off| TimeValue::Offset(off))
                .collect::<Vec<_>>(),
            time.time2runtime(),
        ),
        Coordinate::TimeIntv(intv) => (
            intv.ref_date(),
            intv.period(),
            intv.intervals()
                .iter()
                .map(|&intv| TimeValue::Interval(intv))
                .collect::<Vec<_>>(),
            intv.time2runtime(),
        ),
        _ => return Err(Error::Merge(String::from("not a time axis"))),
    };

    for (pos, value) in values.into_iter().enumerate() {
        if !filter.map_or(true, |f| f.keep_value(value)) {
            continue;
        }
        let run = match (time2runtime, master) {
            (Some(map), Some(master)) if map[pos] > 0 => master.date((map[pos] - 1) as usize),
            _ => ref_date,
        };
        let shift = period.offset_between(ref_date, run)?;
        let shift = i32::try_from(shift)
            .map_err(|_| Error::TimeRange(format!("run shift {shift} overflows")))?;
        builder.add(run, value.shifted(-shift));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::{
        CoordinateTime, CoordinateVert, EnsMember, TimeAxis, VertLevel,
    };
    use crate::coordinate::ensemble::CoordinateEns;
    use crate::time::{CalendarDate, Period};

    const HOUR: i64 = 3_600_000;

    fn time2d(runs: &[(i64, &[i32])]) -> Coordinate {
        let mut builder = Time2DBuilder::new(false, 1, Period::hour());
        for &(run_hour, offsets) in runs {
            for &off in offsets {
                builder.add(CalendarDate::from_millis(run_hour * HOUR), TimeValue::Offset(off));
            }
        }
        Coordinate::Time2D(builder.finish().unwrap())
    }

    fn vert(code: u8, levels: &[f64]) -> Coordinate {
        Coordinate::Vert(CoordinateVert::new(
            code,
            String::from("Pa"),
            levels.iter().map(|&v| VertLevel::single(v)).collect(),
        ))
    }

    fn array_with(
        shape: Vec<usize>,
        cells: &[(&[usize], u64)],
    ) -> SparseArray<RecordLocator> {
        let mut array = SparseArray::new(shape);
        for &(tuple, offset) in cells {
            assert!(array.add(tuple, RecordLocator::new(0, offset)));
        }
        array
    }

    #[test]
    fn test_share_unions_axes_and_preserves_records() -> Result<()> {
        // Variable A: two runs, offsets {0,6}; levels {500}.
        // Variable B: one run, offsets {0,6,12}; levels {500, 850}.
        let var_a = (
            vec![time2d(&[(0, &[0, 6]), (6, &[0, 6])]), vert(100, &[500.0])],
            array_with(vec![2, 2, 1], &[(&[0, 1, 0], 11), (&[1, 0, 0], 22)]),
        );
        let var_b = (
            vec![time2d(&[(0, &[0, 6, 12])]), vert(100, &[500.0, 850.0])],
            array_with(vec![1, 3, 2], &[(&[0, 2, 1], 33)]),
        );

        let (shared, vars) = share_group(vec![var_a, var_b])?;
        assert_eq!(shared.len(), 2);

        // Shared time axis covers both runs with the union of offsets per run.
        let two_d = match &shared[0] {
            Coordinate::Time2D(axis) => axis,
            other => panic!("expected time2d first, got {other:?}"),
        };
        assert_eq!(two_d.nruns(), 2);
        assert_eq!(two_d.ntimes(), 3);

        let levels = match &shared[1] {
            Coordinate::Vert(axis) => axis.len(),
            other => panic!("expected vert second, got {other:?}"),
        };
        assert_eq!(levels, 2);

        // A's record at (run 6h, offset 0, level 500) survives reindexing.
        let a = &vars[0];
        assert_eq!(a.array.shape(), &[2, 3, 2]);
        assert_eq!(a.array.get(&[1, 0, 0]), Some(&RecordLocator::new(0, 22)));
        assert_eq!(a.array.get(&[0, 1, 0]), Some(&RecordLocator::new(0, 11)));

        // B's record at (run 0, offset 12, level 850).
        let b = &vars[1];
        assert_eq!(b.array.get(&[0, 2, 1]), Some(&RecordLocator::new(0, 33)));
        assert_eq!(b.array.count_not_missing(), 1);

        Ok(())
    }

    #[test]
    fn test_distinct_level_types_stay_distinct() -> Result<()> {
        let var_a = (
            vec![time2d(&[(0, &[0])]), vert(100, &[500.0])],
            array_with(vec![1, 1, 1], &[(&[0, 0, 0], 1)]),
        );
        let var_b = (
            vec![time2d(&[(0, &[0])]), vert(103, &[2.0])],
            array_with(vec![1, 1, 1], &[(&[0, 0, 0], 2)]),
        );

        let (shared, _) = share_group(vec![var_a, var_b])?;
        // One time axis plus two separate vertical axes.
        assert_eq!(shared.len(), 3);

        Ok(())
    }

    #[test]
    fn test_unionize_across_partitions() -> Result<()> {
        let p1_time = time2d(&[(0, &[0, 6])]);
        let p1_vert = vert(100, &[500.0]);
        let p2_time = time2d(&[(24, &[0, 6])]);
        let p2_vert = vert(100, &[500.0, 850.0]);

        let parts = vec![
            PartAxes {
                axes: vec![&p1_time, &p1_vert],
                master: None,
            },
            PartAxes {
                axes: vec![&p2_time, &p2_vert],
                master: None,
            },
        ];
        let union = unionize_variable(&parts, None)?;

        assert!(union.axes_differ);
        let two_d = match &union.coordinates[0] {
            Coordinate::Time2D(axis) => axis,
            other => panic!("expected time2d, got {other:?}"),
        };
        assert_eq!(two_d.nruns(), 2);
        assert_eq!(two_d.offsets(), &[0, 24]);

        Ok(())
    }

    #[test]
    fn test_interval_filter_drops_before_union() -> Result<()> {
        let mut builder = Time2DBuilder::new(true, 11, Period::hour());
        for intv in [TimeInterval::new(0, 6), TimeInterval::new(0, 12)] {
            builder.add(CalendarDate::from_millis(0), TimeValue::Interval(intv));
        }
        let axis = Coordinate::Time2D(builder.finish()?);

        let parts = vec![PartAxes {
            axes: vec![&axis],
            master: None,
        }];
        let filter = IntervalFilter::exclude_lengths([12]);
        let union = unionize_variable(&parts, Some(&filter))?;

        let two_d = match &union.coordinates[0] {
            Coordinate::Time2D(axis) => axis,
            other => panic!("expected time2d, got {other:?}"),
        };
        assert_eq!(two_d.ntimes(), 1);
        assert_eq!(
            two_d.time_coordinate(0).unwrap().values(),
            vec![TimeValue::Interval(TimeInterval::new(0, 6))]
        );

        Ok(())
    }

    #[test]
    fn test_flattened_axis_unfolds_through_ownership_map() -> Result<()> {
        // A "unique time" child: offsets 0,6,12 from the first run, where 12
        // belongs to the 06Z run (offset 6 there).
        let master = CoordinateRuntime::new(vec![0, 6 * HOUR], Period::hour());
        let flat = Coordinate::Time(
            CoordinateTime::new(1, Period::hour(), CalendarDate::from_millis(0), vec![0, 6, 12])
                .with_time2runtime(vec![1, 1, 2]),
        );

        let parts = vec![PartAxes {
            axes: vec![&flat],
            master: Some(&master),
        }];
        let union = unionize_variable(&parts, None)?;
        let two_d = match &union.coordinates[0] {
            Coordinate::Time2D(axis) => axis,
            other => panic!("expected time2d, got {other:?}"),
        };

        assert_eq!(two_d.nruns(), 2);
        // Run 0 keeps offsets {0,6}; run 6h gets valid hour 12 as offset 6.
        assert_eq!(
            two_d.time_coordinate(0).unwrap().values(),
            vec![TimeValue::Offset(0), TimeValue::Offset(6)]
        );
        assert_eq!(
            two_d.time_coordinate(1).unwrap().values(),
            vec![TimeValue::Offset(6)]
        );

        Ok(())
    }

    #[test]
    fn test_ensemble_union() -> Result<()> {
        let a = Coordinate::Ens(CoordinateEns::new(vec![EnsMember::new(3, 0)]));
        let b = Coordinate::Ens(CoordinateEns::new(vec![
            EnsMember::new(3, 0),
            EnsMember::new(3, 1),
        ]));
        let t = time2d(&[(0, &[0])]);

        let parts = vec![
            PartAxes {
                axes: vec![&t, &a],
                master: None,
            },
            PartAxes {
                axes: vec![&t, &b],
                master: None,
            },
        ];
        let union = unionize_variable(&parts, None)?;
        assert!(union.axes_differ);
        match &union.coordinates[1] {
            Coordinate::Ens(ens) => assert_eq!(ens.len(), 2),
            other => panic!("expected ens, got {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn test_time_axis_values() {
        let axis = TimeAxis::Time(CoordinateTime::new(
            1,
            Period::hour(),
            CalendarDate::from_millis(0),
            vec![0, 6],
        ));
        assert_eq!(
            axis.values(),
            vec![TimeValue::Offset(0), TimeValue::Offset(6)]
        );
    }
}
