//! Partitions and the merge engine: build one time-spanning index from N
//! child indexes without rescanning raw data.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use log::{info, warn};

use crate::codec::reader::IndexReader;
use crate::collection::{
    Collection, CollectionKind, Dataset, DatasetKind, Group, PartitionRef, VariableIndex,
};
use crate::coordinate::share::{unionize_variable, IntervalFilter, PartAxes};
use crate::coordinate::{Coordinate, RuntimeBuilder};
use crate::errors::{Error, Result};
use crate::extio::{ExtendedRead, ExtendedWrite, Serialize};
use crate::record::VariableId;
use crate::time::{CalendarDate, Period};

/// One child collection of a partition: where its index lives and when it
/// last changed.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Partition {
    pub name: String,
    pub index_path: String,
    pub last_modified: i64,
}

impl Serialize for Partition {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_str(&self.name)?;
        stream.write_str(&self.index_path)?;
        stream.write_varint_signed(self.last_modified)?;

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        Ok(Self {
            name: stream.read_str()?,
            index_path: stream.read_str()?,
            last_modified: stream.read_varint_signed()?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PartitionSortKey {
    Name,
    LastModified,
}

/// How partitions are ordered. The sorted order is the override precedence:
/// when two partitions supply the same runtime, the later one wins.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PartitionOrder {
    pub key: PartitionSortKey,
    pub increasing: bool,
}

impl Default for PartitionOrder {
    fn default() -> Self {
        Self {
            key: PartitionSortKey::Name,
            increasing: true,
        }
    }
}

/// Merges child indexes into a partition collection.
///
/// Children that fail to open are logged and excluded; a merge with zero
/// usable children is an error. The output is a complete collection, so
/// partitions nest.
pub struct PartitionMerge {
    name: String,
    edition: u8,
    order: PartitionOrder,
    filter: Option<IntervalFilter>,
    partitions: Vec<Partition>,
}

impl PartitionMerge {
    pub fn new(name: impl Into<String>, edition: u8) -> Self {
        Self {
            name: name.into(),
            edition,
            order: PartitionOrder::default(),
            filter: None,
            partitions: Vec::new(),
        }
    }

    pub fn order(mut self, order: PartitionOrder) -> Self {
        self.order = order;
        self
    }

    pub fn interval_filter(mut self, filter: IntervalFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn add_partition(
        &mut self,
        name: impl Into<String>,
        index_path: impl Into<String>,
        last_modified: i64,
    ) {
        self.partitions.push(Partition {
            name: name.into(),
            index_path: index_path.into(),
            last_modified,
        });
    }

    pub fn merge(mut self) -> Result<Collection> {
        // Declared order is precedence order.
        let mut partitions = std::mem::take(&mut self.partitions);
        match self.order.key {
            PartitionSortKey::Name => partitions.sort_by(|a, b| a.name.cmp(&b.name)),
            PartitionSortKey::LastModified => partitions.sort_by_key(|p| p.last_modified),
        }
        if !self.order.increasing {
            partitions.reverse();
        }

        // Open children; a child that cannot be opened is excluded, not
        // fatal.
        let mut usable = Vec::new();
        let mut children = Vec::new();
        for partition in partitions {
            match IndexReader::open(Path::new(&partition.index_path)) {
                Ok(reader) => {
                    let child = reader.into_collection();
                    if child.canonical_dataset().is_none() || child.master_runtime.is_none() {
                        warn!("partition {} has no usable dataset; excluded", partition.name);
                        continue;
                    }
                    usable.push(partition);
                    children.push(child);
                }
                Err(err) => {
                    warn!("partition {} failed to open: {err}; excluded", partition.name);
                }
            }
        }
        if children.is_empty() {
            return Err(Error::NoUsablePartitions);
        }

        // Master runtime: union over children, in precedence order.
        let period = children
            .iter()
            .find_map(|c| c.master_runtime.as_ref())
            .map(|r| r.period())
            .unwrap_or_else(Period::hour);
        let mut master_builder = RuntimeBuilder::new(period);
        for child in &children {
            if let Some(runtime) = &child.master_runtime {
                master_builder.add_all(runtime);
            }
        }
        let master = master_builder.finish();

        // run2part: the partition supplying each master run; later
        // partitions overwrite earlier ones.
        let mut run2part = vec![0u32; master.len()];
        for (partno, child) in children.iter().enumerate() {
            if let Some(runtime) = &child.master_runtime {
                for &millis in runtime.millis() {
                    if let Some(idx) = master.index(millis) {
                        run2part[idx] = partno as u32;
                    }
                }
            }
        }

        // Classification: disjoint child date ranges flatten the result.
        let overlapping = Self::ranges_overlap(&children)?;

        let groups = self.merge_groups(&children)?;
        info!(
            "{}: merged {} partitions into {} groups ({})",
            self.name,
            children.len(),
            groups.len(),
            if overlapping { "2-D" } else { "unique time" },
        );

        let datasets = if overlapping {
            let best_groups = Self::derive_best(&groups, &master)?;
            vec![
                Dataset {
                    kind: DatasetKind::TwoD,
                    groups,
                },
                Dataset {
                    kind: DatasetKind::Best,
                    groups: best_groups,
                },
            ]
        } else {
            let groups = Self::derive_best_kind(groups, &master)?;
            vec![Dataset {
                kind: DatasetKind::UniqueTime,
                groups,
            }]
        };

        Ok(Collection {
            name: self.name,
            edition: self.edition,
            kind: CollectionKind::Partition,
            files: Vec::new(),
            datasets,
            master_runtime: Some(master),
            run2part,
            partitions: usable,
        })
    }

    /// Do any two children's valid-time ranges overlap?
    fn ranges_overlap(children: &[Collection]) -> Result<bool> {
        let mut ranges = Vec::new();
        for child in children {
            if let Some(range) = Self::child_time_range(child)? {
                ranges.push(range);
            }
        }
        ranges.sort();
        Ok(ranges.windows(2).any(|pair| pair[1].0 <= pair[0].1))
    }

    fn child_time_range(child: &Collection) -> Result<Option<(CalendarDate, CalendarDate)>> {
        let mut range: Option<(CalendarDate, CalendarDate)> = None;
        let mut merge = |lo: CalendarDate, hi: CalendarDate| {
            range = Some(match range {
                None => (lo, hi),
                Some((a, b)) => (a.min(lo), b.max(hi)),
            });
        };

        let dataset = match child.canonical_dataset() {
            Some(dataset) => dataset,
            None => return Ok(None),
        };
        for group in &dataset.groups {
            for coord in &group.coordinates {
                match coord {
                    Coordinate::Time2D(axis) => {
                        if let Some((lo, hi)) = axis.valid_time_range()? {
                            merge(lo, hi);
                        }
                    }
                    Coordinate::Time(axis) if !axis.is_empty() => {
                        let period = axis.period();
                        let lo = period.added_to(axis.ref_date(), axis.offsets()[0] as i64)?;
                        let hi = period
                            .added_to(axis.ref_date(), axis.offsets()[axis.len() - 1] as i64)?;
                        merge(lo, hi);
                    }
                    Coordinate::TimeIntv(axis) if !axis.is_empty() => {
                        let period = axis.period();
                        let lo = period.added_to(axis.ref_date(), axis.intervals()[0].start as i64)?;
                        let hi = period
                            .added_to(axis.ref_date(), axis.intervals()[axis.len() - 1].end as i64)?;
                        merge(lo, hi);
                    }
                    _ => {}
                }
            }
        }

        Ok(range)
    }

    /// Union per-group, per-variable coordinates across children and attach
    /// partition references.
    fn merge_groups(&self, children: &[Collection]) -> Result<Vec<Group>> {
        // grid hash -> variable hash -> contributing (partno, groupno,
        // varno). A variable missing from some children unions sparsely.
        let mut by_grid: BTreeMap<u64, BTreeMap<u64, Vec<PartitionRef>>> = BTreeMap::new();
        for (partno, child) in children.iter().enumerate() {
            let dataset = match child.canonical_dataset() {
                Some(dataset) => dataset,
                None => continue,
            };
            for (groupno, group) in dataset.groups.iter().enumerate() {
                for (varno, var) in group.variables.iter().enumerate() {
                    by_grid
                        .entry(group.grid_hash)
                        .or_default()
                        .entry(var.hash)
                        .or_default()
                        .push(PartitionRef {
                            partno: partno as u32,
                            groupno: groupno as u32,
                            varno: varno as u32,
                        });
                }
            }
        }

        let mut groups = Vec::with_capacity(by_grid.len());
        for (grid_hash, vars) in by_grid {
            let mut merged: Vec<(VariableId, u64, Vec<PartitionRef>, Vec<Coordinate>, Stats, bool)> =
                Vec::with_capacity(vars.len());
            for (hash, parts) in vars {
                let mut axes = Vec::with_capacity(parts.len());
                let mut stats = Stats::default();
                let mut id = None;
                for part in &parts {
                    let child = &children[part.partno as usize];
                    let dataset = match child.canonical_dataset() {
                        Some(dataset) => dataset,
                        None => continue,
                    };
                    let group = &dataset.groups[part.groupno as usize];
                    let var = &group.variables[part.varno as usize];
                    id.get_or_insert(var.id);
                    stats.nrecords += var.nrecords;
                    stats.ndups += var.ndups;
                    stats.nmissing += var.nmissing;
                    axes.push(PartAxes {
                        axes: var.axes(group),
                        master: child.master_runtime.as_ref(),
                    });
                }
                let id = match id {
                    Some(id) => id,
                    None => continue,
                };
                let union = unionize_variable(&axes, self.filter.as_ref())?;
                merged.push((id, hash, parts, union.coordinates, stats, union.axes_differ));
            }

            // Share the unioned axes across the group's variables.
            let mut by_identity = BTreeMap::new();
            for (_, _, _, axes, _, _) in &merged {
                for axis in axes {
                    by_identity
                        .entry(axis.identity())
                        .or_insert_with(Vec::new)
                        .push(axis);
                }
            }
            let mut coordinates = Vec::with_capacity(by_identity.len());
            let mut positions = BTreeMap::new();
            for (identity, axes) in &by_identity {
                positions.insert(*identity, coordinates.len());
                coordinates.push(crate::coordinate::share::union_same_identity(axes)?);
            }

            let variables = merged
                .into_iter()
                .map(|(id, hash, parts, axes, stats, axes_differ)| VariableIndex {
                    id,
                    hash,
                    coord_indexes: axes.iter().map(|a| positions[&a.identity()]).collect(),
                    nrecords: stats.nrecords,
                    ndups: stats.ndups,
                    nmissing: stats.nmissing,
                    axes_differ,
                    record_block: None,
                    parts,
                    records: None,
                })
                .collect();

            groups.push(Group {
                grid_hash,
                coordinates,
                variables,
            });
        }

        Ok(groups)
    }

    /// The "Best" view of merged groups: every composite time axis becomes a
    /// single valid-time axis owned by the latest run.
    fn derive_best(
        groups: &[Group],
        master: &crate::coordinate::CoordinateRuntime,
    ) -> Result<Vec<Group>> {
        let mut best_groups = Vec::with_capacity(groups.len());
        for group in groups {
            let mut coordinates = Vec::with_capacity(group.coordinates.len());
            for coord in &group.coordinates {
                match coord {
                    Coordinate::Time2D(axis) => {
                        coordinates.push(Coordinate::from(axis.make_best(master)?));
                    }
                    other => coordinates.push(other.clone()),
                }
            }
            let variables = group
                .variables
                .iter()
                .map(|var| VariableIndex {
                    id: var.id,
                    hash: var.hash,
                    coord_indexes: var.coord_indexes.clone(),
                    nrecords: var.nrecords,
                    ndups: var.ndups,
                    nmissing: var.nmissing,
                    axes_differ: var.axes_differ,
                    record_block: None,
                    parts: var.parts.clone(),
                    records: None,
                })
                .collect();
            best_groups.push(Group {
                grid_hash: group.grid_hash,
                coordinates,
                variables,
            });
        }

        Ok(best_groups)
    }

    /// The flattened unique-time view: same derivation as Best, applied in
    /// place. With disjoint children no run ever overrides another, so the
    /// ownership map is exact.
    fn derive_best_kind(
        groups: Vec<Group>,
        master: &crate::coordinate::CoordinateRuntime,
    ) -> Result<Vec<Group>> {
        Self::derive_best(&groups, master)
    }
}

#[derive(Default)]
struct Stats {
    nrecords: u32,
    ndups: u32,
    nmissing: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::writer::write_index;
    use crate::collection::LookupCoords;
    use crate::coordinate::TimeValue;
    use crate::testing;

    const HOUR: i64 = 3_600_000;

    /// Write two one-day child indexes: days that share the 06Z runtime so
    /// ranges overlap.
    fn write_children(dir: &Path) -> Result<(String, String)> {
        let day1 = testing::collection_with_runs("day1", &[(0, vec![0, 6, 12]), (6, vec![0, 6])])?;
        let day2 = testing::collection_with_runs("day2", &[(6, vec![0, 12]), (12, vec![0, 6])])?;

        let path1 = dir.join("day1.idx");
        let path2 = dir.join("day2.idx");
        write_index(&day1, &path1)?;
        write_index(&day2, &path2)?;

        Ok((
            path1.to_string_lossy().into_owned(),
            path2.to_string_lossy().into_owned(),
        ))
    }

    #[test]
    fn test_precedence_later_partition_wins() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (path1, path2) = write_children(dir.path())?;

        let mut merge = PartitionMerge::new("week", 2);
        merge.add_partition("day1", &path1, 0);
        merge.add_partition("day2", &path2, 0);
        let merged = merge.merge()?;

        let master = merged.master_runtime.as_ref().unwrap();
        assert_eq!(master.len(), 3);
        // Runtime 06Z is supplied by both; day2 (later in order) wins.
        assert_eq!(merged.run2part, vec![0, 1, 1]);
        assert_eq!(merged.kind, CollectionKind::Partition);
        assert_eq!(merged.partitions.len(), 2);

        Ok(())
    }

    #[test]
    fn test_two_d_and_best_datasets() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (path1, path2) = write_children(dir.path())?;

        let mut merge = PartitionMerge::new("week", 2);
        merge.add_partition("day1", &path1, 0);
        merge.add_partition("day2", &path2, 0);
        let merged = merge.merge()?;

        let two_d = merged.dataset(DatasetKind::TwoD).unwrap();
        let best = merged.dataset(DatasetKind::Best).unwrap();
        assert_eq!(two_d.groups.len(), 1);
        assert_eq!(best.groups.len(), 1);

        // Best axis: valid hours 0,6,12 (run 0), 6,12,18 (run 6h, offsets
        // 0,6 and 12 merged across children), 12,18 (run 12h).
        let group = &best.groups[0];
        let axis = match &group.coordinates[group.variables[0].coord_indexes[0]] {
            Coordinate::Time(axis) => axis,
            other => panic!("expected best time axis, got {other:?}"),
        };
        assert_eq!(axis.offsets(), &[0, 6, 12, 18]);
        // Ownership: hour 0 by run 0 (master idx 1), hours 6 and 12 by run
        // 6h... hour 12 is also produced by run 12h (offset 0) which is
        // latest, hour 18 by run 12h.
        assert_eq!(axis.time2runtime(), Some(&[1, 2, 3, 3][..]));

        let var = &group.variables[0];
        assert_eq!(var.parts.len(), 2);
        assert_eq!(var.parts[0].partno, 0);
        assert_eq!(var.parts[1].partno, 1);

        Ok(())
    }

    #[test]
    fn test_disjoint_children_flatten_to_unique_time() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let day1 = testing::collection_with_runs("day1", &[(0, vec![0, 3])])?;
        let day2 = testing::collection_with_runs("day2", &[(24, vec![0, 3])])?;
        let path1 = dir.path().join("day1.idx");
        let path2 = dir.path().join("day2.idx");
        write_index(&day1, &path1)?;
        write_index(&day2, &path2)?;

        let mut merge = PartitionMerge::new("week", 2);
        merge.add_partition("day1", path1.to_string_lossy(), 0);
        merge.add_partition("day2", path2.to_string_lossy(), 0);
        let merged = merge.merge()?;

        assert!(merged.dataset(DatasetKind::TwoD).is_none());
        let unique = merged.dataset(DatasetKind::UniqueTime).unwrap();
        let group = &unique.groups[0];
        let axis = match &group.coordinates[0] {
            Coordinate::Time(axis) => axis,
            other => panic!("expected flattened time axis, got {other:?}"),
        };
        assert_eq!(axis.offsets(), &[0, 3, 24, 27]);
        assert_eq!(axis.time2runtime(), Some(&[1, 1, 2, 2][..]));

        Ok(())
    }

    #[test]
    fn test_failed_child_excluded_zero_children_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (path1, _) = write_children(dir.path())?;

        let mut merge = PartitionMerge::new("week", 2);
        merge.add_partition("day1", &path1, 0);
        merge.add_partition("ghost", dir.path().join("missing.idx").to_string_lossy(), 0);
        let merged = merge.merge()?;
        assert_eq!(merged.partitions.len(), 1);

        let mut merge = PartitionMerge::new("empty", 2);
        merge.add_partition("ghost", dir.path().join("missing.idx").to_string_lossy(), 0);
        assert!(matches!(merge.merge(), Err(Error::NoUsablePartitions)));

        Ok(())
    }

    #[test]
    fn test_lookup_through_partition() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (path1, path2) = write_children(dir.path())?;

        let mut merge = PartitionMerge::new("week", 2);
        merge.add_partition("day1", &path1, 0);
        merge.add_partition("day2", &path2, 0);
        let merged = merge.merge()?;
        let merged_path = dir.path().join("week.idx");
        write_index(&merged, &merged_path)?;

        let reader = IndexReader::open(&merged_path)?;
        let coords = LookupCoords {
            runtime: Some(CalendarDate::from_millis(12 * HOUR)),
            time: Some(TimeValue::Offset(6)),
            ..Default::default()
        };
        let found = reader.lookup(DatasetKind::TwoD, 0, 0, &coords)?;
        // day2's record for run 12h, offset 6.
        assert_eq!(found, Some(testing::locator(3)));

        // A tuple no child supplies is a normal "not found".
        let absent = LookupCoords {
            runtime: Some(CalendarDate::from_millis(12 * HOUR)),
            time: Some(TimeValue::Offset(9)),
            ..Default::default()
        };
        assert_eq!(reader.lookup(DatasetKind::TwoD, 0, 0, &absent)?, None);

        Ok(())
    }
}
