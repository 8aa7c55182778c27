//! The collection data model and the one-pass index build.
//!
//! A collection owns datasets, datasets own groups (one per horizontal
//! grid), groups own shared coordinate axes and variables. Cross-references
//! are vector indices, so the graph has no cycles and no back-pointers.

use std::collections::BTreeMap;

use log::{info, warn};

use crate::coordinate::share::share_group;
use crate::coordinate::{
    Coordinate, CoordinateRuntime, EnsBuilder, EnsMember, RuntimeBuilder, Time2DBuilder,
    TimeValue, VertBuilder, VertLevel,
};
use crate::errors::{Error, Result};
use crate::partition::Partition;
use crate::record::{IndexedFile, Record, RecordLocator, VariableId};
use crate::sparse::SparseArray;
use crate::time::CalendarDate;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CollectionKind {
    /// A leaf collection: variables address records in scanned data files.
    Collection,
    /// A merged collection: variables address records through child
    /// partitions.
    Partition,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DatasetKind {
    /// The full runtime x time view.
    TwoD,
    /// Single valid-time view keeping the latest run per time.
    Best,
    /// Flattened view when no two children's date ranges overlap.
    UniqueTime,
}

pub struct Collection {
    pub name: String,
    pub edition: u8,
    pub kind: CollectionKind,
    pub files: Vec<IndexedFile>,
    pub datasets: Vec<Dataset>,
    /// Union of every run instant in the collection.
    pub master_runtime: Option<CoordinateRuntime>,
    /// For partitions: which child supplies each master runtime.
    pub run2part: Vec<u32>,
    pub partitions: Vec<Partition>,
}

impl Collection {
    pub fn dataset(&self, kind: DatasetKind) -> Option<&Dataset> {
        self.datasets.iter().find(|ds| ds.kind == kind)
    }

    /// The dataset partition merging consumes: the 2-D view when present,
    /// the flattened view otherwise.
    pub fn canonical_dataset(&self) -> Option<&Dataset> {
        self.dataset(DatasetKind::TwoD)
            .or_else(|| self.dataset(DatasetKind::UniqueTime))
    }

    pub fn file(&self, index: u32) -> Result<&IndexedFile> {
        self.files
            .get(index as usize)
            .ok_or(Error::BadFileIndex(index))
    }
}

pub struct Dataset {
    pub kind: DatasetKind,
    pub groups: Vec<Group>,
}

impl Dataset {
    pub fn find_group(&self, grid_hash: u64) -> Option<usize> {
        self.groups.iter().position(|g| g.grid_hash == grid_hash)
    }
}

/// One horizontal-grid group: shared coordinate axes plus the variables
/// defined on that grid.
pub struct Group {
    pub grid_hash: u64,
    pub coordinates: Vec<Coordinate>,
    pub variables: Vec<VariableIndex>,
}

impl Group {
    pub fn find_variable(&self, hash: u64) -> Option<usize> {
        self.variables.iter().position(|v| v.hash == hash)
    }
}

/// Where a merged variable lives inside one child partition.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PartitionRef {
    pub partno: u32,
    pub groupno: u32,
    pub varno: u32,
}

pub struct VariableIndex {
    pub id: VariableId,
    pub hash: u64,
    /// Indices into the owning group's coordinate list, in this variable's
    /// axis order.
    pub coord_indexes: Vec<usize>,
    pub nrecords: u32,
    pub ndups: u32,
    pub nmissing: u32,
    /// Vertical/ensemble axes disagreed across partitions (merged variables
    /// only).
    pub axes_differ: bool,
    /// Position and length of the serialized record block, once the
    /// variable has been written to or read from a container.
    pub record_block: Option<(u64, u32)>,
    /// Child references, for variables of a partition collection.
    pub parts: Vec<PartitionRef>,
    /// In-memory records: present after a build, absent after a read until
    /// lazily loaded.
    pub(crate) records: Option<SparseArray<RecordLocator>>,
}

impl VariableIndex {
    pub fn axes<'a>(&self, group: &'a Group) -> Vec<&'a Coordinate> {
        self.coord_indexes
            .iter()
            .map(|&idx| &group.coordinates[idx])
            .collect()
    }

    pub fn density(&self) -> f64 {
        let total = self.nrecords as f64 + self.nmissing as f64;
        if total == 0.0 {
            return 0.0;
        }

        self.nrecords as f64 / total
    }

    pub(crate) fn records(&self) -> Option<&SparseArray<RecordLocator>> {
        self.records.as_ref()
    }

    /// Translate a value tuple into this variable's index tuple. None when a
    /// needed value is absent from the tuple or from the axes, which is a
    /// normal "not found", not an error.
    pub fn index_tuple(&self, group: &Group, coords: &LookupCoords) -> Option<Vec<usize>> {
        let mut tuple = Vec::with_capacity(self.coord_indexes.len() + 1);
        for &idx in &self.coord_indexes {
            match &group.coordinates[idx] {
                Coordinate::Time2D(axis) => {
                    let (run, time) =
                        axis.index2d(coords.runtime?.millis(), coords.time?)?;
                    tuple.push(run);
                    tuple.push(time);
                }
                Coordinate::Runtime(axis) => {
                    tuple.push(axis.index(coords.runtime?.millis())?);
                }
                Coordinate::Time(axis) => match coords.time? {
                    TimeValue::Offset(off) => tuple.push(axis.index(off)?),
                    TimeValue::Interval(_) => return None,
                },
                Coordinate::TimeIntv(axis) => match coords.time? {
                    TimeValue::Interval(intv) => tuple.push(axis.index(intv)?),
                    TimeValue::Offset(_) => return None,
                },
                Coordinate::Vert(axis) => {
                    tuple.push(axis.index(coords.vert?)?);
                }
                Coordinate::Ens(axis) => {
                    tuple.push(axis.index(coords.ens?)?);
                }
            }
        }

        Some(tuple)
    }

    /// In-memory lookup, for a freshly built collection.
    pub fn lookup(&self, group: &Group, coords: &LookupCoords) -> Option<RecordLocator> {
        let tuple = self.index_tuple(group, coords)?;

        self.records.as_ref()?.get(&tuple).copied()
    }
}

/// A full coordinate tuple by value, as the array-serving layer presents it.
#[derive(Clone, Copy, Default, Debug)]
pub struct LookupCoords {
    pub runtime: Option<CalendarDate>,
    pub time: Option<TimeValue>,
    pub vert: Option<VertLevel>,
    pub ens: Option<EnsMember>,
}

/// Builds a leaf collection from one pass over a record stream.
pub struct CollectionBuilder {
    name: String,
    edition: u8,
    files: Vec<IndexedFile>,
}

/// Per-record problems are skipped and counted, never fatal.
#[derive(Default)]
struct Skipped {
    fractional_offset: u32,
    mixed_time_flavor: u32,
    inconsistent_axes: u32,
    unmapped: u32,
}

impl Skipped {
    fn total(&self) -> u32 {
        self.fractional_offset + self.mixed_time_flavor + self.inconsistent_axes + self.unmapped
    }
}

struct VarAccum {
    id: VariableId,
    is_interval: bool,
    time2d: Time2DBuilder,
    vert: Option<VertBuilder>,
    ens: Option<EnsBuilder>,
    entries: Vec<Entry>,
}

struct Entry {
    run: CalendarDate,
    value: TimeValue,
    vert: Option<VertLevel>,
    ens: Option<EnsMember>,
    locator: RecordLocator,
}

impl CollectionBuilder {
    pub fn new(name: impl Into<String>, edition: u8) -> Self {
        Self {
            name: name.into(),
            edition,
            files: Vec::new(),
        }
    }

    /// Register a scanned source file; records refer to it by the returned
    /// index.
    pub fn add_file(&mut self, path: impl Into<String>, last_modified: i64) -> u32 {
        self.files.push(IndexedFile {
            path: path.into(),
            last_modified,
        });

        (self.files.len() - 1) as u32
    }

    pub fn build(self, records: impl IntoIterator<Item = Record>) -> Result<Collection> {
        let mut groups: BTreeMap<u64, BTreeMap<u64, VarAccum>> = BTreeMap::new();
        let mut skipped = Skipped::default();
        let mut nscanned = 0u64;

        for record in records {
            nscanned += 1;
            self.accumulate(&mut groups, record, &mut skipped);
        }

        let mut out_groups = Vec::with_capacity(groups.len());
        let mut master: Option<RuntimeBuilder> = None;
        for (grid_hash, vars) in groups {
            let mut built = Vec::with_capacity(vars.len());
            let mut ids = Vec::with_capacity(vars.len());
            for (hash, accum) in vars {
                match Self::finish_variable(accum, &mut skipped)? {
                    Some((id, axes, array)) => {
                        ids.push((id, hash));
                        built.push((axes, array));
                    }
                    None => {
                        info!("dropping empty variable {hash:#x} in group {grid_hash:#x}");
                    }
                }
            }
            if built.is_empty() {
                continue;
            }

            let (coordinates, shared) = share_group(built)?;
            for coord in &coordinates {
                if let Coordinate::Time2D(axis) = coord {
                    master
                        .get_or_insert_with(|| RuntimeBuilder::new(axis.runtime().period()))
                        .add_all(axis.runtime());
                }
            }

            let variables = ids
                .into_iter()
                .zip(shared)
                .map(|((id, hash), var)| VariableIndex {
                    id,
                    hash,
                    coord_indexes: var.coord_indexes,
                    nrecords: var.array.records().len() as u32,
                    ndups: var.array.ndups(),
                    nmissing: var.array.count_missing() as u32,
                    axes_differ: false,
                    record_block: None,
                    parts: Vec::new(),
                    records: Some(var.array),
                })
                .collect();

            out_groups.push(Group {
                grid_hash,
                coordinates,
                variables,
            });
        }

        if skipped.total() > 0 {
            warn!(
                "{}: skipped {} of {} records (fractional offset {}, mixed time flavor {}, \
                 inconsistent axes {}, unmapped {})",
                self.name,
                skipped.total(),
                nscanned,
                skipped.fractional_offset,
                skipped.mixed_time_flavor,
                skipped.inconsistent_axes,
                skipped.unmapped,
            );
        }
        info!(
            "{}: indexed {} records into {} groups",
            self.name,
            nscanned - skipped.total() as u64,
            out_groups.len()
        );

        let master_runtime = master.map(|builder| builder.finish());
        let datasets = if out_groups.is_empty() {
            Vec::new()
        } else {
            vec![Dataset {
                kind: DatasetKind::TwoD,
                groups: out_groups,
            }]
        };

        Ok(Collection {
            name: self.name,
            edition: self.edition,
            kind: CollectionKind::Collection,
            files: self.files,
            datasets,
            master_runtime,
            run2part: Vec::new(),
            partitions: Vec::new(),
        })
    }

    fn accumulate(
        &self,
        groups: &mut BTreeMap<u64, BTreeMap<u64, VarAccum>>,
        record: Record,
        skipped: &mut Skipped,
    ) {
        // Rebase the record's time onto its run: offsets are stored relative
        // to the per-record reference date, which is not always the run.
        let shift = match record
            .time
            .period
            .offset_between(record.run_date, record.time.ref_date)
        {
            Ok(shift) => shift,
            Err(err) => {
                skipped.fractional_offset += 1;
                warn!("skipping record at {}: {err}", record.run_date);
                return;
            }
        };
        let shift = match i32::try_from(shift) {
            Ok(shift) => shift,
            Err(_) => {
                skipped.fractional_offset += 1;
                return;
            }
        };
        let value = record.time.value.shifted(shift);

        let accum = groups
            .entry(record.grid_hash)
            .or_default()
            .entry(record.id.cdm_hash())
            .or_insert_with(|| VarAccum {
                id: record.id,
                is_interval: value.is_interval(),
                time2d: Time2DBuilder::new(
                    value.is_interval(),
                    record.time.code,
                    record.time.period,
                ),
                vert: record
                    .vert
                    .as_ref()
                    .map(|v| VertBuilder::new(v.code, v.unit.clone())),
                ens: record.ens.map(|_| EnsBuilder::new()),
                entries: Vec::new(),
            });

        if value.is_interval() != accum.is_interval {
            skipped.mixed_time_flavor += 1;
            return;
        }
        if record.vert.is_some() != accum.vert.is_some()
            || record.ens.is_some() != accum.ens.is_some()
        {
            skipped.inconsistent_axes += 1;
            return;
        }

        accum.time2d.add(record.run_date, value);
        if let (Some(builder), Some(vert)) = (&mut accum.vert, &record.vert) {
            builder.add(vert.level);
        }
        if let (Some(builder), Some(ens)) = (&mut accum.ens, record.ens) {
            builder.add(ens);
        }
        accum.entries.push(Entry {
            run: record.run_date,
            value,
            vert: record.vert.map(|v| v.level),
            ens: record.ens,
            locator: record.locator,
        });
    }

    #[allow(clippy::type_complexity)]
    fn finish_variable(
        accum: VarAccum,
        skipped: &mut Skipped,
    ) -> Result<Option<(VariableId, Vec<Coordinate>, SparseArray<RecordLocator>)>> {
        if accum.entries.is_empty() {
            return Ok(None);
        }

        let time2d = accum.time2d.finish()?;
        let vert = accum.vert.map(|b| b.finish());
        let ens = accum.ens.map(|b| b.finish());

        let mut axes = vec![Coordinate::Time2D(time2d)];
        if let Some(vert) = vert {
            axes.push(Coordinate::Vert(vert));
        }
        if let Some(ens) = ens {
            axes.push(Coordinate::Ens(ens));
        }

        let mut shape = Vec::new();
        for axis in &axes {
            axis.push_shape(&mut shape);
        }

        let mut array = SparseArray::new(shape);
        for entry in accum.entries {
            let added = Self::entry_tuple(&axes, &entry)
                .map(|tuple| array.add(&tuple, entry.locator))
                .unwrap_or(false);
            if !added {
                skipped.unmapped += 1;
            }
        }

        Ok(Some((accum.id, axes, array)))
    }

    fn entry_tuple(axes: &[Coordinate], entry: &Entry) -> Option<Vec<usize>> {
        let mut tuple = Vec::new();
        for axis in axes {
            match axis {
                Coordinate::Time2D(axis) => {
                    let (run, time) = axis.index2d(entry.run.millis(), entry.value)?;
                    tuple.push(run);
                    tuple.push(time);
                }
                Coordinate::Vert(axis) => tuple.push(axis.index(entry.vert?)?),
                Coordinate::Ens(axis) => tuple.push(axis.index(entry.ens?)?),
                _ => return None,
            }
        }

        Some(tuple)
    }
}
