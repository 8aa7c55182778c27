//! Container reading.
//!
//! The metadata graph is decoded eagerly at open; record blocks are decoded
//! only when a variable's data is first requested, by a seek-then-read on
//! the shared file handle. The handle is behind a mutex: one open index is a
//! single seekable resource, so reads against it are serialized.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::{Cache, Cacheable};
use crate::collection::{
    Collection, CollectionKind, Dataset, DatasetKind, Group, LookupCoords, PartitionRef,
    VariableIndex,
};
use crate::coordinate::{Coordinate, CoordinateRuntime, TimeValue};
use crate::errors::{Error, Result};
use crate::extio::{ExtendedRead, Serialize};
use crate::partition::Partition;
use crate::record::{IndexedFile, RecordLocator, VariableId};
use crate::sparse::SparseArray;
use crate::time::CalendarDate;

use super::{parse_magic, MAGIC_LEN, MIN_VERSION};

/// Decoded record arrays kept per open index.
const ARRAY_CACHE_BYTES: u64 = 64 << 20;

/// Open child indexes kept per open partition index.
const CHILD_CACHE_BYTES: u64 = 64 << 20;

impl Cacheable for SparseArray<RecordLocator> {
    fn size(&self) -> u64 {
        (self.total() * 4 + self.records().len() * 24 + 64) as u64
    }
}

impl Cacheable for IndexReader {
    fn size(&self) -> u64 {
        self.metadata_len + 4096
    }
}

/// A record resolved all the way to its source file.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LocatedRecord {
    pub path: PathBuf,
    pub locator: RecordLocator,
}

impl LocatedRecord {
    /// The source path, failing distinctly when the data file has gone
    /// missing underneath the index.
    pub fn require_exists(&self) -> Result<&Path> {
        if !self.path.exists() {
            return Err(Error::DataFileNotFound(self.path.clone()));
        }

        Ok(&self.path)
    }
}

/// One open index file.
pub struct IndexReader {
    path: PathBuf,
    file: Mutex<File>,
    collection: Collection,
    metadata_len: u64,
    arrays: Cache<(u32, u32, u32), SparseArray<RecordLocator>>,
    children: Cache<u32, IndexReader>,
}

impl std::fmt::Debug for IndexReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexReader")
            .field("path", &self.path)
            .field("metadata_len", &self.metadata_len)
            .finish_non_exhaustive()
    }
}

impl IndexReader {
    /// Open and validate an index file, decoding the metadata graph but no
    /// record blocks.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; MAGIC_LEN];
        file.read_exact(&mut magic).map_err(truncated)?;
        let (kind, edition) =
            parse_magic(&magic).ok_or_else(|| Error::BadMagic(magic.to_vec()))?;

        let version = file.read_u32().map_err(truncated)?;
        if version < MIN_VERSION {
            return Err(Error::UnsupportedVersion {
                found: version,
                minimum: MIN_VERSION,
            });
        }

        let raw_len = file.read_u64().map_err(truncated)?;
        file.seek(SeekFrom::Current(raw_len as i64))?;

        let metadata_len = file.read_varint()?;
        let mut metadata = vec![0; metadata_len as usize];
        file.read_exact(&mut metadata).map_err(truncated)?;
        let collection = read_collection(&mut Cursor::new(metadata), kind, edition)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            collection,
            metadata_len,
            arrays: Cache::new(ARRAY_CACHE_BYTES),
            children: Cache::new(CHILD_CACHE_BYTES),
        })
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn into_collection(self) -> Collection {
        self.collection
    }

    /// The record array of one variable, decoded on first access and cached.
    pub fn sparse_array(
        &self,
        ds: usize,
        group: usize,
        var: usize,
    ) -> Result<Arc<SparseArray<RecordLocator>>> {
        let variable = self.variable(ds, group, var)?;
        let (pos, len) = variable.record_block.ok_or_else(|| {
            Error::Corrupt(format!("variable {:#x} has no record block", variable.hash))
        })?;
        let hash = variable.hash;

        self.arrays
            .get_or_load((ds as u32, group as u32, var as u32), || {
                let buffer = self.read_region(pos, len)?;
                SparseArray::read_block(&mut Cursor::new(buffer), hash)
            })
    }

    /// Find the record for a full coordinate tuple, by value. A tuple the
    /// index does not cover is Ok(None), the normal "not found".
    pub fn lookup(
        &self,
        kind: DatasetKind,
        group: usize,
        var: usize,
        coords: &LookupCoords,
    ) -> Result<Option<RecordLocator>> {
        Ok(self.locate(kind, group, var, coords)?.map(|rec| rec.locator))
    }

    /// Like `lookup`, also resolving the source data file. For a partition
    /// index this walks run2part into the supplying child.
    pub fn locate(
        &self,
        kind: DatasetKind,
        group_idx: usize,
        var_idx: usize,
        coords: &LookupCoords,
    ) -> Result<Option<LocatedRecord>> {
        let ds = self.dataset_pos(kind)?;
        let group = self.group_at(ds, group_idx)?;
        let variable = self.variable(ds, group_idx, var_idx)?;

        match self.collection.kind {
            CollectionKind::Collection => {
                let tuple = match variable.index_tuple(group, coords) {
                    Some(tuple) => tuple,
                    None => return Ok(None),
                };
                let array = self.sparse_array(ds, group_idx, var_idx)?;
                match array.get(&tuple) {
                    Some(&locator) => {
                        let file = self.collection.file(locator.file_index)?;
                        Ok(Some(LocatedRecord {
                            path: self.resolve_path(&file.path),
                            locator,
                        }))
                    }
                    None => Ok(None),
                }
            }
            CollectionKind::Partition => {
                let (run_date, child_coords) = match coords.runtime {
                    Some(run) => (run, *coords),
                    None => match self.best_run(group, variable, coords)? {
                        Some(resolved) => resolved,
                        None => return Ok(None),
                    },
                };

                let master = self.master_runtime()?;
                let master_idx = match master.index(run_date.millis()) {
                    Some(idx) => idx,
                    None => return Ok(None),
                };
                let partno = self
                    .collection
                    .run2part
                    .get(master_idx)
                    .copied()
                    .ok_or_else(|| {
                        Error::Corrupt(String::from("run2part shorter than master runtime"))
                    })?;
                let part = match variable.parts.iter().find(|p| p.partno == partno) {
                    Some(part) => part,
                    None => return Ok(None),
                };

                let child = self.child(partno)?;
                let child_kind = match child.collection().canonical_dataset() {
                    Some(dataset) => dataset.kind,
                    None => return Ok(None),
                };
                child.locate(
                    child_kind,
                    part.groupno as usize,
                    part.varno as usize,
                    &child_coords,
                )
            }
        }
    }

    /// Resolve a single valid-time lookup to its owning run: find the best
    /// axis position, follow time2runtime into the master runtime, and
    /// rebase the time value onto that run.
    fn best_run(
        &self,
        group: &Group,
        variable: &VariableIndex,
        coords: &LookupCoords,
    ) -> Result<Option<(CalendarDate, LookupCoords)>> {
        let time = match coords.time {
            Some(time) => time,
            None => return Ok(None),
        };

        for &idx in &variable.coord_indexes {
            let (pos, map, ref_date, period) = match (&group.coordinates[idx], time) {
                (Coordinate::Time(axis), TimeValue::Offset(off)) => {
                    match axis.time2runtime() {
                        Some(map) => (axis.index(off), map, axis.ref_date(), axis.period()),
                        None => continue,
                    }
                }
                (Coordinate::TimeIntv(axis), TimeValue::Interval(intv)) => {
                    match axis.time2runtime() {
                        Some(map) => (axis.index(intv), map, axis.ref_date(), axis.period()),
                        None => continue,
                    }
                }
                _ => continue,
            };

            let pos = match pos {
                Some(pos) => pos,
                None => return Ok(None),
            };
            let owner = map[pos];
            if owner == 0 {
                return Ok(None);
            }
            let run_date = self.master_runtime()?.date((owner - 1) as usize);

            let shift = period.offset_between(ref_date, run_date)?;
            let shift = i32::try_from(shift)
                .map_err(|_| Error::TimeRange(format!("run shift {shift} overflows")))?;
            let mut child = *coords;
            child.runtime = Some(run_date);
            child.time = Some(time.shifted(-shift));

            return Ok(Some((run_date, child)));
        }

        Ok(None)
    }

    fn master_runtime(&self) -> Result<&CoordinateRuntime> {
        self.collection.master_runtime.as_ref().ok_or_else(|| {
            Error::Corrupt(String::from("partition index without master runtime"))
        })
    }

    fn child(&self, partno: u32) -> Result<Arc<IndexReader>> {
        self.children.get_or_load(partno, || {
            let partition = self
                .collection
                .partitions
                .get(partno as usize)
                .ok_or_else(|| {
                    Error::Corrupt(format!("no partition {partno} in partition table"))
                })?;
            IndexReader::open(&self.resolve_path(&partition.index_path))
        })
    }

    fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.path.parent() {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        }
    }

    fn read_region(&self, pos: u64, len: u32) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos))?;
        let mut buffer = vec![0; len as usize];
        file.read_exact(&mut buffer).map_err(truncated)?;

        Ok(buffer)
    }

    fn dataset_pos(&self, kind: DatasetKind) -> Result<usize> {
        self.collection
            .datasets
            .iter()
            .position(|ds| ds.kind == kind)
            .ok_or_else(|| Error::BadName(format!("dataset {kind:?}")))
    }

    fn group_at(&self, ds: usize, group: usize) -> Result<&Group> {
        self.collection
            .datasets
            .get(ds)
            .and_then(|d| d.groups.get(group))
            .ok_or_else(|| Error::BadName(format!("group {group}")))
    }

    fn variable(&self, ds: usize, group: usize, var: usize) -> Result<&VariableIndex> {
        self.group_at(ds, group)?
            .variables
            .get(var)
            .ok_or_else(|| Error::BadName(format!("variable {var}")))
    }
}

fn truncated(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::Corrupt(String::from("truncated index"))
    } else {
        Error::IO(err)
    }
}

fn read_collection(
    stream: &mut impl Read,
    kind: CollectionKind,
    edition: u8,
) -> Result<Collection> {
    let name = stream.read_str()?;

    let nfiles = stream.read_varint()? as usize;
    let mut files = Vec::with_capacity(nfiles);
    for _ in 0..nfiles {
        files.push(IndexedFile::read_from(stream)?);
    }

    let master_runtime = match stream.read_byte()? {
        0 => None,
        _ => Some(CoordinateRuntime::read_from(stream)?),
    };

    let nruns = stream.read_varint()? as usize;
    let mut run2part = Vec::with_capacity(nruns);
    for _ in 0..nruns {
        run2part.push(stream.read_varint()? as u32);
    }

    let nparts = stream.read_varint()? as usize;
    let mut partitions = Vec::with_capacity(nparts);
    for _ in 0..nparts {
        partitions.push(Partition::read_from(stream)?);
    }

    let ndatasets = stream.read_varint()? as usize;
    let mut datasets = Vec::with_capacity(ndatasets);
    for _ in 0..ndatasets {
        datasets.push(read_dataset(stream)?);
    }

    Ok(Collection {
        name,
        edition,
        kind,
        files,
        datasets,
        master_runtime,
        run2part,
        partitions,
    })
}

fn read_dataset(stream: &mut impl Read) -> Result<Dataset> {
    let kind = match stream.read_byte()? {
        0 => DatasetKind::TwoD,
        1 => DatasetKind::Best,
        2 => DatasetKind::UniqueTime,
        other => return Err(Error::Corrupt(format!("bad dataset kind {other}"))),
    };

    let ngroups = stream.read_varint()? as usize;
    let mut groups = Vec::with_capacity(ngroups);
    for _ in 0..ngroups {
        groups.push(read_group(stream)?);
    }

    Ok(Dataset { kind, groups })
}

fn read_group(stream: &mut impl Read) -> Result<Group> {
    let grid_hash = stream.read_u64()?;

    let ncoords = stream.read_varint()? as usize;
    let mut coordinates = Vec::with_capacity(ncoords);
    for _ in 0..ncoords {
        coordinates.push(Coordinate::read_from(stream)?);
    }

    let nvars = stream.read_varint()? as usize;
    let mut variables = Vec::with_capacity(nvars);
    for _ in 0..nvars {
        variables.push(read_variable(stream)?);
    }

    Ok(Group {
        grid_hash,
        coordinates,
        variables,
    })
}

fn read_variable(stream: &mut impl Read) -> Result<VariableIndex> {
    let id = VariableId::read_from(stream)?;
    let hash = stream.read_u64()?;

    let ncoords = stream.read_varint()? as usize;
    let mut coord_indexes = Vec::with_capacity(ncoords);
    for _ in 0..ncoords {
        coord_indexes.push(stream.read_varint()? as usize);
    }

    let nrecords = stream.read_varint()? as u32;
    let ndups = stream.read_varint()? as u32;
    let nmissing = stream.read_varint()? as u32;
    let axes_differ = stream.read_byte()? != 0;

    let record_block = match stream.read_byte()? {
        0 => None,
        _ => {
            let pos = stream.read_varint()?;
            let len = stream.read_varint()? as u32;
            Some((pos, len))
        }
    };

    let nparts = stream.read_varint()? as usize;
    let mut parts = Vec::with_capacity(nparts);
    for _ in 0..nparts {
        parts.push(PartitionRef {
            partno: stream.read_varint()? as u32,
            groupno: stream.read_varint()? as u32,
            varno: stream.read_varint()? as u32,
        });
    }

    Ok(VariableIndex {
        id,
        hash,
        coord_indexes,
        nrecords,
        ndups,
        nmissing,
        axes_differ,
        record_block,
        parts,
        records: None,
    })
}
