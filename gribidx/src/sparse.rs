//! The per-variable record addressing structure: a dense shape with sparse
//! occupancy.
//!
//! `track` holds, for every cell of the coordinate space, either 0 (no
//! record) or `k` meaning `records[k - 1]`. Duplicates are counted but not
//! stored; the last record written to a cell wins, which matches reprocessed
//! files replacing earlier ones.

use std::io::{Read, Write};

use ndarray::{ArrayD, Dimension, IxDyn};

use crate::errors::{Error, Result};
use crate::extio::{ExtendedRead, ExtendedWrite, Serialize};

#[derive(Clone, PartialEq, Debug)]
pub struct SparseArray<T> {
    shape: Vec<usize>,
    track: ArrayD<u32>,
    records: Vec<T>,
    ndups: u32,
}

impl<T> SparseArray<T> {
    pub fn new(shape: Vec<usize>) -> Self {
        let track = ArrayD::zeros(IxDyn(&shape));

        Self {
            shape,
            track,
            records: Vec::new(),
            ndups: 0,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Product of the shape: the number of addressable cells.
    pub fn total(&self) -> usize {
        self.shape.iter().product()
    }

    /// Store a record at `index`. An occupied cell is overwritten (last
    /// write wins) and counted as a duplicate. Returns false when `index`
    /// is out of range for the shape.
    pub fn add(&mut self, index: &[usize], record: T) -> bool {
        let cell = match self.track.get_mut(IxDyn(index)) {
            Some(cell) => cell,
            None => return false,
        };

        if *cell == 0 {
            self.records.push(record);
            *cell = self.records.len() as u32;
        } else {
            self.records[(*cell - 1) as usize] = record;
            self.ndups += 1;
        }

        true
    }

    /// The record at `index`, or None for a vacant or out-of-range tuple.
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        let cell = *self.track.get(IxDyn(index))?;
        if cell == 0 {
            return None;
        }

        self.records.get((cell - 1) as usize)
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn ndups(&self) -> u32 {
        self.ndups
    }

    pub(crate) fn set_ndups(&mut self, ndups: u32) {
        self.ndups = ndups;
    }

    pub fn count_not_missing(&self) -> usize {
        self.track.iter().filter(|&&cell| cell != 0).count()
    }

    pub fn count_missing(&self) -> usize {
        self.total() - self.count_not_missing()
    }

    pub fn density(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }

        self.count_not_missing() as f64 / total as f64
    }

    /// Visit every occupied cell as (coordinate tuple, record).
    pub fn iter_filled(&self) -> impl Iterator<Item = (Vec<usize>, &T)> {
        self.track.indexed_iter().filter_map(move |(idx, &cell)| {
            if cell == 0 {
                None
            } else {
                Some((idx.slice().to_vec(), &self.records[(cell - 1) as usize]))
            }
        })
    }
}

impl<T: Serialize> SparseArray<T> {
    /// Serialize as a self-describing block, stamped with the owning
    /// variable's hash so a misdirected block is detectable at lazy-load.
    pub(crate) fn write_block(&self, variable_hash: u64, stream: &mut impl Write) -> Result<()> {
        stream.write_u64(variable_hash)?;
        stream.write_varint(self.shape.len() as u64)?;
        for &dim in &self.shape {
            stream.write_varint(dim as u64)?;
        }
        for &cell in self.track.iter() {
            stream.write_varint(cell as u64)?;
        }
        stream.write_varint(self.records.len() as u64)?;
        for record in &self.records {
            record.write_to(stream)?;
        }
        stream.write_varint(self.ndups as u64)?;

        Ok(())
    }

    pub(crate) fn read_block(stream: &mut impl Read, variable_hash: u64) -> Result<Self> {
        let found = stream.read_u64()?;
        if found != variable_hash {
            return Err(Error::CorruptRecordBlock {
                expected: variable_hash,
                found,
            });
        }

        let ndims = stream.read_varint()? as usize;
        let mut shape = Vec::with_capacity(ndims);
        for _ in 0..ndims {
            shape.push(stream.read_varint()? as usize);
        }
        let total: usize = shape.iter().product();
        let mut cells = Vec::with_capacity(total);
        for _ in 0..total {
            cells.push(stream.read_varint()? as u32);
        }
        let track = ArrayD::from_shape_vec(IxDyn(&shape), cells)
            .map_err(|err| Error::Corrupt(format!("bad track shape: {err}")))?;

        let nrecords = stream.read_varint()? as usize;
        let mut records = Vec::with_capacity(nrecords);
        for _ in 0..nrecords {
            records.push(T::read_from(stream)?);
        }
        let ndups = stream.read_varint()? as u32;

        Ok(Self {
            shape,
            track,
            records,
            ndups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordLocator;
    use std::io::Cursor;

    #[test]
    fn test_address_round_trip() {
        let mut array = SparseArray::new(vec![2, 3]);
        assert!(array.add(&[0, 0], "a"));
        assert!(array.add(&[0, 2], "b"));
        assert!(array.add(&[1, 1], "c"));

        assert_eq!(array.get(&[0, 0]), Some(&"a"));
        assert_eq!(array.get(&[0, 2]), Some(&"b"));
        assert_eq!(array.get(&[1, 1]), Some(&"c"));
        assert_eq!(array.get(&[1, 0]), None);

        assert_eq!(array.count_not_missing(), 3);
        assert_eq!(array.count_missing(), 3);
        assert_eq!(array.count_not_missing() + array.count_missing(), array.total());
    }

    #[test]
    fn test_out_of_range_is_not_found() {
        let mut array = SparseArray::new(vec![2, 3]);
        array.add(&[0, 0], "a");

        assert!(!array.add(&[2, 0], "b"));
        assert_eq!(array.get(&[0, 3]), None);
        assert_eq!(array.get(&[0]), None);
        assert_eq!(array.get(&[0, 0, 0]), None);
    }

    #[test]
    fn test_last_duplicate_wins() {
        let mut array = SparseArray::new(vec![2]);
        array.add(&[1], "first");
        array.add(&[1], "second");

        assert_eq!(array.get(&[1]), Some(&"second"));
        assert_eq!(array.ndups(), 1);
        assert_eq!(array.records().len(), 1);
        assert_eq!(array.count_not_missing(), 1);
    }

    #[test]
    fn test_block_round_trip() -> Result<()> {
        let mut array = SparseArray::new(vec![2, 2]);
        array.add(&[0, 1], RecordLocator::new(0, 100));
        array.add(&[1, 0], RecordLocator::new(1, 200));
        array.add(&[1, 0], RecordLocator::new(1, 300));

        let mut buffer = Vec::new();
        array.write_block(0xfeed, &mut buffer)?;
        let read = SparseArray::<RecordLocator>::read_block(&mut Cursor::new(&buffer[..]), 0xfeed)?;
        assert_eq!(read, array);
        assert_eq!(read.ndups(), 1);

        Ok(())
    }

    #[test]
    fn test_block_hash_mismatch_is_corrupt() -> Result<()> {
        let mut array = SparseArray::new(vec![1]);
        array.add(&[0], RecordLocator::new(0, 100));
        let mut buffer = Vec::new();
        array.write_block(0xfeed, &mut buffer)?;

        let result = SparseArray::<RecordLocator>::read_block(&mut Cursor::new(&buffer[..]), 0xbeef);
        assert!(matches!(result, Err(Error::CorruptRecordBlock { .. })));

        Ok(())
    }
}
