//! The record stream consumed from the GRIB decoding collaborator, and the
//! physical locators the index stores for each kept record.

use std::io::{Read, Write};

use crate::coordinate::{EnsMember, TimeValue, VertLevel};
use crate::errors::Result;
use crate::extio::{ExtendedRead, ExtendedWrite, Serialize};
use crate::time::{CalendarDate, Period};

/// Identity of one logical variable, hashed from its decoded metadata.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct VariableId {
    pub discipline: u8,
    pub category: u8,
    pub parameter: u8,
    pub level_type: u8,
    pub stat_type: u8,
    pub table_version: u8,
}

impl VariableId {
    /// Deterministic FNV-1a over the identity fields. Persisted in each
    /// record block so a block that drifted from its owner is detectable.
    pub fn cdm_hash(&self) -> u64 {
        const OFFSET: u64 = 0xcbf29ce484222325;
        const PRIME: u64 = 0x100000001b3;

        let fields = [
            self.discipline,
            self.category,
            self.parameter,
            self.level_type,
            self.stat_type,
            self.table_version,
        ];
        let mut hash = OFFSET;
        for byte in fields {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(PRIME);
        }

        hash
    }
}

impl Serialize for VariableId {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_byte(self.discipline)?;
        stream.write_byte(self.category)?;
        stream.write_byte(self.parameter)?;
        stream.write_byte(self.level_type)?;
        stream.write_byte(self.stat_type)?;
        stream.write_byte(self.table_version)?;

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        Ok(Self {
            discipline: stream.read_byte()?,
            category: stream.read_byte()?,
            parameter: stream.read_byte()?,
            level_type: stream.read_byte()?,
            stat_type: stream.read_byte()?,
            table_version: stream.read_byte()?,
        })
    }
}

/// The time description carried by one record: a single offset or an
/// interval, in `period` units, relative to `ref_date` (which may differ
/// from the run date; the builder rebases it).
#[derive(Clone, Debug)]
pub struct TimeDesc {
    pub code: u8,
    pub period: Period,
    pub ref_date: CalendarDate,
    pub value: TimeValue,
}

/// The vertical description carried by one record.
#[derive(Clone, Debug)]
pub struct VertDesc {
    pub code: u8,
    pub unit: String,
    pub level: VertLevel,
}

/// One decoded record, as delivered by the GRIB collaborator.
#[derive(Clone, Debug)]
pub struct Record {
    pub run_date: CalendarDate,
    pub time: TimeDesc,
    pub vert: Option<VertDesc>,
    pub ens: Option<EnsMember>,
    pub id: VariableId,
    pub grid_hash: u64,
    pub locator: RecordLocator,
}

/// Where one kept record lives on disk: enough to reopen and decode that one
/// message without rescanning.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RecordLocator {
    pub file_index: u32,
    pub offset: u64,
    pub bitmap_offset: Option<u64>,
    pub data_offset: Option<u64>,
}

impl RecordLocator {
    pub fn new(file_index: u32, offset: u64) -> Self {
        Self {
            file_index,
            offset,
            bitmap_offset: None,
            data_offset: None,
        }
    }
}

impl Serialize for RecordLocator {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_varint(self.file_index as u64)?;
        stream.write_varint(self.offset)?;
        let flags =
            self.bitmap_offset.is_some() as u8 | (self.data_offset.is_some() as u8) << 1;
        stream.write_byte(flags)?;
        if let Some(pos) = self.bitmap_offset {
            stream.write_varint(pos)?;
        }
        if let Some(pos) = self.data_offset {
            stream.write_varint(pos)?;
        }

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        let file_index = stream.read_varint()? as u32;
        let offset = stream.read_varint()?;
        let flags = stream.read_byte()?;
        let bitmap_offset = if flags & 1 != 0 {
            Some(stream.read_varint()?)
        } else {
            None
        };
        let data_offset = if flags & 2 != 0 {
            Some(stream.read_varint()?)
        } else {
            None
        };

        Ok(Self {
            file_index,
            offset,
            bitmap_offset,
            data_offset,
        })
    }
}

/// One scanned source file: referenced from record locators by position in
/// the collection's file table.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IndexedFile {
    pub path: String,
    pub last_modified: i64,
}

impl Serialize for IndexedFile {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_str(&self.path)?;
        stream.write_varint_signed(self.last_modified)?;

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        Ok(Self {
            path: stream.read_str()?,
            last_modified: stream.read_varint_signed()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_cdm_hash_is_stable_and_distinct() {
        let temp = VariableId {
            discipline: 0,
            category: 0,
            parameter: 0,
            level_type: 100,
            stat_type: 255,
            table_version: 2,
        };
        let rh = VariableId { parameter: 1, ..temp };

        assert_eq!(temp.cdm_hash(), temp.cdm_hash());
        assert_ne!(temp.cdm_hash(), rh.cdm_hash());
    }

    #[test]
    fn test_locator_round_trip() -> Result<()> {
        let locators = vec![
            RecordLocator::new(0, 1234),
            RecordLocator {
                file_index: 7,
                offset: 1 << 40,
                bitmap_offset: Some(99),
                data_offset: Some(140),
            },
        ];
        for locator in locators {
            let mut buffer = Vec::new();
            locator.write_to(&mut buffer)?;
            assert_eq!(RecordLocator::read_from(&mut Cursor::new(buffer))?, locator);
        }

        Ok(())
    }
}
