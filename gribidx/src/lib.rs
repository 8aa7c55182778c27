//! Coordinate indexing for collections of gridded weather-model output.
//!
//! A one-pass scan over decoded GRIB records builds, per variable, a set of
//! deduplicated coordinate axes and a sparse record-addressing array; the
//! result is persisted in a compact binary container that supports random
//! access without loading whole record arrays. Many such indexes (one per
//! day, say) merge into a single time-spanning partition index without
//! rescanning raw data, including the derived "Best" single valid-time view.

mod cache;
mod codec;
mod collection;
pub mod coordinate;
mod errors;
mod extio;
mod partition;
mod record;
mod sparse;
#[cfg(test)]
mod testing;
mod time;

pub use cache::{Cache, Cacheable};
pub use codec::reader::{IndexReader, LocatedRecord};
pub use codec::writer::write_index;
pub use collection::{
    Collection, CollectionBuilder, CollectionKind, Dataset, DatasetKind, Group, LookupCoords,
    PartitionRef, VariableIndex,
};
pub use coordinate::share::IntervalFilter;
pub use coordinate::{
    Coordinate, CoordinateEns, CoordinateRuntime, CoordinateTime, CoordinateTime2D,
    CoordinateTimeIntv, CoordinateVert, EnsMember, TimeAxis, TimeInterval, TimeValue, VertLevel,
};
pub use errors::{Error, Result};
pub use partition::{Partition, PartitionMerge, PartitionOrder, PartitionSortKey};
pub use record::{IndexedFile, Record, RecordLocator, TimeDesc, VariableId, VertDesc};
pub use sparse::SparseArray;
pub use time::{CalendarDate, Period, TimeUnit};
