//! Shared fixtures for module tests: deterministic records and small built
//! collections.

use crate::collection::{Collection, CollectionBuilder};
use crate::coordinate::TimeValue;
use crate::errors::Result;
use crate::record::{Record, RecordLocator, TimeDesc, VariableId};
use crate::time::{CalendarDate, Period};

const HOUR: i64 = 3_600_000;

pub(crate) fn variable_id() -> VariableId {
    VariableId {
        discipline: 0,
        category: 0,
        parameter: 0,
        level_type: 1,
        stat_type: 255,
        table_version: 2,
    }
}

pub(crate) fn locator(seq: u64) -> RecordLocator {
    RecordLocator::new(0, 1000 + seq * 100)
}

/// One instantaneous record: run at `run_hour`, forecast offset `offset`
/// hours, payload locator derived from `seq`.
pub(crate) fn record(run_hour: i64, offset: i32, seq: u64) -> Record {
    let run_date = CalendarDate::from_millis(run_hour * HOUR);

    Record {
        run_date,
        time: TimeDesc {
            code: 1,
            period: Period::hour(),
            ref_date: run_date,
            value: TimeValue::Offset(offset),
        },
        vert: None,
        ens: None,
        id: variable_id(),
        grid_hash: 0x1111,
        locator: locator(seq),
    }
}

/// The concrete scenario: offsets {0,6,12} at the 00Z run and {0,6} at the
/// 06Z run, sequence numbers 0..5 in that order.
pub(crate) fn two_run_records() -> Vec<Record> {
    vec![
        record(0, 0, 0),
        record(0, 6, 1),
        record(0, 12, 2),
        record(6, 0, 3),
        record(6, 6, 4),
    ]
}

pub(crate) fn two_run_collection() -> Result<Collection> {
    let mut builder = CollectionBuilder::new("two-run", 2);
    builder.add_file("model.grib2", 1968);

    builder.build(two_run_records())
}

/// A one-variable collection with the given runs and per-run offsets;
/// sequence numbers count up across all records in declaration order.
pub(crate) fn collection_with_runs(name: &str, runs: &[(i64, Vec<i32>)]) -> Result<Collection> {
    let mut builder = CollectionBuilder::new(name, 2);
    builder.add_file(format!("{name}.grib2"), 0);

    let mut records = Vec::new();
    let mut seq = 0;
    for (run_hour, offsets) in runs {
        for &offset in offsets {
            records.push(record(*run_hour, offset, seq));
            seq += 1;
        }
    }

    builder.build(records)
}
