//! Container writing. The output is deterministic for identical logical
//! content: every map in the data model is ordered, and blocks are laid out
//! in dataset/group/variable order.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::collection::{Collection, Dataset, DatasetKind, Group, VariableIndex};
use crate::errors::Result;
use crate::extio::{ExtendedWrite, Serialize};

use super::{magic_for, HEADER_LEN, VERSION};

type BlockMap = BTreeMap<(usize, usize, usize), (u64, u32)>;

/// Write a collection to an index file.
pub fn write_index(collection: &Collection, path: &Path) -> Result<()> {
    let (raw, blocks) = build_raw_region(collection)?;

    let mut metadata = Vec::new();
    write_collection(&mut metadata, collection, &blocks)?;

    let mut stream = BufWriter::new(File::create(path)?);
    stream.write_all(magic_for(collection.kind, collection.edition))?;
    stream.write_u32(VERSION)?;
    stream.write_u64(raw.len() as u64)?;
    stream.write_all(&raw)?;
    stream.write_varint(metadata.len() as u64)?;
    stream.write_all(&metadata)?;
    stream.flush()?;

    Ok(())
}

/// Serialize every in-memory record array into the raw region, noting each
/// block's absolute file position and length.
fn build_raw_region(collection: &Collection) -> Result<(Vec<u8>, BlockMap)> {
    let mut raw = Vec::new();
    let mut blocks = BlockMap::new();
    for (ds_idx, dataset) in collection.datasets.iter().enumerate() {
        for (group_idx, group) in dataset.groups.iter().enumerate() {
            for (var_idx, var) in group.variables.iter().enumerate() {
                if let Some(array) = var.records() {
                    let pos = HEADER_LEN + raw.len() as u64;
                    array.write_block(var.hash, &mut raw)?;
                    let len = (HEADER_LEN + raw.len() as u64 - pos) as u32;
                    blocks.insert((ds_idx, group_idx, var_idx), (pos, len));
                }
            }
        }
    }

    Ok((raw, blocks))
}

fn write_collection(
    stream: &mut impl Write,
    collection: &Collection,
    blocks: &BlockMap,
) -> Result<()> {
    stream.write_str(&collection.name)?;

    stream.write_varint(collection.files.len() as u64)?;
    for file in &collection.files {
        file.write_to(stream)?;
    }

    match &collection.master_runtime {
        None => stream.write_byte(0)?,
        Some(runtime) => {
            stream.write_byte(1)?;
            runtime.write_to(stream)?;
        }
    }

    stream.write_varint(collection.run2part.len() as u64)?;
    for &part in &collection.run2part {
        stream.write_varint(part as u64)?;
    }

    stream.write_varint(collection.partitions.len() as u64)?;
    for partition in &collection.partitions {
        partition.write_to(stream)?;
    }

    stream.write_varint(collection.datasets.len() as u64)?;
    for (ds_idx, dataset) in collection.datasets.iter().enumerate() {
        write_dataset(stream, dataset, ds_idx, blocks)?;
    }

    Ok(())
}

fn write_dataset(
    stream: &mut impl Write,
    dataset: &Dataset,
    ds_idx: usize,
    blocks: &BlockMap,
) -> Result<()> {
    let kind = match dataset.kind {
        DatasetKind::TwoD => 0,
        DatasetKind::Best => 1,
        DatasetKind::UniqueTime => 2,
    };
    stream.write_byte(kind)?;

    stream.write_varint(dataset.groups.len() as u64)?;
    for (group_idx, group) in dataset.groups.iter().enumerate() {
        write_group(stream, group, ds_idx, group_idx, blocks)?;
    }

    Ok(())
}

fn write_group(
    stream: &mut impl Write,
    group: &Group,
    ds_idx: usize,
    group_idx: usize,
    blocks: &BlockMap,
) -> Result<()> {
    stream.write_u64(group.grid_hash)?;

    stream.write_varint(group.coordinates.len() as u64)?;
    for coord in &group.coordinates {
        coord.write_to(stream)?;
    }

    stream.write_varint(group.variables.len() as u64)?;
    for (var_idx, var) in group.variables.iter().enumerate() {
        write_variable(stream, var, blocks.get(&(ds_idx, group_idx, var_idx)).copied())?;
    }

    Ok(())
}

fn write_variable(
    stream: &mut impl Write,
    var: &VariableIndex,
    block: Option<(u64, u32)>,
) -> Result<()> {
    var.id.write_to(stream)?;
    stream.write_u64(var.hash)?;

    stream.write_varint(var.coord_indexes.len() as u64)?;
    for &idx in &var.coord_indexes {
        stream.write_varint(idx as u64)?;
    }

    stream.write_varint(var.nrecords as u64)?;
    stream.write_varint(var.ndups as u64)?;
    stream.write_varint(var.nmissing as u64)?;
    stream.write_byte(var.axes_differ as u8)?;

    match block.or(var.record_block) {
        None => stream.write_byte(0)?,
        Some((pos, len)) => {
            stream.write_byte(1)?;
            stream.write_varint(pos)?;
            stream.write_varint(len as u64)?;
        }
    }

    stream.write_varint(var.parts.len() as u64)?;
    for part in &var.parts {
        stream.write_varint(part.partno as u64)?;
        stream.write_varint(part.groupno as u64)?;
        stream.write_varint(part.varno as u64)?;
    }

    Ok(())
}
