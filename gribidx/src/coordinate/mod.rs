//! Coordinate axes: deduplicated, canonically ordered value sets along one
//! dimension of a variable's record space.

use std::io::{Read, Write};

use crate::errors::{Error, Result};
use crate::extio::{ExtendedRead, ExtendedWrite, Serialize};

pub mod builder;
pub mod ensemble;
pub mod runtime;
pub mod share;
pub mod time;
pub mod time2d;
pub mod vertical;

pub use self::builder::{
    EnsBuilder, RuntimeBuilder, Time2DBuilder, TimeAxisBuilder, VertBuilder,
};
pub use self::ensemble::{CoordinateEns, EnsMember};
pub use self::runtime::CoordinateRuntime;
pub use self::time::{CoordinateTime, CoordinateTimeIntv, TimeInterval, TimeValue};
pub use self::time2d::{CoordinateTime2D, Time2DTimes, TimeAxis};
pub use self::vertical::{CoordinateVert, VertLevel};

/// Which axis family a coordinate belongs to. The declared order here is the
/// canonical order of axes within a group: time-like first, then vertical,
/// then ensemble.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum CoordKind {
    Time2D,
    Runtime,
    Time,
    TimeIntv,
    Vert,
    Ens,
}

/// What makes two axes "the same axis" for sharing and unions: the family
/// plus its type code. Distinct level types or time-unit codes never merge.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct AxisIdentity {
    pub kind: CoordKind,
    pub code: u8,
}

/// One coordinate axis of any kind.
#[derive(Clone, PartialEq, Debug)]
pub enum Coordinate {
    Runtime(CoordinateRuntime),
    Time(CoordinateTime),
    TimeIntv(CoordinateTimeIntv),
    Vert(CoordinateVert),
    Ens(CoordinateEns),
    Time2D(CoordinateTime2D),
}

impl Coordinate {
    pub fn kind(&self) -> CoordKind {
        match self {
            Coordinate::Runtime(_) => CoordKind::Runtime,
            Coordinate::Time(_) => CoordKind::Time,
            Coordinate::TimeIntv(_) => CoordKind::TimeIntv,
            Coordinate::Vert(_) => CoordKind::Vert,
            Coordinate::Ens(_) => CoordKind::Ens,
            Coordinate::Time2D(_) => CoordKind::Time2D,
        }
    }

    pub fn identity(&self) -> AxisIdentity {
        let code = match self {
            Coordinate::Runtime(_) | Coordinate::Ens(_) => 0,
            Coordinate::Time(axis) => axis.code(),
            Coordinate::TimeIntv(axis) => axis.code(),
            Coordinate::Vert(axis) => axis.code(),
            Coordinate::Time2D(axis) => {
                axis.time_coordinate(0).map(|t| t.code()).unwrap_or(0)
            }
        };

        AxisIdentity {
            kind: self.kind(),
            code,
        }
    }

    /// How many dimensions this axis contributes to a sparse array.
    pub fn ndims(&self) -> usize {
        match self {
            Coordinate::Time2D(_) => 2,
            _ => 1,
        }
    }

    /// Append this axis's dimension sizes to a shape under construction.
    pub fn push_shape(&self, shape: &mut Vec<usize>) {
        match self {
            Coordinate::Runtime(axis) => shape.push(axis.len()),
            Coordinate::Time(axis) => shape.push(axis.len()),
            Coordinate::TimeIntv(axis) => shape.push(axis.len()),
            Coordinate::Vert(axis) => shape.push(axis.len()),
            Coordinate::Ens(axis) => shape.push(axis.len()),
            Coordinate::Time2D(axis) => shape.extend(axis.shape()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Coordinate::Runtime(axis) => axis.is_empty(),
            Coordinate::Time(axis) => axis.is_empty(),
            Coordinate::TimeIntv(axis) => axis.is_empty(),
            Coordinate::Vert(axis) => axis.is_empty(),
            Coordinate::Ens(axis) => axis.is_empty(),
            Coordinate::Time2D(axis) => axis.nruns() == 0,
        }
    }

    /// Presentation name for the downstream dataset layer.
    pub fn name(&self) -> String {
        match self {
            Coordinate::Runtime(_) => String::from("reftime"),
            Coordinate::Time(_) | Coordinate::Time2D(_) => String::from("time"),
            Coordinate::TimeIntv(_) => String::from("time_intv"),
            Coordinate::Vert(axis) => format!("level{}", axis.code()),
            Coordinate::Ens(_) => String::from("ens"),
        }
    }

    /// Presentation unit for the downstream dataset layer.
    pub fn unit(&self) -> String {
        match self {
            Coordinate::Runtime(axis) => axis.period().to_string(),
            Coordinate::Time(axis) => axis.period().to_string(),
            Coordinate::TimeIntv(axis) => axis.period().to_string(),
            Coordinate::Time2D(axis) => axis.period().to_string(),
            Coordinate::Vert(axis) => axis.unit().to_string(),
            Coordinate::Ens(_) => String::new(),
        }
    }
}

impl From<TimeAxis> for Coordinate {
    fn from(axis: TimeAxis) -> Self {
        match axis {
            TimeAxis::Time(time) => Coordinate::Time(time),
            TimeAxis::Intv(intv) => Coordinate::TimeIntv(intv),
        }
    }
}

impl Serialize for Coordinate {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        match self {
            Coordinate::Runtime(axis) => {
                stream.write_byte(0)?;
                axis.write_to(stream)?;
            }
            Coordinate::Time(axis) => {
                stream.write_byte(1)?;
                axis.write_to(stream)?;
            }
            Coordinate::TimeIntv(axis) => {
                stream.write_byte(2)?;
                axis.write_to(stream)?;
            }
            Coordinate::Vert(axis) => {
                stream.write_byte(3)?;
                axis.write_to(stream)?;
            }
            Coordinate::Ens(axis) => {
                stream.write_byte(4)?;
                axis.write_to(stream)?;
            }
            Coordinate::Time2D(axis) => {
                stream.write_byte(5)?;
                axis.write_to(stream)?;
            }
        }

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        match stream.read_byte()? {
            0 => Ok(Coordinate::Runtime(CoordinateRuntime::read_from(stream)?)),
            1 => Ok(Coordinate::Time(CoordinateTime::read_from(stream)?)),
            2 => Ok(Coordinate::TimeIntv(CoordinateTimeIntv::read_from(stream)?)),
            3 => Ok(Coordinate::Vert(CoordinateVert::read_from(stream)?)),
            4 => Ok(Coordinate::Ens(CoordinateEns::read_from(stream)?)),
            5 => Ok(Coordinate::Time2D(CoordinateTime2D::read_from(stream)?)),
            other => Err(Error::Corrupt(format!("bad coordinate tag {other}"))),
        }
    }
}
