use std::io::{Read, Write};

use crate::errors::Result;
use crate::extio::{ExtendedRead, ExtendedWrite, Serialize};
use crate::time::{CalendarDate, Period};

/// The runtime (reference time) axis: distinct model run instants in
/// chronological order. The first date is the epoch for all run-offset
/// arithmetic in a two-dimensional time coordinate.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CoordinateRuntime {
    period: Period,
    runtimes: Vec<i64>,
}

impl CoordinateRuntime {
    /// `runtimes` must already be sorted and deduplicated (the builder's
    /// contract).
    pub(crate) fn new(runtimes: Vec<i64>, period: Period) -> Self {
        debug_assert!(runtimes.windows(2).all(|w| w[0] < w[1]));

        Self { period, runtimes }
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn first_date(&self) -> Option<CalendarDate> {
        self.runtimes.first().map(|&m| CalendarDate::from_millis(m))
    }

    pub fn date(&self, idx: usize) -> CalendarDate {
        CalendarDate::from_millis(self.runtimes[idx])
    }

    pub fn millis(&self) -> &[i64] {
        &self.runtimes
    }

    /// Position of a run instant in the axis, or None if absent.
    pub fn index(&self, millis: i64) -> Option<usize> {
        self.runtimes.binary_search(&millis).ok()
    }
}

impl Serialize for CoordinateRuntime {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        self.period.write_to(stream)?;
        stream.write_varint(self.runtimes.len() as u64)?;
        let mut prev = 0;
        for (i, &millis) in self.runtimes.iter().enumerate() {
            if i == 0 {
                stream.write_varint_signed(millis)?;
            } else {
                // Sorted, so deltas are positive and varint-small.
                stream.write_varint((millis - prev) as u64)?;
            }
            prev = millis;
        }

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        let period = Period::read_from(stream)?;
        let n = stream.read_varint()? as usize;
        let mut runtimes = Vec::with_capacity(n);
        let mut prev = 0;
        for i in 0..n {
            let millis = if i == 0 {
                stream.read_varint_signed()?
            } else {
                prev + stream.read_varint()? as i64
            };
            runtimes.push(millis);
            prev = millis;
        }

        Ok(Self { period, runtimes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeUnit;
    use std::io::Cursor;

    fn hours(hs: &[i64]) -> CoordinateRuntime {
        CoordinateRuntime::new(
            hs.iter().map(|h| h * 3_600_000).collect(),
            Period::new(1, TimeUnit::Hour),
        )
    }

    #[test]
    fn test_index_and_dates() {
        let runtime = hours(&[0, 6, 12]);
        assert_eq!(runtime.len(), 3);
        assert_eq!(runtime.first_date(), Some(CalendarDate::from_millis(0)));
        assert_eq!(runtime.date(2), CalendarDate::from_millis(12 * 3_600_000));
        assert_eq!(runtime.index(6 * 3_600_000), Some(1));
        assert_eq!(runtime.index(7 * 3_600_000), None);
    }

    #[test]
    fn test_serialize_round_trip() -> Result<()> {
        let runtime = hours(&[-6, 0, 6, 12, 48]);
        let mut buffer = Vec::new();
        runtime.write_to(&mut buffer)?;

        let read = CoordinateRuntime::read_from(&mut Cursor::new(buffer))?;
        assert_eq!(read, runtime);

        Ok(())
    }
}
