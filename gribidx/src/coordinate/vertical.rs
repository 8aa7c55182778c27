use std::cmp::Ordering;
use std::io::{Read, Write};

use crate::errors::Result;
use crate::extio::{ExtendedRead, ExtendedWrite, Serialize};

/// One vertical level: a single value, or a (value1, value2) layer. Ordering
/// is numeric on value1 with layer ties broken by value2, which keeps the
/// axis order stable across rebuilds.
#[derive(Clone, Copy, Debug)]
pub struct VertLevel {
    pub value1: f64,
    pub value2: f64,
    pub is_layer: bool,
}

impl VertLevel {
    pub fn single(value: f64) -> Self {
        Self {
            value1: value,
            value2: 0.0,
            is_layer: false,
        }
    }

    pub fn layer(value1: f64, value2: f64) -> Self {
        Self {
            value1,
            value2,
            is_layer: true,
        }
    }
}

impl PartialEq for VertLevel {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VertLevel {}

impl Ord for VertLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value1
            .total_cmp(&other.value1)
            .then(self.value2.total_cmp(&other.value2))
            .then(self.is_layer.cmp(&other.is_layer))
    }
}

impl PartialOrd for VertLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The vertical axis: distinct levels of one level type, ascending.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CoordinateVert {
    code: u8,
    unit: String,
    levels: Vec<VertLevel>,
}

impl CoordinateVert {
    pub(crate) fn new(code: u8, unit: String, levels: Vec<VertLevel>) -> Self {
        debug_assert!(levels.windows(2).all(|w| w[0] < w[1]));

        Self { code, unit, levels }
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[VertLevel] {
        &self.levels
    }

    pub fn value(&self, idx: usize) -> VertLevel {
        self.levels[idx]
    }

    pub fn index(&self, level: VertLevel) -> Option<usize> {
        self.levels.binary_search(&level).ok()
    }
}

impl Serialize for CoordinateVert {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_byte(self.code)?;
        stream.write_str(&self.unit)?;
        stream.write_varint(self.levels.len() as u64)?;
        for level in &self.levels {
            stream.write_byte(level.is_layer as u8)?;
            stream.write_f64(level.value1)?;
            stream.write_f64(level.value2)?;
        }

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        let code = stream.read_byte()?;
        let unit = stream.read_str()?;
        let n = stream.read_varint()? as usize;
        let mut levels = Vec::with_capacity(n);
        for _ in 0..n {
            let is_layer = stream.read_byte()? != 0;
            let value1 = stream.read_f64()?;
            let value2 = stream.read_f64()?;
            levels.push(VertLevel {
                value1,
                value2,
                is_layer,
            });
        }

        Ok(Self { code, unit, levels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_ordering() {
        let mut levels = vec![
            VertLevel::layer(850.0, 900.0),
            VertLevel::single(500.0),
            VertLevel::layer(850.0, 875.0),
        ];
        levels.sort();
        assert_eq!(levels[0], VertLevel::single(500.0));
        assert_eq!(levels[1], VertLevel::layer(850.0, 875.0));
        assert_eq!(levels[2], VertLevel::layer(850.0, 900.0));
    }

    #[test]
    fn test_index_lookup() {
        let axis = CoordinateVert::new(
            100,
            String::from("Pa"),
            vec![VertLevel::single(500.0), VertLevel::single(850.0)],
        );
        assert_eq!(axis.index(VertLevel::single(850.0)), Some(1));
        assert_eq!(axis.index(VertLevel::single(700.0)), None);
    }

    #[test]
    fn test_serialize_round_trip() -> Result<()> {
        let axis = CoordinateVert::new(
            100,
            String::from("Pa"),
            vec![
                VertLevel::single(500.0),
                VertLevel::layer(850.0, 900.0),
            ],
        );
        let mut buffer = Vec::new();
        axis.write_to(&mut buffer)?;
        assert_eq!(CoordinateVert::read_from(&mut Cursor::new(buffer))?, axis);

        Ok(())
    }
}
