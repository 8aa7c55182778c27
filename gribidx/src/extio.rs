//! Extend Read and Write with some convenience methods for binary i/o
//!
use std::io::{self, Read, Write};

use unsigned_varint::{
    encode::{u64 as varint_encode_u64, u64_buffer as varint_u64_buffer},
    io::{read_u64 as varint_read_u64, ReadError},
};

use crate::errors::{Error, Result};

pub(crate) trait Serialize: Sized {
    /// Write self to a stream
    fn write_to(&self, stream: &mut impl Write) -> Result<()>;

    /// Read Self from a stream
    fn read_from(stream: &mut impl Read) -> Result<Self>;
}

pub(crate) trait ExtendedRead: Read {
    /// Read a byte from a stream
    fn read_byte(&mut self) -> io::Result<u8>;

    /// Read a Big Endian encoded 32 bit unsigned integer from a stream
    fn read_u32(&mut self) -> io::Result<u32>;

    /// Read a Big Endian encoded 64 bit unsigned integer from a stream
    fn read_u64(&mut self) -> io::Result<u64>;

    /// Read a Big Endian encoded 64 bit float from a stream
    fn read_f64(&mut self) -> io::Result<f64>;

    /// Read a varint encoded unsigned integer from a stream
    fn read_varint(&mut self) -> Result<u64>;

    /// Read a zigzag varint encoded signed integer from a stream
    fn read_varint_signed(&mut self) -> Result<i64>;

    /// Read a length-prefixed UTF-8 string from a stream
    fn read_str(&mut self) -> Result<String>;
}

impl<R: Read> ExtendedRead for R {
    fn read_byte(&mut self) -> io::Result<u8> {
        let mut buffer = [0; 1];
        self.read_exact(&mut buffer)?;

        Ok(buffer[0])
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        let mut buffer = [0; 4];
        self.read_exact(&mut buffer)?;

        Ok(u32::from_be_bytes(buffer))
    }

    fn read_u64(&mut self) -> io::Result<u64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer)?;

        Ok(u64::from_be_bytes(buffer))
    }

    fn read_f64(&mut self) -> io::Result<f64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer)?;

        Ok(f64::from_be_bytes(buffer))
    }

    fn read_varint(&mut self) -> Result<u64> {
        match varint_read_u64(&mut *self) {
            Ok(value) => Ok(value),
            Err(ReadError::Io(err)) => Err(Error::IO(err)),
            Err(err) => Err(Error::Corrupt(format!("bad varint: {err}"))),
        }
    }

    fn read_varint_signed(&mut self) -> Result<i64> {
        let raw = self.read_varint()?;

        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    fn read_str(&mut self) -> Result<String> {
        let length = self.read_varint()? as usize;
        let mut buffer = vec![0; length];
        self.read_exact(&mut buffer)?;

        String::from_utf8(buffer).map_err(|_| Error::Corrupt(String::from("bad utf-8 string")))
    }
}

pub(crate) trait ExtendedWrite: Write {
    /// Write a byte to a stream
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Write a Big Endian encoded 32 bit unsigned integer to a stream
    fn write_u32(&mut self, word: u32) -> io::Result<()>;

    /// Write a Big Endian encoded 64 bit unsigned integer to a stream
    fn write_u64(&mut self, word: u64) -> io::Result<()>;

    /// Write a Big Endian encoded 64 bit float to a stream
    fn write_f64(&mut self, word: f64) -> io::Result<()>;

    /// Write a varint encoded unsigned integer to a stream
    fn write_varint(&mut self, word: u64) -> io::Result<()>;

    /// Write a zigzag varint encoded signed integer to a stream
    fn write_varint_signed(&mut self, word: i64) -> io::Result<()>;

    /// Write a length-prefixed UTF-8 string to a stream
    fn write_str(&mut self, value: &str) -> io::Result<()>;
}

impl<W: Write> ExtendedWrite for W {
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_all(&[byte])?;

        Ok(())
    }

    fn write_u32(&mut self, word: u32) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())?;

        Ok(())
    }

    fn write_u64(&mut self, word: u64) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())?;

        Ok(())
    }

    fn write_f64(&mut self, word: f64) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())?;

        Ok(())
    }

    fn write_varint(&mut self, word: u64) -> io::Result<()> {
        let mut buffer = varint_u64_buffer();
        self.write_all(varint_encode_u64(word, &mut buffer))?;

        Ok(())
    }

    fn write_varint_signed(&mut self, word: i64) -> io::Result<()> {
        self.write_varint(((word << 1) ^ (word >> 63)) as u64)
    }

    fn write_str(&mut self, value: &str) -> io::Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_all(value.as_bytes())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_all_of_it() -> Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        buffer.write_byte(42)?;
        buffer.write_u32(31441968)?;
        buffer.write_u64(0xdeadbeef00)?;
        buffer.write_f64(6.283184)?;
        buffer.write_varint(1968)?;
        buffer.write_varint_signed(-31441968)?;
        buffer.write_varint_signed(31441968)?;
        buffer.write_str("isobaric surface")?;

        let mut buffer = Cursor::new(buffer);
        assert_eq!(buffer.read_byte()?, 42);
        assert_eq!(buffer.read_u32()?, 31441968);
        assert_eq!(buffer.read_u64()?, 0xdeadbeef00);
        assert_eq!(buffer.read_f64()?, 6.283184);
        assert_eq!(buffer.read_varint()?, 1968);
        assert_eq!(buffer.read_varint_signed()?, -31441968);
        assert_eq!(buffer.read_varint_signed()?, 31441968);
        assert_eq!(buffer.read_str()?, "isobaric surface");

        Ok(())
    }

    #[test]
    fn test_truncated_string_is_corrupt() {
        let mut buffer: Vec<u8> = Vec::new();
        buffer.write_varint(100).unwrap();
        buffer.extend_from_slice(b"short");

        let result = Cursor::new(buffer).read_str();
        assert!(matches!(result, Err(Error::IO(_))));
    }
}
