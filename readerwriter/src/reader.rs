use byteorder::{ByteOrder, LittleEndian};
use core::fmt;

use crate::MAX_VARINT_LENGTH;

/// Error kinds returned by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// Not enough bytes left to satisfy the read.
    InsufficientBytes,
    /// Input was fully parsed but some bytes were left over.
    TrailingBytes,
    /// Varint is overlong, overflows 64 bits or is not minimally encoded.
    InvalidVarint,
    /// Declared item count exceeds the allowed bound.
    TooManyItems,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::InsufficientBytes => write!(f, "insufficient bytes"),
            ReadError::TrailingBytes => write!(f, "trailing bytes"),
            ReadError::InvalidVarint => write!(f, "invalid varint"),
            ReadError::TooManyItems => write!(f, "too many items"),
        }
    }
}

impl std::error::Error for ReadError {}

/// An interface for reading binary data.
pub trait Reader {
    /// Copies bytes into a slice. If there is not enough bytes available,
    /// does not consume any byte and returns `ReadError::InsufficientBytes`.
    fn read(&mut self, dst: &mut [u8]) -> Result<(), ReadError>;

    /// Advances the internal cursor by the number of bytes.
    /// If there is not enough bytes, does nothing and returns `ReadError::InsufficientBytes`.
    fn advance(&mut self, cnt: usize) -> Result<(), ReadError>;

    /// Returns remaining number of bytes available for reading.
    fn remaining(&self) -> usize;

    /// Reads a single byte.
    #[inline]
    fn read_u8(&mut self) -> Result<u8, ReadError> {
        let mut buf = [0u8; 1];
        self.read(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a LE64-encoded integer.
    #[inline]
    fn read_u64(&mut self) -> Result<u64, ReadError> {
        let mut buf = [0u8; 8];
        self.read(&mut buf)?;
        Ok(LittleEndian::read_u64(&buf))
    }

    /// Reads a 32-byte array.
    #[inline]
    fn read_u8x32(&mut self) -> Result<[u8; 32], ReadError> {
        let mut buf = [0u8; 32];
        self.read(&mut buf)?;
        Ok(buf)
    }

    /// Reads an unsigned LEB128 integer.
    /// Only the minimal encoding of a value is accepted.
    fn read_varint(&mut self) -> Result<u64, ReadError> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LENGTH {
            let byte = self.read_u8()?;
            let payload = u64::from(byte & 0x7f);
            // the 10th byte may only carry the 64th bit
            if i == MAX_VARINT_LENGTH - 1 && payload > 1 {
                return Err(ReadError::InvalidVarint);
            }
            value |= payload << (7 * i);
            if byte & 0x80 == 0 {
                if byte == 0 && i > 0 {
                    return Err(ReadError::InvalidVarint);
                }
                return Ok(value);
            }
        }
        Err(ReadError::InvalidVarint)
    }

    /// Reads a varint item count and checks it against `max_items`
    /// and against the number of bytes left for items of `item_size` bytes each.
    fn read_length(&mut self, item_size: usize, max_items: usize) -> Result<usize, ReadError> {
        let n = self.read_varint()?;
        if n > max_items as u64 {
            return Err(ReadError::TooManyItems);
        }
        let n = n as usize;
        match n.checked_mul(item_size) {
            Some(len) if len <= self.remaining() => Ok(n),
            _ => Err(ReadError::InsufficientBytes),
        }
    }

    /// Wraps the reading logic in a block that checks that all bytes have been read.
    /// If some are left unread, returns `Err(From<ReadError::TrailingBytes>)`.
    /// Use method `skip_trailing_bytes` to ignore trailing bytes.
    fn parse<F, T, E>(&mut self, parse_fn: F) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<ReadError>,
    {
        let result = parse_fn(self)?;
        if self.remaining() != 0 {
            return Err(ReadError::TrailingBytes.into());
        }
        Ok(result)
    }

    /// Marks remaining unread bytes as read so that `parse` does not fail.
    /// Returns the number of skipped bytes.
    fn skip_trailing_bytes(&mut self) -> usize {
        let rem = self.remaining();
        match self.advance(rem) {
            Ok(()) => rem,
            Err(_) => 0,
        }
    }
}

impl<'a> Reader for &'a [u8] {
    #[inline]
    fn read(&mut self, dst: &mut [u8]) -> Result<(), ReadError> {
        let n = dst.len();
        let whole: &'a [u8] = *self;
        if whole.len() < n {
            return Err(ReadError::InsufficientBytes);
        }
        let (a, b) = whole.split_at(n);
        dst.copy_from_slice(a);
        *self = b;
        Ok(())
    }

    #[inline]
    fn advance(&mut self, cnt: usize) -> Result<(), ReadError> {
        let whole: &'a [u8] = *self;
        if whole.len() < cnt {
            return Err(ReadError::InsufficientBytes);
        }
        *self = &whole[cnt..];
        Ok(())
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Writer;

    fn varint(x: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_varint(b"x", x).unwrap();
        buf
    }

    #[test]
    fn varint_boundaries() {
        for &x in &[0u64, 1, 127, 128, 300, 1 << 35, u64::max_value()] {
            let bytes = varint(x);
            let mut r = &bytes[..];
            assert_eq!(r.read_varint(), Ok(x));
            assert_eq!(r.remaining(), 0);
        }
        assert_eq!(varint(127), vec![0x7f]);
        assert_eq!(varint(128), vec![0x80, 0x01]);
        assert_eq!(varint(u64::max_value()).len(), MAX_VARINT_LENGTH);
    }

    #[test]
    fn varint_rejects_bad_encodings() {
        // non-minimal zero
        assert_eq!((&[0x80u8, 0x00][..]).read_varint(), Err(ReadError::InvalidVarint));
        // truncated
        assert_eq!((&[0x80u8][..]).read_varint(), Err(ReadError::InsufficientBytes));
        // overflows 64 bits
        let overflow = [0xffu8, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02];
        assert_eq!((&overflow[..]).read_varint(), Err(ReadError::InvalidVarint));
        // 11 bytes long
        let overlong = [0x80u8, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x00];
        assert_eq!((&overlong[..]).read_varint(), Err(ReadError::InvalidVarint));
    }

    #[test]
    fn length_is_checked_against_input() {
        let mut bytes = varint(3);
        bytes.extend_from_slice(&[0u8; 16]);
        assert_eq!((&bytes[..]).read_length(8, 100), Err(ReadError::InsufficientBytes));
        assert_eq!((&bytes[..]).read_length(4, 100), Ok(3));
        assert_eq!((&bytes[..]).read_length(4, 2), Err(ReadError::TooManyItems));
    }

    #[test]
    fn parse_rejects_trailing_bytes() {
        let bytes = [1u8, 2, 3];
        let mut r = &bytes[..];
        let result: Result<u8, ReadError> = r.parse(|r| r.read_u8());
        assert_eq!(result, Err(ReadError::TrailingBytes));

        let mut r = &bytes[..];
        let result: Result<u8, ReadError> = r.parse(|r| {
            let x = r.read_u8()?;
            r.skip_trailing_bytes();
            Ok(x)
        });
        assert_eq!(result, Ok(1));
    }
}
