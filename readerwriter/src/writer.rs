use core::fmt;
use core::mem;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteError {
    InsufficientCapacity,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::InsufficientCapacity => write!(f, "insufficient capacity"),
        }
    }
}

impl std::error::Error for WriteError {}

/// Interface for writing binary data.
pub trait Writer {
    /// Writes bytes with the given label. If there is no sufficient capacity,
    /// performs no modifications and returns WriteError::InsufficientCapacity.
    fn write(&mut self, label: &'static [u8], src: &[u8]) -> Result<(), WriteError>;

    /// Remaining number of bytes that can be written.
    fn remaining_capacity(&self) -> usize;

    /// Writes a single byte.
    #[inline]
    fn write_u8(&mut self, label: &'static [u8], x: u8) -> Result<(), WriteError> {
        self.write(label, &[x])
    }

    /// Writes a LE64-encoded integer.
    #[inline]
    fn write_u64(&mut self, label: &'static [u8], x: u64) -> Result<(), WriteError> {
        self.write(label, &x.to_le_bytes())
    }

    /// Writes an unsigned LEB128 integer in its minimal form.
    fn write_varint(&mut self, label: &'static [u8], mut x: u64) -> Result<(), WriteError> {
        let mut buf = [0u8; crate::MAX_VARINT_LENGTH];
        let mut n = 0;
        loop {
            let byte = (x & 0x7f) as u8;
            x >>= 7;
            if x == 0 {
                buf[n] = byte;
                n += 1;
                break;
            }
            buf[n] = byte | 0x80;
            n += 1;
        }
        self.write(label, &buf[..n])
    }
}

/// Returns the number of bytes `write_varint` produces for `x`.
pub fn varint_length(x: u64) -> usize {
    let bits = 64 - x.leading_zeros() as usize;
    if bits == 0 {
        1
    } else {
        (bits + 6) / 7
    }
}

impl Writer for Vec<u8> {
    #[inline]
    fn write(&mut self, _label: &'static [u8], src: &[u8]) -> Result<(), WriteError> {
        self.extend_from_slice(src);
        Ok(())
    }

    #[inline]
    fn write_u8(&mut self, _label: &'static [u8], x: u8) -> Result<(), WriteError> {
        self.push(x);
        Ok(())
    }

    #[inline]
    fn remaining_capacity(&self) -> usize {
        usize::max_value()
    }
}

impl Writer for &mut [u8] {
    #[inline]
    fn write(&mut self, _label: &'static [u8], src: &[u8]) -> Result<(), WriteError> {
        let n = src.len();
        if n <= self.remaining_capacity() {
            let (a, b) = mem::replace(self, &mut []).split_at_mut(n);
            a.copy_from_slice(src);
            *self = b;
            Ok(())
        } else {
            Err(WriteError::InsufficientCapacity)
        }
    }

    #[inline]
    fn remaining_capacity(&self) -> usize {
        self.len()
    }
}
