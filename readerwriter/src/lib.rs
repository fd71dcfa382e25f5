//! Binary reader and writer traits used by the accumulator wire formats.
mod codable;
mod reader;
mod writer;

pub use codable::{Decodable, Encodable};
pub use reader::{ReadError, Reader};
pub use writer::{varint_length, WriteError, Writer};

/// Maximum length in bytes of a LEB128-encoded `u64`.
pub const MAX_VARINT_LENGTH: usize = 10;
