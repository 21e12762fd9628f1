use bytes::Bytes;

use crate::error::{FrameError, Result};

/// Magic number opening every archive, stored as a little-endian int32.
pub const MAGIC_NUMBER: i32 = 0x6DE9_818B;

/// Block delimiter: a little-endian int32 with all bits set.
pub const DELIMITER: i32 = -1;

/// Wire bytes of [`DELIMITER`].
pub const DELIMITER_BYTES: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Length prefix (4) + trailing null byte (1).
pub const MIN_RECORD_SIZE: usize = 5;

/// Default maximum record size: 16 MiB, the largest BSON document.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Archive format version written into the prelude header.
pub const FORMAT_VERSION: &str = "0.1";

/// A token recognized in the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A block delimiter.
    Delimiter,
    /// A complete record, length prefix and trailing null included.
    Record(Bytes),
}

impl Token {
    /// Returns true if this token is a block delimiter.
    pub fn is_delimiter(&self) -> bool {
        matches!(self, Token::Delimiter)
    }
}

/// What a 4-byte length prefix announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    Delimiter,
    Record(usize),
}

/// Interpret a 4-byte prefix.
///
/// Fails with the reason the value is neither a delimiter nor an acceptable
/// record length; the caller attaches the stream offset.
pub fn classify_prefix(
    bytes: [u8; 4],
    max_record_size: usize,
) -> std::result::Result<Prefix, String> {
    let size = i32::from_le_bytes(bytes);
    if size == DELIMITER {
        return Ok(Prefix::Delimiter);
    }
    if size < MIN_RECORD_SIZE as i32 || size as i64 > max_record_size as i64 {
        return Err(format!(
            "{size} is neither a valid record length nor a block delimiter"
        ));
    }
    Ok(Prefix::Record(size as usize))
}

/// Check that `record` is exactly one encoded record.
///
/// Wire format:
/// ```text
/// ┌────────────────┬──────────────────────┬──────┐
/// │ Length (4B LE) │ Body (Length-5 B)    │ 0x00 │
/// │ incl. itself   │                      │      │
/// └────────────────┴──────────────────────┴──────┘
/// ```
pub fn validate_record(record: &[u8], max_record_size: usize) -> Result<()> {
    if record.len() > max_record_size {
        return Err(FrameError::RecordTooLarge {
            size: record.len(),
            max: max_record_size,
        });
    }
    if record.len() < MIN_RECORD_SIZE {
        return Err(FrameError::InvalidRecord {
            reason: format!("{} bytes is shorter than the minimum record", record.len()),
        });
    }

    let declared = i32::from_le_bytes([record[0], record[1], record[2], record[3]]);
    if declared < 0 || declared as usize != record.len() {
        return Err(FrameError::InvalidRecord {
            reason: format!(
                "length prefix {declared} does not match buffer length {}",
                record.len()
            ),
        });
    }
    if record[record.len() - 1] != 0x00 {
        return Err(FrameError::InvalidRecord {
            reason: "record does not end with a null byte".to_string(),
        });
    }
    Ok(())
}

/// Configuration shared by the parser and the block writer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum record size in bytes. Default: 16 MiB.
    pub max_record_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
        }
    }
}
