use std::io::{ErrorKind, Write};

use serde::Serialize;

use crate::codec::{validate_record, FrameConfig, DELIMITER_BYTES, MAGIC_NUMBER};
use crate::error::{FrameError, Result};
use crate::header::to_record;

/// Writes magic numbers, records and delimiters to any `Write` stream.
///
/// Records are validated before they reach the stream, so everything a
/// `BlockWriter` emits can be read back by a [`Parser`](crate::Parser).
pub struct BlockWriter<T> {
    inner: T,
    config: FrameConfig,
    written: u64,
}

impl<T: Write> BlockWriter<T> {
    /// Create a new block writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new block writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            config,
            written: 0,
        }
    }

    /// Write the archive magic number.
    pub fn write_magic(&mut self) -> Result<()> {
        self.write_all(&MAGIC_NUMBER.to_le_bytes())
    }

    /// Write one already-encoded record.
    pub fn write_record(&mut self, record: &[u8]) -> Result<usize> {
        validate_record(record, self.config.max_record_size)?;
        self.write_all(record)?;
        Ok(record.len())
    }

    /// Encode a header document and write it as a record.
    pub fn write_header<H: Serialize>(&mut self, header: &H) -> Result<usize> {
        let record = to_record(header)?;
        self.write_record(&record)
    }

    /// Write a block delimiter.
    pub fn write_delimiter(&mut self) -> Result<()> {
        self.write_all(&DELIMITER_BYTES)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Total bytes written to the underlying stream.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum record size for subsequent records.
    pub fn set_max_record_size(&mut self, max_record_size: usize) {
        self.config.max_record_size = max_record_size;
    }

    /// Current block writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::Io(ErrorKind::WriteZero.into())),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        self.written += bytes.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::Token;
    use crate::header::{CollectionHeader, Namespace};
    use crate::reader::Parser;

    fn record(body: &[u8]) -> Vec<u8> {
        let len = (body.len() + 5) as i32;
        let mut out = len.to_le_bytes().to_vec();
        out.extend_from_slice(body);
        out.push(0);
        out
    }

    #[test]
    fn writes_magic_little_endian() {
        let mut writer = BlockWriter::new(Vec::new());
        writer.write_magic().unwrap();
        assert_eq!(writer.into_inner(), vec![0x8B, 0x81, 0xE9, 0x6D]);
    }

    #[test]
    fn block_is_readable_by_parser() {
        let ns = Namespace::new("foo", "bar");
        let mut writer = BlockWriter::new(Vec::new());
        writer.write_header(&CollectionHeader::open(&ns)).unwrap();
        writer.write_record(&record(b"one")).unwrap();
        writer.write_delimiter().unwrap();
        let total = writer.bytes_written();

        let wire = writer.into_inner();
        assert_eq!(wire.len() as u64, total);

        let mut parser = Parser::new(Cursor::new(wire));
        assert!(matches!(parser.read_token().unwrap(), Some(Token::Record(_))));
        assert_eq!(
            parser.read_token().unwrap(),
            Some(Token::Record(record(b"one").into()))
        );
        assert_eq!(parser.read_token().unwrap(), Some(Token::Delimiter));
        assert_eq!(parser.read_token().unwrap(), None);
    }

    #[test]
    fn rejects_invalid_records_without_writing() {
        let mut writer = BlockWriter::new(Vec::new());
        let err = writer.write_record(b"not a record").unwrap_err();
        assert!(matches!(err, FrameError::InvalidRecord { .. }));
        assert_eq!(writer.bytes_written(), 0);
        assert!(writer.get_ref().is_empty());
    }

    #[test]
    fn rejects_oversized_records() {
        let mut writer = BlockWriter::with_config(
            Vec::new(),
            FrameConfig {
                max_record_size: 8,
            },
        );
        let err = writer.write_record(&record(b"too long")).unwrap_err();
        assert!(matches!(err, FrameError::RecordTooLarge { .. }));
    }

    #[test]
    fn write_zero_is_an_io_error() {
        let mut writer = BlockWriter::new(ZeroWriter);
        let err = writer.write_delimiter().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WriteZero));
    }

    #[test]
    fn interrupted_write_retries() {
        let mut writer = BlockWriter::new(InterruptedOnce {
            interrupted: false,
            inner: Cursor::new(Vec::new()),
        });
        writer.write_delimiter().unwrap();
        assert_eq!(writer.into_inner().inner.into_inner(), DELIMITER_BYTES.to_vec());
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct InterruptedOnce {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Write for InterruptedOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
