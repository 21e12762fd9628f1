use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};

use crate::codec::{classify_prefix, FrameConfig, Prefix, Token};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Receives the tokens of one block.
///
/// `header` sees the first record after a delimiter (or at stream start),
/// `body` every following record up to the next delimiter. `end` is called
/// once when the input ends where a new header is expected. `offset` is the
/// stream position of the token, for error reporting.
pub trait ParserConsumer {
    fn header(&mut self, offset: u64, record: &[u8]) -> Result<()>;
    fn body(&mut self, offset: u64, record: &[u8]) -> Result<()>;
    fn end(&mut self, offset: u64) -> Result<()>;
}

/// Outcome of [`Parser::read_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// A complete block was consumed.
    Block,
    /// The input ended cleanly where a new block was expected.
    End,
}

/// Reads tokens from any `Read` stream.
///
/// Only the bytes of the current token are pulled from the inner stream, so a
/// parser can stop after the prelude block and hand the same input on.
pub struct Parser<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    offset: u64,
}

impl<T: Read> Parser<T> {
    /// Create a new parser with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new parser with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            offset: 0,
        }
    }

    /// Read the next token (blocking).
    ///
    /// Returns `Ok(None)` when the input ends before the first byte of a
    /// length prefix. Ending anywhere inside a token is corruption.
    pub fn read_token(&mut self) -> Result<Option<Token>> {
        match self.read_prefix()? {
            None => Ok(None),
            Some(Prefix::Delimiter) => Ok(Some(Token::Delimiter)),
            Some(Prefix::Record(size)) => {
                self.read_record_body(size)?;
                Ok(Some(Token::Record(self.buf.split().freeze())))
            }
        }
    }

    /// Read the next record of a delimiter-free record stream.
    pub fn next_record(&mut self) -> Result<Option<Bytes>> {
        let start = self.offset;
        match self.read_token()? {
            None => Ok(None),
            Some(Token::Record(record)) => Ok(Some(record)),
            Some(Token::Delimiter) => Err(FrameError::corrupt(
                start,
                "unexpected block delimiter in record stream",
            )),
        }
    }

    /// Read one `Header Body* Delimiter` block.
    pub fn read_block<C: ParserConsumer + ?Sized>(
        &mut self,
        consumer: &mut C,
    ) -> Result<BlockStatus> {
        let start = self.offset;
        let header = match self.read_token()? {
            None => {
                consumer.end(start)?;
                return Ok(BlockStatus::End);
            }
            Some(Token::Delimiter) => {
                return Err(FrameError::corrupt(
                    start,
                    "consecutive delimiters / empty blocks are not allowed",
                ));
            }
            Some(Token::Record(record)) => record,
        };
        consumer.header(start, &header)?;

        loop {
            let start = self.offset;
            match self.read_token()? {
                None => {
                    return Err(FrameError::corrupt(
                        start,
                        "input ended inside a block (missing delimiter)",
                    ));
                }
                Some(Token::Delimiter) => return Ok(BlockStatus::Block),
                Some(Token::Record(record)) => consumer.body(start, &record)?,
            }
        }
    }

    /// Read blocks until the input ends.
    pub fn read_all_blocks<C: ParserConsumer + ?Sized>(
        &mut self,
        consumer: &mut C,
    ) -> Result<()> {
        while self.read_block(consumer)? == BlockStatus::Block {}
        Ok(())
    }

    /// Fill `dst` with raw bytes outside the token grammar (the magic number).
    ///
    /// Returns fewer bytes than requested only at end of input.
    pub fn read_raw(&mut self, dst: &mut [u8]) -> Result<usize> {
        let filled = fill(&mut self.inner, dst)?;
        self.offset += filled as u64;
        Ok(filled)
    }

    /// Number of bytes consumed from the inner stream.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the parser and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum record size for subsequent tokens.
    pub fn set_max_record_size(&mut self, max_record_size: usize) {
        self.config.max_record_size = max_record_size;
    }

    /// Current parser configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn read_prefix(&mut self) -> Result<Option<Prefix>> {
        let start = self.offset;
        let mut prefix = [0u8; 4];
        let filled = fill(&mut self.inner, &mut prefix)?;
        self.offset += filled as u64;
        if filled == 0 {
            return Ok(None);
        }
        if filled < prefix.len() {
            return Err(FrameError::corrupt(
                start,
                format!("input ended after {filled} bytes of a length prefix"),
            ));
        }

        let prefix_kind = classify_prefix(prefix, self.config.max_record_size)
            .map_err(|reason| FrameError::corrupt(start, reason))?;
        if let Prefix::Record(_) = prefix_kind {
            self.buf.clear();
            self.buf.extend_from_slice(&prefix);
        }
        Ok(Some(prefix_kind))
    }

    fn read_record_body(&mut self, size: usize) -> Result<()> {
        let start = self.offset - 4;
        let have = self.buf.len();
        self.buf.resize(size, 0);
        let filled = fill(&mut self.inner, &mut self.buf[have..])?;
        self.offset += filled as u64;
        if have + filled < size {
            return Err(FrameError::corrupt(
                start,
                format!(
                    "input ended inside a {size} byte record ({} bytes read)",
                    have + filled
                ),
            ));
        }
        if self.buf[size - 1] != 0x00 {
            return Err(FrameError::corrupt(
                start,
                format!("{size} byte record does not end with a null byte"),
            ));
        }
        Ok(())
    }
}

/// Fill `dst` as far as the stream allows; short only at end of input.
fn fill<T: Read>(inner: &mut T, dst: &mut [u8]) -> Result<usize> {
    let mut filled = 0usize;
    while filled < dst.len() {
        match inner.read(&mut dst[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(filled)
}
