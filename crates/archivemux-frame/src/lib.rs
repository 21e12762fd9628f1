//! Record framing and prelude codec for multiplexed dump archives.
//!
//! An archive is a single byte stream carrying the records of many
//! namespaces. It is built from two token kinds:
//! - A length-prefixed record (4-byte little-endian length including itself,
//!   last byte `0x00`), treated as an opaque blob
//! - A 4-byte block delimiter (`0xFFFFFFFF`)
//!
//! Records are grouped into `Header Body* Delimiter` blocks. The first block
//! after the magic number is the prelude.

pub mod codec;
pub mod error;
pub mod header;
pub mod prelude;
pub mod reader;
pub mod writer;

pub use codec::{
    validate_record, FrameConfig, Token, DEFAULT_MAX_RECORD_SIZE, DELIMITER, DELIMITER_BYTES,
    FORMAT_VERSION, MAGIC_NUMBER, MIN_RECORD_SIZE,
};
pub use error::{FrameError, Result};
pub use header::{ArchiveHeader, CollectionHeader, CollectionMetadata, Namespace};
pub use prelude::{read_prelude, write_prelude, ArchivePrelude};
pub use reader::{BlockStatus, Parser, ParserConsumer};
pub use writer::BlockWriter;
