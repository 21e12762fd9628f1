//! Concurrent multiplexing of namespace record streams into one archive.
//!
//! A [`Multiplexer`] owns the output stream and accepts any number of
//! [`MuxIn`] producers; a [`Demultiplexer`] owns the input stream and hands
//! each namespace's records to its [`DemuxOut`] consumer. Both sides apply
//! backpressure: a producer's write returns once its record is on the
//! output, and the demultiplexer waits for a consumer to take each record.
//!
//! [`ArchiveWriter`] and [`ArchiveReader`] drive the engines for whole
//! archives from per-namespace intents.

pub mod archive;
pub mod config;
pub mod demultiplexer;
pub mod error;
pub mod intent;
pub mod multiplexer;
pub mod stats;

pub use archive::{ArchiveReader, ArchiveWriter, DEFAULT_CONCURRENCY};
pub use config::MuxConfig;
pub use demultiplexer::{DemuxHandle, DemuxOut, Demultiplexer};
pub use error::{MuxError, Result};
pub use intent::{data_path, DumpIntent, FileIntent, RestoreIntent, DEFAULT_METADATA};
pub use multiplexer::{MuxHandle, MuxIn, Multiplexer};
pub use stats::{NamespaceStats, Summary};
