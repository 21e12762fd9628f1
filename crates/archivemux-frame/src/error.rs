/// Errors that can occur while framing or parsing an archive stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream does not start with the archive magic number.
    #[error("stream or file does not appear to be a dump archive (magic {found:#010x})")]
    NotAnArchive { found: u32 },

    /// The stream violates the archive grammar.
    #[error("corrupt archive at offset {offset}: {reason}")]
    CorruptArchive { offset: u64, reason: String },

    /// A record exceeds the configured maximum size.
    #[error("record too large ({size} bytes, max {max})")]
    RecordTooLarge { size: usize, max: usize },

    /// A caller handed over bytes that are not a single encoded record.
    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },

    /// The same namespace appears twice in a prelude catalog.
    #[error("duplicate namespace {0} in prelude catalog")]
    DuplicateNamespace(String),

    /// A header document could not be encoded.
    #[error("header encoding error: {0}")]
    Encode(#[from] bson::ser::Error),

    /// An I/O error occurred on the underlying sink or source.
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Build a [`FrameError::CorruptArchive`] for the given stream offset.
    pub fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptArchive {
            offset,
            reason: reason.into(),
        }
    }

    /// Returns true if this error reports a malformed stream.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptArchive { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
