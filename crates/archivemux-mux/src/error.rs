/// Errors that can occur while multiplexing or demultiplexing an archive.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Frame-level error, including corruption and I/O on the archive stream.
    #[error("frame error: {0}")]
    Frame(#[from] archivemux_frame::FrameError),

    /// I/O error on a per-namespace source or sink.
    #[error("I/O error on {namespace}: {source}")]
    Io {
        namespace: String,
        source: std::io::Error,
    },

    /// The namespace already has an open handle.
    #[error("namespace {0} is already open")]
    NamespaceInUse(String),

    /// The namespace already reached its end of stream in this archive.
    #[error("namespace {0} was already closed")]
    AlreadyClosed(String),

    /// The namespace is not part of the archive catalog.
    #[error("namespace {0} is not in the archive")]
    UnknownNamespace(String),

    /// The namespace has no database or collection part.
    #[error("invalid namespace '{0}'")]
    InvalidNamespace(String),

    /// Opening another handle would exceed the configured cap.
    #[error("too many open namespaces (max {max})")]
    TooManyNamespaces { max: usize },

    /// The engine's run loop has already returned.
    #[error("multiplexer is finished; namespace {0} can no longer be opened")]
    Finished(String),

    /// The engine stopped before the handle completed its exchange.
    #[error("engine stopped while {0} was in flight")]
    EngineGone(String),

    /// The consumer of a namespace went away before its end of stream.
    #[error("consumer for {0} went away before the namespace ended")]
    ConsumerGone(String),

    /// A worker thread panicked.
    #[error("{0} panicked")]
    WorkerPanicked(String),
}

impl MuxError {
    /// Returns true if this error reports a malformed archive.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Frame(err) if err.is_corrupt())
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
