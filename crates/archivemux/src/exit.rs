use std::fmt;
use std::io;

use archivemux_frame::FrameError;
use archivemux_mux::MuxError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

fn io_code(kind: io::ErrorKind) -> i32 {
    match kind {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound | io::ErrorKind::BrokenPipe => FAILURE,
        io::ErrorKind::InvalidData => DATA_INVALID,
        _ => INTERNAL,
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(io_code(err.kind()), format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::NotAnArchive { .. }
        | FrameError::CorruptArchive { .. }
        | FrameError::RecordTooLarge { .. }
        | FrameError::InvalidRecord { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::DuplicateNamespace(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn mux_error(context: &str, err: MuxError) -> CliError {
    match err {
        MuxError::Frame(err) => frame_error(context, err),
        MuxError::Io { ref source, .. } => {
            CliError::new(io_code(source.kind()), format!("{context}: {err}"))
        }
        MuxError::NamespaceInUse(_)
        | MuxError::AlreadyClosed(_)
        | MuxError::UnknownNamespace(_)
        | MuxError::InvalidNamespace(_)
        | MuxError::TooManyNamespaces { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        MuxError::ConsumerGone(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_archive_maps_to_data_invalid() {
        let err = mux_error("verify failed", MuxError::Frame(FrameError::corrupt(12, "bad")));
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.starts_with("verify failed: corrupt archive at offset 12"));
    }

    #[test]
    fn namespace_io_keeps_namespace_in_message() {
        let err = mux_error(
            "unpack failed",
            MuxError::Io {
                namespace: "db.coll".into(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            },
        );
        assert_eq!(err.code, PERMISSION_DENIED);
        assert!(err.message.contains("db.coll"));
    }

    #[test]
    fn unknown_namespace_is_usage() {
        let err = mux_error("unpack failed", MuxError::UnknownNamespace("a.b".into()));
        assert_eq!(err.code, USAGE);
    }
}
