//! Per-namespace sources and sinks supplied by the caller.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use archivemux_frame::Namespace;

use crate::error::{MuxError, Result};

/// File extension of a namespace's record file.
pub const DATA_EXTENSION: &str = "bson";

/// Catalog metadata used when no metadata file exists.
pub const DEFAULT_METADATA: &str = r#"{"indexes":[]}"#;

/// A namespace to be written into an archive.
pub trait DumpIntent: Send {
    fn namespace(&self) -> &Namespace;

    /// Catalog entry stored in the prelude.
    fn metadata(&self) -> String;

    /// Expected data size, used to schedule large namespaces first.
    fn size_hint(&self) -> u64 {
        0
    }

    /// Open the stream of encoded records.
    fn open_source(&self) -> io::Result<Box<dyn Read + Send>>;
}

/// A namespace to be restored from an archive.
pub trait RestoreIntent: Send {
    fn namespace(&self) -> &Namespace;

    /// Open the destination for the namespace's records.
    fn open_sink(&self) -> io::Result<Box<dyn Write + Send>>;
}

/// A namespace stored as `<root>/<db>/<collection>.bson`.
#[derive(Debug, Clone)]
pub struct FileIntent {
    namespace: Namespace,
    path: PathBuf,
    metadata: String,
    size: u64,
}

impl FileIntent {
    /// Fails with [`MuxError::InvalidNamespace`] when either part of the
    /// namespace cannot be used as a single file name below `root`.
    pub fn new(root: &Path, namespace: Namespace) -> Result<Self> {
        let path = data_path(root, &namespace)?;
        Ok(Self {
            namespace,
            path,
            metadata: DEFAULT_METADATA.to_string(),
            size: 0,
        })
    }

    /// Set the catalog metadata.
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// Set the scheduling size hint.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DumpIntent for FileIntent {
    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn metadata(&self) -> String {
        self.metadata.clone()
    }

    fn size_hint(&self) -> u64 {
        self.size
    }

    fn open_source(&self) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

impl RestoreIntent for FileIntent {
    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn open_sink(&self) -> io::Result<Box<dyn Write + Send>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.path)?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Location of a namespace's record file below `root`.
///
/// Namespaces can come from an untrusted archive catalog, so both parts must
/// be plain file names: absolute paths, separators, NUL, `.` and `..` are
/// rejected rather than joined.
pub fn data_path(root: &Path, ns: &Namespace) -> Result<PathBuf> {
    if !is_plain_name(&ns.db) || !is_plain_name(&ns.collection) {
        return Err(MuxError::InvalidNamespace(ns.to_string()));
    }
    Ok(root
        .join(&ns.db)
        .join(format!("{}.{DATA_EXTENSION}", ns.collection)))
}

fn is_plain_name(part: &str) -> bool {
    if part.is_empty() || part.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(part).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("{prefix}-{}-{n}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn data_path_layout() {
        let ns = Namespace::new("shop", "orders.2024");
        let path = data_path(Path::new("/dump"), &ns).unwrap();
        assert_eq!(path, PathBuf::from("/dump/shop/orders.2024.bson"));
    }

    #[test]
    fn names_that_leave_the_root_are_rejected() {
        let root = Path::new("/dump");
        for (db, coll) in [
            ("x", "/etc/passwd"),
            ("/abs", "coll"),
            ("x", "../../escape"),
            ("..", "coll"),
            ("x", ".."),
            (".", "coll"),
            ("x", "a/b"),
            ("x", "a\\b"),
            ("x", "nul\0byte"),
            ("", "coll"),
        ] {
            let ns = Namespace::new(db, coll);
            assert!(
                matches!(data_path(root, &ns), Err(MuxError::InvalidNamespace(_))),
                "{db:?}.{coll:?} accepted"
            );
            assert!(FileIntent::new(root, ns).is_err());
        }
    }

    #[test]
    fn dotted_names_are_plain() {
        let path = data_path(Path::new("/dump"), &Namespace::new("db", "..hidden")).unwrap();
        assert_eq!(path, PathBuf::from("/dump/db/..hidden.bson"));
    }

    #[test]
    fn sink_creates_database_directory() {
        let root = unique_temp_dir("archivemux-intent");
        let intent = FileIntent::new(&root, Namespace::new("db", "coll")).unwrap();

        let mut sink = RestoreIntent::open_sink(&intent).unwrap();
        sink.write_all(b"payload").unwrap();
        sink.flush().unwrap();
        drop(sink);

        let mut source = intent.open_source().unwrap();
        let mut got = Vec::new();
        source.read_to_end(&mut got).unwrap();
        assert_eq!(got, b"payload");

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn missing_source_is_an_io_error() {
        let root = unique_temp_dir("archivemux-intent-missing");
        let intent = FileIntent::new(&root, Namespace::new("db", "absent")).unwrap();
        let err = intent.open_source().err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn defaults() {
        let intent = FileIntent::new(Path::new("/x"), Namespace::new("a", "b")).unwrap();
        assert_eq!(intent.metadata(), DEFAULT_METADATA);
        assert_eq!(intent.size_hint(), 0);
        let intent = intent.with_metadata("{}").with_size(42);
        assert_eq!(intent.metadata(), "{}");
        assert_eq!(intent.size_hint(), 42);
    }
}
