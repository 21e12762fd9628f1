//! Whole-archive write and read built on the two engines.

use std::cmp::Reverse;
use std::collections::{HashSet, VecDeque};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use archivemux_frame::{
    read_prelude, write_prelude, ArchiveHeader, ArchivePrelude, BlockWriter, CollectionMetadata,
    FrameConfig, FrameError, Namespace, Parser,
};

use crate::config::MuxConfig;
use crate::demultiplexer::{DemuxOut, Demultiplexer};
use crate::error::{MuxError, Result};
use crate::intent::{DumpIntent, RestoreIntent};
use crate::multiplexer::{MuxHandle, MuxIn, Multiplexer};
use crate::stats::Summary;

/// Namespaces dumped at the same time unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Writes a complete archive from a set of dump intents.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    concurrency: usize,
    config: MuxConfig,
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            config: MuxConfig::default(),
        }
    }
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of namespaces dumped in parallel (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Engine configuration. A `max_open_namespaces` cap must exceed the
    /// concurrency: a worker opens its next namespace before closing the
    /// current one.
    pub fn with_config(mut self, config: MuxConfig) -> Self {
        self.config = config;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Write the prelude and every intent's records to `out`.
    ///
    /// Intents are dumped largest first on up to `concurrency` worker
    /// threads while the calling thread runs the multiplexer. If this
    /// returns an error the output must be treated as unusable.
    pub fn write<W, I>(&self, out: W, mut intents: Vec<I>) -> Result<Summary>
    where
        W: Write,
        I: DumpIntent,
    {
        intents.sort_by_key(|intent| Reverse(intent.size_hint()));

        let metas = intents
            .iter()
            .map(|intent| CollectionMetadata::new(intent.namespace(), intent.metadata()))
            .collect();
        let concurrent = i32::try_from(self.concurrency).unwrap_or(i32::MAX);
        let prelude = ArchivePrelude::new(ArchiveHeader::new(concurrent), metas)?;

        let mut writer = BlockWriter::with_config(out, self.config.frame_config());
        write_prelude(&mut writer, &prelude)?;
        let mut mux = Multiplexer::from_writer(writer, self.config.clone());

        // Open the first batch before the run loop starts so it cannot observe
        // an empty registry.
        let mut queue: VecDeque<I> = intents.into();
        let mut first = Vec::new();
        while first.len() < self.concurrency {
            let Some(intent) = queue.pop_front() else {
                break;
            };
            let input = mux.open(intent.namespace().clone())?;
            first.push((intent, input));
        }
        tracing::debug!(
            workers = first.len(),
            queued = queue.len(),
            "dump started"
        );

        let pool = DumpPool {
            queue: Mutex::new(queue),
            handle: mux.handle(),
            failed: AtomicBool::new(false),
            frame: self.config.frame_config(),
        };

        let (mux_result, worker_results) = thread::scope(|s| {
            let workers: Vec<_> = first
                .into_iter()
                .enumerate()
                .map(|(index, (intent, input))| {
                    let pool = &pool;
                    let worker = s.spawn(move || pool.work(intent, input));
                    (index, worker)
                })
                .collect();

            let mux_result = mux.run();
            let worker_results: Vec<Result<()>> = workers
                .into_iter()
                .map(|(index, worker)| {
                    worker.join().unwrap_or_else(|_| {
                        Err(MuxError::WorkerPanicked(format!("dump worker {index}")))
                    })
                })
                .collect();
            (mux_result, worker_results)
        });

        let summary = mux_result?;
        worker_results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(summary)
    }
}

struct DumpPool<I> {
    queue: Mutex<VecDeque<I>>,
    handle: MuxHandle,
    failed: AtomicBool,
    frame: FrameConfig,
}

impl<I: DumpIntent> DumpPool<I> {
    fn work(&self, intent: I, input: MuxIn) -> Result<()> {
        let result = self.work_queue(intent, input);
        if let Err(err) = &result {
            self.failed.store(true, Ordering::SeqCst);
            tracing::warn!(error = %err, "dump worker stopped");
        }
        result
    }

    fn work_queue(&self, mut intent: I, mut input: MuxIn) -> Result<()> {
        loop {
            self.pump(&intent, &mut input)?;

            // Attach the next namespace before detaching this one so the
            // multiplexer never sees an empty registry while work remains.
            let next = match self.next_intent() {
                Some(next) => {
                    let next_input = self.handle.open(next.namespace().clone())?;
                    Some((next, next_input))
                }
                None => None,
            };
            input.close()?;

            match next {
                Some((next, next_input)) => {
                    intent = next;
                    input = next_input;
                }
                None => return Ok(()),
            }
        }
    }

    fn next_intent(&self) -> Option<I> {
        if self.failed.load(Ordering::SeqCst) {
            return None;
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn pump(&self, intent: &I, input: &mut MuxIn) -> Result<()> {
        let ns = intent.namespace();
        let source = intent.open_source().map_err(|source| MuxError::Io {
            namespace: ns.to_string(),
            source,
        })?;
        let mut parser = Parser::with_config(source, self.frame.clone());
        while let Some(record) = parser.next_record().map_err(|err| source_error(ns, err))? {
            input.write(&record)?;
        }
        Ok(())
    }
}

fn source_error(ns: &Namespace, err: FrameError) -> MuxError {
    match err {
        FrameError::Io(source) => MuxError::Io {
            namespace: ns.to_string(),
            source,
        },
        other => MuxError::Frame(other),
    }
}

/// Reads an archive: the prelude on open, data blocks on demand.
pub struct ArchiveReader<R> {
    parser: Parser<R>,
    prelude: ArchivePrelude,
    config: MuxConfig,
}

impl<R: Read> ArchiveReader<R> {
    /// Read the magic number and prelude.
    pub fn open(input: R) -> Result<Self> {
        Self::open_with_config(input, MuxConfig::default())
    }

    pub fn open_with_config(input: R, config: MuxConfig) -> Result<Self> {
        let mut parser = Parser::with_config(input, config.frame_config());
        let prelude = read_prelude(&mut parser)?;
        tracing::debug!(
            namespaces = prelude.collection_metadatas().len(),
            version = %prelude.header().format_version,
            "archive opened"
        );
        Ok(Self {
            parser,
            prelude,
            config,
        })
    }

    pub fn prelude(&self) -> &ArchivePrelude {
        &self.prelude
    }

    /// Restore the namespaces named by `intents`.
    ///
    /// Every intent must name a catalog namespace. Catalog namespaces without
    /// an intent are read and dropped.
    pub fn restore<I: RestoreIntent>(self, intents: Vec<I>) -> Result<Summary> {
        let catalog: HashSet<Namespace> = self.prelude.namespaces().collect();
        if let Some(unknown) = intents.iter().find(|i| !catalog.contains(i.namespace())) {
            return Err(MuxError::UnknownNamespace(unknown.namespace().to_string()));
        }

        let mut demux = Demultiplexer::from_parser(self.parser, self.config);
        let mut outputs = Vec::with_capacity(intents.len());
        let mut wanted = HashSet::new();
        for intent in intents {
            let out = demux.open(intent.namespace().clone())?;
            wanted.insert(intent.namespace().clone());
            outputs.push((intent, out));
        }
        for ns in catalog.into_iter().filter(|ns| !wanted.contains(ns)) {
            demux.discard(ns)?;
        }
        tracing::debug!(restoring = outputs.len(), "restore started");

        let (demux_result, worker_results) = thread::scope(|s| {
            let workers: Vec<_> = outputs
                .into_iter()
                .map(|(intent, out)| {
                    let name = intent.namespace().to_string();
                    (name, s.spawn(move || drain(&intent, out)))
                })
                .collect();

            let demux_result = demux.run();
            let worker_results: Vec<Result<()>> = workers
                .into_iter()
                .map(|(name, worker)| {
                    worker.join().unwrap_or_else(|_| {
                        Err(MuxError::WorkerPanicked(format!("restore worker for {name}")))
                    })
                })
                .collect();
            (demux_result, worker_results)
        });

        // A consumer that hung up makes the demultiplexer fail too; report
        // why the consumer stopped.
        let root_cause = worker_results
            .into_iter()
            .filter_map(std::result::Result::err)
            .find(|err| !matches!(err, MuxError::EngineGone(_)));
        match (demux_result, root_cause) {
            (Err(MuxError::ConsumerGone(_)), Some(err)) => Err(err),
            (Err(err), _) => Err(err),
            (Ok(_), Some(err)) => Err(err),
            (Ok(summary), None) => Ok(summary),
        }
    }

    /// Read every data block without storing anything.
    pub fn verify(self) -> Result<Summary> {
        let namespaces: Vec<Namespace> = self.prelude.namespaces().collect();
        let mut demux = Demultiplexer::from_parser(self.parser, self.config);
        for ns in namespaces {
            demux.discard(ns)?;
        }
        demux.run()
    }
}

fn drain<I: RestoreIntent>(intent: &I, mut out: DemuxOut) -> Result<()> {
    let io_err = |source| MuxError::Io {
        namespace: intent.namespace().to_string(),
        source,
    };
    let mut sink = intent.open_sink().map_err(io_err)?;
    while let Some(record) = out.read_record()? {
        sink.write_all(&record).map_err(io_err)?;
    }
    sink.flush().map_err(io_err)?;
    tracing::debug!(namespace = %intent.namespace(), "namespace restored");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};
    use std::sync::Arc;

    use archivemux_frame::DELIMITER_BYTES;
    use bson::doc;

    use super::*;
    use crate::intent::FileIntent;

    #[derive(Clone)]
    struct MemIntent {
        namespace: Namespace,
        data: Vec<u8>,
        sink: Arc<Mutex<Vec<u8>>>,
    }

    impl MemIntent {
        fn new(ns: &str, docs: usize) -> Self {
            let namespace: Namespace = ns.parse().unwrap();
            let mut data = Vec::new();
            for i in 0..docs {
                let doc = doc! { "_id": i as i64, "ns": ns, "pad": "x".repeat(i % 7) };
                data.extend(bson::to_vec(&doc).unwrap());
            }
            Self {
                namespace,
                data,
                sink: Arc::default(),
            }
        }

        fn restored(&self) -> Vec<u8> {
            self.sink.lock().unwrap().clone()
        }
    }

    impl DumpIntent for MemIntent {
        fn namespace(&self) -> &Namespace {
            &self.namespace
        }

        fn metadata(&self) -> String {
            format!(r#"{{"ns":"{}"}}"#, self.namespace)
        }

        fn size_hint(&self) -> u64 {
            self.data.len() as u64
        }

        fn open_source(&self) -> io::Result<Box<dyn Read + Send>> {
            Ok(Box::new(Cursor::new(self.data.clone())))
        }
    }

    impl RestoreIntent for MemIntent {
        fn namespace(&self) -> &Namespace {
            &self.namespace
        }

        fn open_sink(&self) -> io::Result<Box<dyn Write + Send>> {
            Ok(Box::new(SharedSink(Arc::clone(&self.sink))))
        }
    }

    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenIntent(Namespace);

    impl RestoreIntent for BrokenIntent {
        fn namespace(&self) -> &Namespace {
            &self.0
        }

        fn open_sink(&self) -> io::Result<Box<dyn Write + Send>> {
            Ok(Box::new(FailingSink))
        }
    }

    fn pack(intents: &[MemIntent], concurrency: usize) -> (Vec<u8>, Summary) {
        let mut archive = Vec::new();
        let summary = ArchiveWriter::new()
            .with_concurrency(concurrency)
            .write(&mut archive, intents.to_vec())
            .unwrap();
        (archive, summary)
    }

    #[test]
    fn roundtrip_more_namespaces_than_workers() {
        let intents: Vec<MemIntent> = (0..7)
            .map(|i| MemIntent::new(&format!("db{}.coll{i}", i % 3), 20 + i * 5))
            .collect();
        let (archive, written) = pack(&intents, 2);

        let reader = ArchiveReader::open(Cursor::new(archive)).unwrap();
        assert_eq!(reader.prelude().header().concurrent_collections, 2);
        assert_eq!(reader.prelude().collection_metadatas().len(), 7);
        let read = reader.restore(intents.clone()).unwrap();

        assert_eq!(written, read);
        for intent in &intents {
            assert_eq!(intent.restored(), intent.data, "{}", intent.namespace);
        }
    }

    #[test]
    fn catalog_ordered_largest_first() {
        let intents = vec![
            MemIntent::new("a.small", 1),
            MemIntent::new("a.large", 50),
            MemIntent::new("b.medium", 10),
        ];
        let (archive, _) = pack(&intents, 1);
        let reader = ArchiveReader::open(Cursor::new(archive)).unwrap();
        let order: Vec<String> = reader
            .prelude()
            .namespaces()
            .map(|ns| ns.to_string())
            .collect();
        assert_eq!(order, ["a.large", "b.medium", "a.small"]);
    }

    #[test]
    fn empty_namespace_survives() {
        let intents = vec![MemIntent::new("empty.coll", 0), MemIntent::new("full.coll", 3)];
        let (archive, written) = pack(&intents, 4);
        assert_eq!(written.get(&"empty.coll".parse().unwrap()).unwrap().records, 0);

        let read = ArchiveReader::open(Cursor::new(archive))
            .unwrap()
            .verify()
            .unwrap();
        assert_eq!(written, read);
    }

    #[test]
    fn no_intents_writes_bare_prelude() {
        let (archive, summary) = pack(&[], 3);
        assert!(summary.namespaces.is_empty());
        assert!(archive.ends_with(&DELIMITER_BYTES));

        let reader = ArchiveReader::open(Cursor::new(archive)).unwrap();
        assert!(reader.prelude().collection_metadatas().is_empty());
        assert!(reader.verify().unwrap().namespaces.is_empty());
    }

    #[test]
    fn partial_restore_discards_the_rest() {
        let keep = MemIntent::new("keep.me", 5);
        let skip = MemIntent::new("skip.me", 5);
        let (archive, written) = pack(&[keep.clone(), skip.clone()], 2);

        let read = ArchiveReader::open(Cursor::new(archive))
            .unwrap()
            .restore(vec![keep.clone()])
            .unwrap();
        assert_eq!(keep.restored(), keep.data);
        assert!(skip.restored().is_empty());
        assert_eq!(written, read);
    }

    #[test]
    fn hostile_catalog_cannot_restore_outside_root() {
        let pid = std::process::id();
        let escape = std::env::temp_dir().join(format!("archivemux-escape-{pid}"));
        let escaped_file = escape.with_extension("bson");
        let _ = std::fs::remove_file(&escaped_file);
        let hostile = MemIntent::new(&format!("x.{}", escape.display()), 3);
        assert!(hostile.namespace.collection.starts_with('/'));
        let (archive, _) = pack(&[hostile], 1);

        let root = std::env::temp_dir().join(format!("archivemux-root-{pid}"));
        let reader = ArchiveReader::open(Cursor::new(archive)).unwrap();
        let intents: Result<Vec<FileIntent>> = reader
            .prelude()
            .namespaces()
            .map(|ns| FileIntent::new(&root, ns))
            .collect();
        assert!(matches!(intents, Err(MuxError::InvalidNamespace(_))));
        assert!(!escaped_file.exists());
        assert!(!root.exists());
    }

    #[test]
    fn restore_of_unknown_namespace_rejected() {
        let (archive, _) = pack(&[MemIntent::new("a.b", 1)], 1);
        let err = ArchiveReader::open(Cursor::new(archive))
            .unwrap()
            .restore(vec![MemIntent::new("c.d", 0)])
            .unwrap_err();
        assert!(matches!(err, MuxError::UnknownNamespace(ns) if ns == "c.d"));
    }

    #[test]
    fn failing_sink_reported_as_root_cause() {
        let intents = vec![MemIntent::new("a.b", 10)];
        let (archive, _) = pack(&intents, 1);
        let err = ArchiveReader::open(Cursor::new(archive))
            .unwrap()
            .restore(vec![BrokenIntent("a.b".parse().unwrap())])
            .unwrap_err();
        assert!(matches!(err, MuxError::Io { namespace, .. } if namespace == "a.b"));
    }

    #[test]
    fn duplicate_intents_rejected() {
        let err = ArchiveWriter::new()
            .write(
                Vec::new(),
                vec![MemIntent::new("a.b", 1), MemIntent::new("a.b", 2)],
            )
            .unwrap_err();
        assert!(matches!(err, MuxError::Frame(FrameError::DuplicateNamespace(_))));
    }

    #[test]
    fn corrupt_source_fails_the_dump() {
        let mut bad = MemIntent::new("bad.source", 2);
        bad.data.truncate(bad.data.len() - 3);
        let err = ArchiveWriter::new()
            .write(Vec::new(), vec![bad, MemIntent::new("good.source", 4)])
            .unwrap_err();
        assert!(err.is_corrupt(), "{err}");
    }

    #[test]
    fn truncated_archive_is_corrupt() {
        let (mut archive, _) = pack(&[MemIntent::new("a.b", 10)], 1);
        archive.truncate(archive.len() - 10);
        let err = ArchiveReader::open(Cursor::new(archive))
            .unwrap()
            .verify()
            .unwrap_err();
        assert!(err.is_corrupt(), "{err}");
    }
}
