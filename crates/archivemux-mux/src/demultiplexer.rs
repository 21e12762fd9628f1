//! Fan-out of one archive stream into per-namespace consumers.

use std::collections::{HashMap, HashSet};
use std::io::{self, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use archivemux_frame::{
    header::from_record, CollectionHeader, FrameError, Namespace, Parser, ParserConsumer,
};
use bytes::{Buf, Bytes};

use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::stats::Summary;

/// Sending half of a consumer. End of stream is the `ended` flag followed
/// by the sender being dropped, so the engine never waits on a consumer
/// that has all of its records.
#[derive(Clone)]
struct Consumer {
    records: SyncSender<Bytes>,
    ended: Arc<AtomicBool>,
}

#[derive(Clone)]
enum Route {
    Consumer(Consumer),
    Discard,
}

#[derive(Default)]
struct Registry {
    routes: HashMap<Namespace, Route>,
    closed: HashSet<Namespace>,
    finished: bool,
}

struct Shared {
    registry: Mutex<Registry>,
    config: MuxConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, ns: &Namespace, route: Route) -> Result<()> {
        if !ns.is_valid() {
            return Err(MuxError::InvalidNamespace(ns.to_string()));
        }

        let mut registry = self.lock();
        if registry.finished {
            return Err(MuxError::Finished(ns.to_string()));
        }
        if registry.routes.contains_key(ns) {
            return Err(MuxError::NamespaceInUse(ns.to_string()));
        }
        if registry.closed.contains(ns) {
            return Err(MuxError::AlreadyClosed(ns.to_string()));
        }
        if let Some(max) = self.config.max_open_namespaces {
            if registry.routes.len() >= max {
                return Err(MuxError::TooManyNamespaces { max });
            }
        }
        registry.routes.insert(ns.clone(), route);
        Ok(())
    }
}

/// Reads data blocks from an archive and routes each record to the consumer
/// registered for its namespace.
///
/// The input must be positioned after the prelude; see
/// [`Demultiplexer::from_parser`].
pub struct Demultiplexer<R> {
    parser: Parser<R>,
    shared: Arc<Shared>,
}

impl<R: Read> Demultiplexer<R> {
    /// Create a demultiplexer with default configuration.
    pub fn new(input: R) -> Self {
        Self::with_config(input, MuxConfig::default())
    }

    /// Create a demultiplexer with explicit configuration.
    pub fn with_config(input: R, config: MuxConfig) -> Self {
        let parser = Parser::with_config(input, config.frame_config());
        Self::from_parser(parser, config)
    }

    /// Continue on a parser that already consumed the prelude.
    pub fn from_parser(parser: Parser<R>, config: MuxConfig) -> Self {
        Self {
            parser,
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                config,
            }),
        }
    }

    /// A cloneable handle for registering consumers from other threads.
    pub fn handle(&self) -> DemuxHandle {
        DemuxHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Register a consumer for `ns`.
    pub fn open(&self, ns: Namespace) -> Result<DemuxOut> {
        self.handle().open(ns)
    }

    /// Accept `ns` in the stream and drop its records.
    pub fn discard(&self, ns: Namespace) -> Result<()> {
        self.handle().discard(ns)
    }

    /// Number of namespaces registered and not yet ended.
    pub fn open_count(&self) -> usize {
        self.shared.lock().routes.len()
    }

    /// Route every data block until the input ends.
    ///
    /// Each namespace in the stream must be registered before its first
    /// header is read. Returns the per-namespace accounting of everything
    /// routed, discarded namespaces included.
    ///
    /// On error the registry is emptied, so [`open_count`](Self::open_count)
    /// reads 0 afterwards and waiting consumers fail with
    /// [`MuxError::EngineGone`].
    pub fn run(&mut self) -> Result<Summary> {
        let mut dispatch = Dispatch {
            shared: &self.shared,
            current: None,
            summary: Summary::default(),
            gone: None,
        };
        let result = self.parser.read_all_blocks(&mut dispatch);
        let gone = dispatch.gone.take();
        let summary = std::mem::take(&mut dispatch.summary);

        let mut registry = self.shared.lock();
        registry.finished = true;
        let result = match result {
            Ok(()) => Ok(summary),
            Err(err) => {
                tracing::warn!(
                    open = registry.routes.len(),
                    offset = self.parser.offset(),
                    error = %err,
                    "demultiplexer stopped with open namespaces"
                );
                // Dropping the record senders releases waiting consumers.
                registry.routes.clear();
                match gone {
                    Some(ns) => Err(MuxError::ConsumerGone(ns.to_string())),
                    None => Err(MuxError::Frame(err)),
                }
            }
        };
        drop(registry);

        if let Ok(summary) = &result {
            tracing::debug!(
                namespaces = summary.namespaces.len(),
                bytes = self.parser.offset(),
                "demultiplexer finished"
            );
        }
        result
    }

    /// Bytes consumed from the input, prelude included when shared.
    pub fn offset(&self) -> u64 {
        self.parser.offset()
    }

    /// Consume the demultiplexer and return the input stream.
    pub fn into_inner(self) -> R {
        self.parser.into_inner()
    }
}

/// Registers consumers on a [`Demultiplexer`] from any thread.
#[derive(Clone)]
pub struct DemuxHandle {
    shared: Arc<Shared>,
}

impl DemuxHandle {
    /// Register a consumer for `ns`.
    pub fn open(&self, ns: Namespace) -> Result<DemuxOut> {
        let (tx, rx) = mpsc::sync_channel(0);
        let ended = Arc::new(AtomicBool::new(false));
        let consumer = Consumer {
            records: tx,
            ended: Arc::clone(&ended),
        };
        self.shared.register(&ns, Route::Consumer(consumer))?;
        tracing::debug!(namespace = %ns, "demux output opened");
        Ok(DemuxOut {
            namespace: ns,
            records: rx,
            end_of_stream: ended,
            pending: Bytes::new(),
            ended: false,
        })
    }

    /// Accept `ns` in the stream and drop its records.
    pub fn discard(&self, ns: Namespace) -> Result<()> {
        self.shared.register(&ns, Route::Discard)?;
        tracing::debug!(namespace = %ns, "namespace will be discarded");
        Ok(())
    }
}

/// Consumer side of one namespace.
pub struct DemuxOut {
    namespace: Namespace,
    records: Receiver<Bytes>,
    end_of_stream: Arc<AtomicBool>,
    pending: Bytes,
    ended: bool,
}

impl DemuxOut {
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Wait for the next record of this namespace.
    ///
    /// Returns `Ok(None)` once the namespace's end of stream was read, and
    /// on every call after that.
    pub fn read_record(&mut self) -> Result<Option<Bytes>> {
        if self.ended {
            return Ok(None);
        }
        match self.records.recv() {
            Ok(record) => Ok(Some(record)),
            Err(_) if self.end_of_stream.load(Ordering::Acquire) => {
                self.ended = true;
                Ok(None)
            }
            Err(_) => Err(MuxError::EngineGone(self.namespace.to_string())),
        }
    }

    /// Stop consuming.
    ///
    /// Closing before the end of stream makes the demultiplexer fail with
    /// [`MuxError::ConsumerGone`] when the next record for this namespace
    /// arrives.
    pub fn close(self) {
        if !self.ended {
            tracing::debug!(
                namespace = %self.namespace,
                "demux output closed before end of stream"
            );
        }
    }
}

impl Read for DemuxOut {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            match self.read_record() {
                Ok(Some(record)) => self.pending = record,
                Ok(None) => return Ok(0),
                Err(err) => return Err(io::Error::new(ErrorKind::BrokenPipe, err)),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

struct Dispatch<'a> {
    shared: &'a Shared,
    current: Option<(Namespace, Route)>,
    summary: Summary,
    gone: Option<Namespace>,
}

impl ParserConsumer for Dispatch<'_> {
    fn header(&mut self, offset: u64, record: &[u8]) -> archivemux_frame::Result<()> {
        let header: CollectionHeader = from_record(record).map_err(|err| {
            FrameError::corrupt(offset, format!("invalid collection header: {err}"))
        })?;
        let ns = header.namespace();
        if !ns.is_valid() {
            return Err(FrameError::corrupt(
                offset,
                format!("collection header has an empty db or collection ('{ns}')"),
            ));
        }

        let mut registry = self.shared.lock();
        let Some(route) = registry.routes.get(&ns).cloned() else {
            return Err(FrameError::corrupt(
                offset,
                format!("header for unknown or closed namespace {ns}"),
            ));
        };

        if !header.eof {
            drop(registry);
            tracing::trace!(namespace = %ns, offset, "namespace switch");
            self.current = Some((ns, route));
            return Ok(());
        }

        if let Route::Consumer(consumer) = &route {
            consumer.ended.store(true, Ordering::Release);
        }
        registry.routes.remove(&ns);
        registry.closed.insert(ns.clone());
        let remaining = registry.routes.len();
        drop(registry);

        // Dropping the last senders wakes the consumer with end of stream.
        self.current = None;
        drop(route);
        let stats = *self.summary.entry(&ns);
        tracing::debug!(
            namespace = %ns,
            records = stats.records,
            bytes = stats.bytes,
            remaining,
            "namespace ended"
        );
        Ok(())
    }

    fn body(&mut self, offset: u64, record: &[u8]) -> archivemux_frame::Result<()> {
        let Some((ns, route)) = &self.current else {
            return Err(FrameError::corrupt(
                offset,
                "record before any collection header",
            ));
        };

        if let Route::Consumer(consumer) = route {
            if consumer.records.send(Bytes::copy_from_slice(record)).is_err() {
                self.gone = Some(ns.clone());
                return Err(FrameError::Io(io::Error::new(
                    ErrorKind::BrokenPipe,
                    format!("consumer for {ns} went away"),
                )));
            }
        }
        self.summary.entry(ns).record(record);
        tracing::trace!(namespace = %ns, bytes = record.len(), "record routed");
        Ok(())
    }

    fn end(&mut self, offset: u64) -> archivemux_frame::Result<()> {
        let registry = self.shared.lock();
        if registry.routes.is_empty() {
            return Ok(());
        }
        let mut open: Vec<String> = registry.routes.keys().map(Namespace::to_string).collect();
        open.sort();
        Err(FrameError::corrupt(
            offset,
            format!("archive ended with unfinished namespaces: {}", open.join(", ")),
        ))
    }
}
