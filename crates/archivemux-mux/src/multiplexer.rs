//! Fan-in of many namespace producers into one archive stream.
//!
//! Every [`MuxIn`] shares one event mailbox with the run loop. A write posts
//! the record and then waits on the handle's private acknowledgement channel,
//! so a producer never runs ahead of the single writer.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use archivemux_frame::{validate_record, BlockWriter, CollectionHeader, Namespace};
use bytes::Bytes;

use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::stats::Summary;

enum Event {
    Record { id: u64, record: Bytes },
    Closed { id: u64 },
}

struct Entry {
    namespace: Namespace,
    written: SyncSender<usize>,
}

#[derive(Default)]
struct Registry {
    handles: HashMap<u64, Entry>,
    closed: HashSet<Namespace>,
    next_id: u64,
    finished: bool,
}

struct Shared {
    registry: Mutex<Registry>,
    events: Sender<Event>,
    config: MuxConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the archive output and serializes all namespace producers into it.
pub struct Multiplexer<W> {
    out: BlockWriter<W>,
    shared: Arc<Shared>,
    events: Receiver<Event>,
    current: Option<Namespace>,
    summary: Summary,
}

impl<W: Write> Multiplexer<W> {
    /// Create a multiplexer with default configuration.
    pub fn new(out: W) -> Self {
        Self::with_config(out, MuxConfig::default())
    }

    /// Create a multiplexer with explicit configuration.
    pub fn with_config(out: W, config: MuxConfig) -> Self {
        let writer = BlockWriter::with_config(out, config.frame_config());
        Self::from_writer(writer, config)
    }

    /// Continue on a block writer that may already carry a prelude.
    pub fn from_writer(out: BlockWriter<W>, config: MuxConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            out,
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                events: events_tx,
                config,
            }),
            events: events_rx,
            current: None,
            summary: Summary::default(),
        }
    }

    /// A cloneable handle for opening namespaces from other threads.
    pub fn handle(&self) -> MuxHandle {
        MuxHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Register a producer for `ns`.
    pub fn open(&self, ns: Namespace) -> Result<MuxIn> {
        self.handle().open(ns)
    }

    /// Number of currently registered producers.
    pub fn open_count(&self) -> usize {
        self.shared.lock().handles.len()
    }

    /// Write records as producers hand them over until no producer is left.
    ///
    /// Every namespace that should be part of the archive must be opened
    /// before the registry first becomes empty: once that happens the loop
    /// returns and further `open` calls fail with [`MuxError::Finished`].
    ///
    /// On error the registry is emptied, so [`open_count`](Self::open_count)
    /// reads 0 afterwards and blocked producers fail with
    /// [`MuxError::EngineGone`].
    pub fn run(&mut self) -> Result<Summary> {
        let result = self.run_loop();
        let mut registry = self.shared.lock();
        registry.finished = true;
        if let Err(err) = &result {
            tracing::warn!(
                open = registry.handles.len(),
                error = %err,
                "multiplexer stopped with open namespaces"
            );
            // Dropping the acknowledgement senders releases blocked producers.
            registry.handles.clear();
        }
        drop(registry);
        result.map(|()| std::mem::take(&mut self.summary))
    }

    /// Total bytes written to the output, prelude included.
    pub fn bytes_written(&self) -> u64 {
        self.out.bytes_written()
    }

    /// Consume the multiplexer and return the output stream.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn run_loop(&mut self) -> Result<()> {
        loop {
            {
                let mut registry = self.shared.lock();
                if registry.handles.is_empty() {
                    registry.finished = true;
                    break;
                }
            }

            // The shared state holds a sender, so the mailbox never disconnects.
            let Ok(event) = self.events.recv() else {
                break;
            };
            match event {
                Event::Record { id, record } => self.on_record(id, record)?,
                Event::Closed { id } => self.on_closed(id)?,
            }
        }

        self.out.flush()?;
        tracing::debug!(
            namespaces = self.summary.namespaces.len(),
            bytes = self.out.bytes_written(),
            "multiplexer finished"
        );
        Ok(())
    }

    fn on_record(&mut self, id: u64, record: Bytes) -> Result<()> {
        let (namespace, written) = match self.shared.lock().handles.get(&id) {
            Some(entry) => (entry.namespace.clone(), entry.written.clone()),
            None => {
                tracing::warn!(id, "record from an unregistered mux input dropped");
                return Ok(());
            }
        };

        if self.current.as_ref() != Some(&namespace) {
            if let Some(previous) = self.current.take() {
                self.out.write_delimiter()?;
                tracing::trace!(from = %previous, to = %namespace, "namespace switch");
            }
            self.out.write_header(&CollectionHeader::open(&namespace))?;
            self.current = Some(namespace.clone());
        }

        let n = self.out.write_record(&record)?;
        self.summary.entry(&namespace).record(&record);
        tracing::trace!(namespace = %namespace, bytes = n, "record written");

        // Capacity 1 and the producer is waiting, so this never blocks.
        let _ = written.send(n);
        Ok(())
    }

    fn on_closed(&mut self, id: u64) -> Result<()> {
        let namespace = match self.shared.lock().handles.get(&id) {
            Some(entry) => entry.namespace.clone(),
            None => return Ok(()),
        };

        if self.current.take().is_some() {
            self.out.write_delimiter()?;
        }
        self.out.write_header(&CollectionHeader::eof(&namespace))?;
        self.out.write_delimiter()?;

        let remaining = {
            let mut registry = self.shared.lock();
            registry.handles.remove(&id);
            registry.closed.insert(namespace.clone());
            registry.handles.len()
        };
        let stats = *self.summary.entry(&namespace);
        tracing::debug!(
            namespace = %namespace,
            records = stats.records,
            bytes = stats.bytes,
            remaining,
            "namespace closed"
        );
        Ok(())
    }
}

/// Opens producers on a [`Multiplexer`] from any thread.
#[derive(Clone)]
pub struct MuxHandle {
    shared: Arc<Shared>,
}

impl MuxHandle {
    /// Register a producer for `ns`.
    ///
    /// Fails if the namespace is open or already closed, if the configured
    /// cap is reached, or once the run loop has finished.
    pub fn open(&self, ns: Namespace) -> Result<MuxIn> {
        if !ns.is_valid() {
            return Err(MuxError::InvalidNamespace(ns.to_string()));
        }

        let mut registry = self.shared.lock();
        if registry.finished {
            return Err(MuxError::Finished(ns.to_string()));
        }
        if registry.handles.values().any(|entry| entry.namespace == ns) {
            return Err(MuxError::NamespaceInUse(ns.to_string()));
        }
        if registry.closed.contains(&ns) {
            return Err(MuxError::AlreadyClosed(ns.to_string()));
        }
        if let Some(max) = self.shared.config.max_open_namespaces {
            if registry.handles.len() >= max {
                return Err(MuxError::TooManyNamespaces { max });
            }
        }

        let id = registry.next_id;
        registry.next_id += 1;
        let (written_tx, written_rx) = mpsc::sync_channel(1);
        registry.handles.insert(
            id,
            Entry {
                namespace: ns.clone(),
                written: written_tx,
            },
        );
        tracing::debug!(namespace = %ns, open = registry.handles.len(), "mux input opened");

        Ok(MuxIn {
            id,
            namespace: ns,
            events: self.shared.events.clone(),
            written: written_rx,
            max_record_size: self.shared.config.max_record_size,
            closed: false,
        })
    }
}

/// Producer side of one namespace.
///
/// Dropping an unclosed handle closes it.
pub struct MuxIn {
    id: u64,
    namespace: Namespace,
    events: Sender<Event>,
    written: Receiver<usize>,
    max_record_size: usize,
    closed: bool,
}

impl MuxIn {
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Hand one encoded record to the multiplexer.
    ///
    /// Blocks until the record is on the output and returns the number of
    /// bytes written.
    pub fn write(&mut self, record: &[u8]) -> Result<usize> {
        validate_record(record, self.max_record_size)?;
        self.events
            .send(Event::Record {
                id: self.id,
                record: Bytes::copy_from_slice(record),
            })
            .map_err(|_| MuxError::EngineGone(self.namespace.to_string()))?;
        self.written
            .recv()
            .map_err(|_| MuxError::EngineGone(self.namespace.to_string()))
    }

    /// Finish the namespace.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.events
            .send(Event::Closed { id: self.id })
            .map_err(|_| MuxError::EngineGone(self.namespace.to_string()))
    }
}

impl Drop for MuxIn {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
