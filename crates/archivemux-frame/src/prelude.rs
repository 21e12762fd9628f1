//! The prelude: magic number plus the first block of every archive.
//!
//! ```text
//! MagicNumber  Header(ArchiveHeader)  Body(CollectionMetadata)*  Delimiter
//! ```

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};

use crate::codec::MAGIC_NUMBER;
use crate::error::{FrameError, Result};
use crate::header::{from_record, ArchiveHeader, CollectionMetadata, Namespace};
use crate::reader::{BlockStatus, Parser, ParserConsumer};
use crate::writer::BlockWriter;

/// Stream header plus the namespace catalog, with a per-database index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePrelude {
    header: ArchiveHeader,
    collection_metadatas: Vec<CollectionMetadata>,
    dbs: Vec<String>,
    by_db: HashMap<String, Vec<usize>>,
}

impl ArchivePrelude {
    /// Build a prelude, rejecting duplicate namespaces.
    pub fn new(
        header: ArchiveHeader,
        collection_metadatas: Vec<CollectionMetadata>,
    ) -> Result<Self> {
        let mut seen = HashSet::with_capacity(collection_metadatas.len());
        for cm in &collection_metadatas {
            let ns = cm.namespace();
            if !seen.insert(ns.clone()) {
                return Err(FrameError::DuplicateNamespace(ns.to_string()));
            }
        }

        let mut dbs = Vec::new();
        let mut by_db: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, cm) in collection_metadatas.iter().enumerate() {
            let entries = by_db.entry(cm.database.clone()).or_insert_with(|| {
                dbs.push(cm.database.clone());
                Vec::new()
            });
            entries.push(index);
        }

        Ok(Self {
            header,
            collection_metadatas,
            dbs,
            by_db,
        })
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// Catalog entries in stream order.
    pub fn collection_metadatas(&self) -> &[CollectionMetadata] {
        &self.collection_metadatas
    }

    /// Distinct databases in first-seen order.
    pub fn databases(&self) -> &[String] {
        &self.dbs
    }

    /// Catalog entries for one database, in stream order.
    pub fn collections_in(&self, db: &str) -> Vec<&CollectionMetadata> {
        self.by_db
            .get(db)
            .map(|indexes| {
                indexes
                    .iter()
                    .map(|&index| &self.collection_metadatas[index])
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn metadata_for(&self, ns: &Namespace) -> Option<&CollectionMetadata> {
        self.collections_in(&ns.db)
            .into_iter()
            .find(|cm| cm.collection == ns.collection)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = Namespace> + '_ {
        self.collection_metadatas.iter().map(|cm| cm.namespace())
    }
}

/// Write the magic number and the prelude block.
pub fn write_prelude<W: Write>(out: &mut BlockWriter<W>, prelude: &ArchivePrelude) -> Result<()> {
    out.write_magic()?;
    out.write_header(prelude.header())?;
    for cm in prelude.collection_metadatas() {
        out.write_header(cm)?;
    }
    out.write_delimiter()?;
    tracing::debug!(
        collections = prelude.collection_metadatas().len(),
        bytes = out.bytes_written(),
        "wrote archive prelude"
    );
    Ok(())
}

/// Validate the magic number and read the prelude block.
///
/// The parser is left positioned at the first data block.
pub fn read_prelude<R: Read>(input: &mut Parser<R>) -> Result<ArchivePrelude> {
    let mut magic = [0u8; 4];
    if input.read_raw(&mut magic)? < magic.len() {
        return Err(FrameError::NotAnArchive { found: 0 });
    }
    let found = i32::from_le_bytes(magic);
    if found != MAGIC_NUMBER {
        return Err(FrameError::NotAnArchive {
            found: found as u32,
        });
    }

    let mut consumer = PreludeConsumer {
        header: None,
        collection_metadatas: Vec::new(),
    };
    if input.read_block(&mut consumer)? == BlockStatus::End {
        return Err(FrameError::corrupt(4, "archive ends before the prelude"));
    }

    let header = consumer
        .header
        .ok_or_else(|| FrameError::corrupt(4, "prelude block has no archive header"))?;
    let prelude = ArchivePrelude::new(header, consumer.collection_metadatas).map_err(|err| {
        match err {
            FrameError::DuplicateNamespace(ns) => {
                FrameError::corrupt(4, format!("namespace {ns} listed twice in prelude"))
            }
            other => other,
        }
    })?;
    tracing::debug!(
        version = %prelude.header().format_version,
        collections = prelude.collection_metadatas().len(),
        "read archive prelude"
    );
    Ok(prelude)
}

struct PreludeConsumer {
    header: Option<ArchiveHeader>,
    collection_metadatas: Vec<CollectionMetadata>,
}

impl ParserConsumer for PreludeConsumer {
    fn header(&mut self, offset: u64, record: &[u8]) -> Result<()> {
        let header: ArchiveHeader = from_record(record).map_err(|err| {
            FrameError::corrupt(
                offset,
                format!("prelude header is not an archive header: {err}"),
            )
        })?;
        self.header = Some(header);
        Ok(())
    }

    fn body(&mut self, offset: u64, record: &[u8]) -> Result<()> {
        let cm: CollectionMetadata = from_record(record).map_err(|err| {
            FrameError::corrupt(
                offset,
                format!("prelude entry is not collection metadata: {err}"),
            )
        })?;
        if !cm.namespace().is_valid() {
            return Err(FrameError::corrupt(
                offset,
                "prelude entry is missing a database or collection",
            ));
        }
        self.collection_metadatas.push(cm);
        Ok(())
    }

    fn end(&mut self, _offset: u64) -> Result<()> {
        Ok(())
    }
}
