//! Header documents carried in archive records.
//!
//! All three are encoded as BSON documents, so every encoded header is itself a
//! valid length-prefixed, null-terminated record.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::FORMAT_VERSION;
use crate::error::Result;

/// A database + collection pair, the unit of multiplexing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace {
    pub db: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
        }
    }

    /// Returns true if neither part is empty.
    pub fn is_valid(&self) -> bool {
        !self.db.is_empty() && !self.collection.is_empty()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

impl FromStr for Namespace {
    type Err = String;

    /// Splits at the first `.`; collection names may themselves contain dots.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((db, collection)) if !db.is_empty() && !collection.is_empty() => {
                Ok(Self::new(db, collection))
            }
            _ => Err(format!("'{s}' is not a <db>.<collection> namespace")),
        }
    }
}

/// Announces which namespace the following records belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionHeader {
    #[serde(rename = "db", default)]
    pub database: String,
    #[serde(default)]
    pub collection: String,
    /// The namespace is finished; no records follow in this block.
    #[serde(rename = "EOF", default, skip_serializing_if = "is_false")]
    pub eof: bool,
}

impl CollectionHeader {
    pub fn open(ns: &Namespace) -> Self {
        Self {
            database: ns.db.clone(),
            collection: ns.collection.clone(),
            eof: false,
        }
    }

    pub fn eof(ns: &Namespace) -> Self {
        Self {
            eof: true,
            ..Self::open(ns)
        }
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.database.clone(), self.collection.clone())
    }
}

/// Catalog entry for one namespace in the prelude.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    #[serde(rename = "db", default)]
    pub database: String,
    #[serde(default)]
    pub collection: String,
    /// Opaque options/index description reproduced on restore.
    #[serde(default)]
    pub metadata: String,
}

impl CollectionMetadata {
    pub fn new(ns: &Namespace, metadata: impl Into<String>) -> Self {
        Self {
            database: ns.db.clone(),
            collection: ns.collection.clone(),
            metadata: metadata.into(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.database.clone(), self.collection.clone())
    }
}

/// Stream-level metadata written once after the magic number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    pub concurrent_collections: i32,
    #[serde(rename = "version")]
    pub format_version: String,
}

impl ArchiveHeader {
    pub fn new(concurrent_collections: i32) -> Self {
        Self {
            concurrent_collections,
            format_version: FORMAT_VERSION.to_string(),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Encode a header document as a record.
pub fn to_record<T: Serialize>(header: &T) -> Result<Vec<u8>> {
    Ok(bson::to_vec(header)?)
}

/// Decode a record as a header document.
pub fn from_record<T: DeserializeOwned>(
    record: &[u8],
) -> std::result::Result<T, bson::de::Error> {
    bson::from_slice(record)
}
