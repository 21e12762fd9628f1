use std::collections::BTreeMap;

use archivemux_frame::Namespace;
use serde::Serialize;

/// Per-namespace accounting kept by both engines.
///
/// A producer's stats and the matching consumer's stats are equal exactly when
/// the namespace survived the round trip byte for byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
    pub records: u64,
    pub bytes: u64,
    pub crc32: u32,
}

impl NamespaceStats {
    pub fn record(&mut self, record: &[u8]) {
        let mut hasher = crc32fast::Hasher::new_with_initial(self.crc32);
        hasher.update(record);
        self.crc32 = hasher.finalize();
        self.records += 1;
        self.bytes += record.len() as u64;
    }
}

/// Stats for every namespace an engine handled, ordered by namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub namespaces: BTreeMap<Namespace, NamespaceStats>,
}

impl Summary {
    pub(crate) fn entry(&mut self, ns: &Namespace) -> &mut NamespaceStats {
        self.namespaces.entry(ns.clone()).or_default()
    }

    pub fn get(&self, ns: &Namespace) -> Option<&NamespaceStats> {
        self.namespaces.get(ns)
    }

    pub fn total_records(&self) -> u64 {
        self.namespaces.values().map(|s| s.records).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.namespaces.values().map(|s| s.bytes).sum()
    }
}
