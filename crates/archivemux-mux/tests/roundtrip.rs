use std::io::{Cursor, Read};
use std::thread;

use archivemux_frame::{
    read_prelude, write_prelude, ArchiveHeader, ArchivePrelude, BlockWriter, CollectionMetadata,
    Namespace, Parser,
};
use archivemux_mux::{Demultiplexer, MuxConfig, Multiplexer, NamespaceStats};
use bson::doc;

const DOCS: usize = 500;

fn documents(ns: &Namespace, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let doc = doc! {
                "_id": i as i64,
                "ns": ns.to_string(),
                "payload": "z".repeat(i % 97),
            };
            bson::to_vec(&doc).expect("doc should encode")
        })
        .collect()
}

fn checksum(records: &[Vec<u8>]) -> NamespaceStats {
    let mut stats = NamespaceStats::default();
    for record in records {
        stats.record(record);
    }
    stats
}

#[test]
fn two_namespaces_survive_the_round_trip() {
    let foo = Namespace::new("foo", "bar");
    let ding = Namespace::new("ding", "bats");
    let inputs = [
        (foo.clone(), documents(&foo, DOCS)),
        (ding.clone(), documents(&ding, DOCS)),
    ];

    let prelude = ArchivePrelude::new(
        ArchiveHeader::new(2),
        inputs
            .iter()
            .map(|(ns, _)| CollectionMetadata::new(ns, r#"{"indexes":[]}"#))
            .collect(),
    )
    .unwrap();

    let mut writer = BlockWriter::new(Vec::new());
    write_prelude(&mut writer, &prelude).unwrap();
    let mut mux = Multiplexer::from_writer(writer, MuxConfig::default());

    let producers: Vec<_> = inputs
        .iter()
        .map(|(ns, docs)| {
            let mut input = mux.open(ns.clone()).unwrap();
            let docs = docs.clone();
            thread::spawn(move || {
                for doc in &docs {
                    assert_eq!(input.write(doc).unwrap(), doc.len());
                }
                input.close().unwrap();
            })
        })
        .collect();
    let written = mux.run().unwrap();
    for producer in producers {
        producer.join().unwrap();
    }
    let archive = mux.into_inner();

    let mut parser = Parser::new(Cursor::new(archive));
    let read_back = read_prelude(&mut parser).unwrap();
    assert_eq!(read_back, prelude);

    let mut demux = Demultiplexer::from_parser(parser, MuxConfig::default());
    let consumers: Vec<_> = read_back
        .namespaces()
        .map(|ns| {
            let mut out = demux.open(ns).unwrap();
            thread::spawn(move || {
                let mut records = Vec::new();
                while let Some(record) = out.read_record().unwrap() {
                    records.push(record.to_vec());
                }
                // End of namespace is sticky.
                assert!(out.read_record().unwrap().is_none());
                records
            })
        })
        .collect();
    let read = demux.run().unwrap();
    let outputs: Vec<Vec<Vec<u8>>> = consumers.into_iter().map(|c| c.join().unwrap()).collect();

    assert_eq!(written, read);
    assert_eq!(demux.open_count(), 0);
    for ((ns, docs), got) in inputs.iter().zip(&outputs) {
        assert_eq!(got.len(), DOCS, "{ns}");
        assert_eq!(got, docs, "{ns}");
        assert_eq!(read.get(ns).copied(), Some(checksum(docs)), "{ns}");
    }
}

#[test]
fn byte_view_matches_concatenated_records() {
    let ns = Namespace::new("stream", "bytes");
    let docs = documents(&ns, 64);

    let mut mux = Multiplexer::new(Vec::new());
    let mut input = mux.open(ns.clone()).unwrap();
    let producer_docs = docs.clone();
    let producer = thread::spawn(move || {
        for doc in &producer_docs {
            input.write(doc).unwrap();
        }
    });
    mux.run().unwrap();
    producer.join().unwrap();

    let mut demux = Demultiplexer::new(Cursor::new(mux.into_inner()));
    let mut out = demux.open(ns).unwrap();
    let consumer = thread::spawn(move || {
        let mut bytes = Vec::new();
        out.read_to_end(&mut bytes).unwrap();
        bytes
    });
    demux.run().unwrap();

    assert_eq!(consumer.join().unwrap(), docs.concat());
}
