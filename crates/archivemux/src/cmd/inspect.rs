use std::io::{self, Write};

use archivemux_frame::ArchivePrelude;
use archivemux_mux::ArchiveReader;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use crate::cmd::{open_archive, InspectArgs};
use crate::exit::{io_error, mux_error, CliResult, SUCCESS};
use crate::output::{write_json, OutputFormat};

#[derive(Serialize)]
struct CatalogEntry<'a> {
    namespace: String,
    db: &'a str,
    collection: &'a str,
    metadata: &'a str,
}

#[derive(Serialize)]
struct InspectOutput<'a> {
    schema_id: &'static str,
    archive: &'a str,
    format_version: &'a str,
    concurrent_collections: i32,
    databases: &'a [String],
    collections: Vec<CatalogEntry<'a>>,
}

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let input = open_archive(&args.archive)?;
    let reader = ArchiveReader::open(input).map_err(|err| mux_error("open archive", err))?;
    let out = inspect_output(&args.archive, reader.prelude());

    print_inspect(&mut io::stdout().lock(), &out, format)
        .map_err(|err| io_error("write report", err))?;
    Ok(SUCCESS)
}

fn inspect_output<'a>(archive: &'a str, prelude: &'a ArchivePrelude) -> InspectOutput<'a> {
    let collections = prelude
        .collection_metadatas()
        .iter()
        .map(|cm| CatalogEntry {
            namespace: cm.namespace().to_string(),
            db: &cm.database,
            collection: &cm.collection,
            metadata: &cm.metadata,
        })
        .collect();
    InspectOutput {
        schema_id: "https://schemas.3leaps.dev/archivemux/cli/v1/archive-prelude.schema.json",
        archive,
        format_version: &prelude.header().format_version,
        concurrent_collections: prelude.header().concurrent_collections,
        databases: prelude.databases(),
        collections,
    }
}

fn print_inspect(
    out: &mut dyn Write,
    inspect: &InspectOutput<'_>,
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => write_json(out, inspect),
        OutputFormat::Table => {
            writeln!(out, "Archive:                {}", inspect.archive)?;
            writeln!(out, "Format version:         {}", inspect.format_version)?;
            writeln!(out, "Concurrent collections: {}", inspect.concurrent_collections)?;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["NAMESPACE", "METADATA"]);
            for entry in &inspect.collections {
                table.add_row(vec![entry.namespace.clone(), entry.metadata.to_string()]);
            }
            writeln!(out, "{table}")
        }
        OutputFormat::Pretty => {
            writeln!(
                out,
                "version={} concurrent_collections={}",
                inspect.format_version, inspect.concurrent_collections
            )?;
            for db in inspect.databases {
                writeln!(out, "{db}")?;
                for entry in inspect.collections.iter().filter(|e| e.db == db.as_str()) {
                    writeln!(out, "  {} {}", entry.collection, entry.metadata)?;
                }
            }
            Ok(())
        }
    }
}
