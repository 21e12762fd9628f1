use std::fs;
use std::io;
use std::path::Path;

use archivemux_frame::Namespace;
use archivemux_mux::{ArchiveReader, FileIntent, RestoreIntent};

use crate::cmd::{open_archive, UnpackArgs};
use crate::exit::{io_error, mux_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{write_summary, OutputFormat, SummaryOutput};

pub fn run(args: UnpackArgs, format: OutputFormat) -> CliResult<i32> {
    let input = open_archive(&args.archive)?;
    let reader = ArchiveReader::open(input).map_err(|err| mux_error("open archive", err))?;

    let from_catalog = args.namespaces.is_empty();
    let namespaces: Vec<Namespace> = if from_catalog {
        reader.prelude().namespaces().collect()
    } else {
        args.namespaces.clone()
    };

    // Every path is checked before anything is written below the output root.
    let intents = namespaces
        .into_iter()
        .map(|ns| {
            FileIntent::new(&args.out, ns).map_err(|err| {
                if from_catalog {
                    CliError::new(DATA_INVALID, format!("archive catalog: {err}"))
                } else {
                    mux_error("unpack", err)
                }
            })
        })
        .collect::<CliResult<Vec<_>>>()?;

    for intent in &intents {
        // Unknown namespaces are rejected by the restore below.
        if let Some(entry) = reader.prelude().metadata_for(RestoreIntent::namespace(intent)) {
            write_metadata(intent.path(), &entry.metadata)?;
        }
    }
    tracing::info!(
        collections = intents.len(),
        out = %args.out.display(),
        "unpacking"
    );

    let summary = reader
        .restore(intents)
        .map_err(|err| mux_error("unpack failed", err))?;

    let report = SummaryOutput::new(
        "https://schemas.3leaps.dev/archivemux/cli/v1/unpack-summary.schema.json",
        &args.archive,
        &summary,
    );
    write_summary(&mut io::stdout().lock(), &report, format)
        .map_err(|err| io_error("write report", err))?;
    Ok(SUCCESS)
}

fn write_metadata(data_file: &Path, metadata: &str) -> CliResult<()> {
    let path = data_file.with_extension("metadata.json");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| io_error(&format!("create {}", parent.display()), err))?;
    }
    fs::write(&path, metadata).map_err(|err| io_error(&format!("write {}", path.display()), err))
}
