use std::io;

use archivemux_mux::ArchiveReader;

use crate::cmd::{open_archive, VerifyArgs};
use crate::exit::{io_error, mux_error, CliResult, SUCCESS};
use crate::output::{write_summary, OutputFormat, SummaryOutput};

pub fn run(args: VerifyArgs, format: OutputFormat) -> CliResult<i32> {
    let input = open_archive(&args.archive)?;
    let reader = ArchiveReader::open(input).map_err(|err| mux_error("open archive", err))?;
    let expected = reader.prelude().collection_metadatas().len();

    let summary = reader
        .verify()
        .map_err(|err| mux_error("verify failed", err))?;
    tracing::info!(
        namespaces = expected,
        records = summary.total_records(),
        "archive verified"
    );

    let report = SummaryOutput::new(
        "https://schemas.3leaps.dev/archivemux/cli/v1/verify-summary.schema.json",
        &args.archive,
        &summary,
    );
    write_summary(&mut io::stdout().lock(), &report, format)
        .map_err(|err| io_error("write report", err))?;
    Ok(SUCCESS)
}
