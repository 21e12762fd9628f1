use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use archivemux_frame::Namespace;
use archivemux_mux::intent::DATA_EXTENSION;
use archivemux_mux::{ArchiveWriter, FileIntent, Summary, DEFAULT_METADATA};

use crate::cmd::{PackArgs, STDIO};
use crate::exit::{io_error, mux_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{write_summary, OutputFormat, SummaryOutput};

const METADATA_SUFFIX: &str = ".metadata.json";

pub fn run(args: PackArgs, format: OutputFormat) -> CliResult<i32> {
    if args.concurrency == 0 {
        return Err(CliError::new(USAGE, "--concurrency must be at least 1"));
    }

    let intents = collect_intents(&args)?;
    tracing::info!(
        collections = intents.len(),
        concurrency = args.concurrency,
        archive = %args.archive,
        "packing"
    );
    let writer = ArchiveWriter::new().with_concurrency(args.concurrency);

    let summary = if args.archive == STDIO {
        let mut out = BufWriter::new(io::stdout().lock());
        write_archive(&writer, &mut out, intents)?
    } else {
        let file = File::create(&args.archive)
            .map_err(|err| io_error(&format!("create {}", args.archive), err))?;
        let mut out = BufWriter::new(file);
        match write_archive(&writer, &mut out, intents) {
            Ok(summary) => summary,
            Err(err) => {
                drop(out);
                if let Err(remove) = fs::remove_file(&args.archive) {
                    tracing::warn!(
                        archive = %args.archive,
                        error = %remove,
                        "could not remove partial archive"
                    );
                }
                return Err(err);
            }
        }
    };

    let report = SummaryOutput::new(
        "https://schemas.3leaps.dev/archivemux/cli/v1/pack-summary.schema.json",
        &args.archive,
        &summary,
    );
    // Archive bytes own stdout when packing to it.
    let result = if args.archive == STDIO {
        write_summary(&mut io::stderr().lock(), &report, format)
    } else {
        write_summary(&mut io::stdout().lock(), &report, format)
    };
    result.map_err(|err| io_error("write report", err))?;
    Ok(SUCCESS)
}

fn write_archive<W: Write>(
    writer: &ArchiveWriter,
    out: &mut W,
    intents: Vec<FileIntent>,
) -> CliResult<Summary> {
    let summary = writer
        .write(&mut *out, intents)
        .map_err(|err| mux_error("pack failed", err))?;
    out.flush().map_err(|err| io_error("flush archive", err))?;
    Ok(summary)
}

/// Gather `<dir>/<db>/<collection>.bson` files, sorted by namespace.
fn collect_intents(args: &PackArgs) -> CliResult<Vec<FileIntent>> {
    let mut intents = Vec::new();
    for db_dir in sorted_entries(&args.dir)? {
        if !db_dir.is_dir() {
            continue;
        }
        let Some(db) = file_name(&db_dir) else {
            continue;
        };
        for path in sorted_entries(&db_dir)? {
            let Some(name) = file_name(&path) else {
                continue;
            };
            let Some(collection) = name.strip_suffix(&format!(".{DATA_EXTENSION}")) else {
                continue;
            };
            if collection.is_empty() || !path.is_file() {
                continue;
            }
            if is_excluded(args, collection) {
                tracing::debug!(db = %db, collection, "collection excluded");
                continue;
            }

            let ns = Namespace::new(db.clone(), collection);
            let size = fs::metadata(&path)
                .map_err(|err| io_error(&format!("stat {}", path.display()), err))?
                .len();
            let metadata = read_metadata(&db_dir.join(format!("{collection}{METADATA_SUFFIX}")))?;
            intents.push(
                FileIntent::new(&args.dir, ns)
                    .map_err(|err| mux_error("pack", err))?
                    .with_metadata(metadata)
                    .with_size(size),
            );
        }
    }
    Ok(intents)
}

fn is_excluded(args: &PackArgs, collection: &str) -> bool {
    args.exclude_collection.iter().any(|c| c == collection)
        || args
            .exclude_collection_prefix
            .iter()
            .any(|prefix| collection.starts_with(prefix.as_str()))
}

fn read_metadata(path: &Path) -> CliResult<String> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(DEFAULT_METADATA.to_string());
        }
        Err(err) => return Err(io_error(&format!("read {}", path.display()), err)),
    };
    serde_json::from_str::<serde_json::Value>(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("{} is not valid JSON: {err}", path.display()),
        )
    })?;
    Ok(text.trim().to_string())
}

fn sorted_entries(dir: &Path) -> CliResult<Vec<PathBuf>> {
    let context = || format!("read directory {}", dir.display());
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| io_error(&context(), err))? {
        entries.push(entry.map_err(|err| io_error(&context(), err))?.path());
    }
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()?.to_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(exclude: &[&str], prefixes: &[&str]) -> PackArgs {
        PackArgs {
            dir: PathBuf::from("/dump"),
            archive: "-".into(),
            concurrency: 4,
            exclude_collection: exclude.iter().map(|s| s.to_string()).collect(),
            exclude_collection_prefix: prefixes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn exclusion_by_name_and_prefix() {
        let args = args(&["users"], &["tmp_", "system."]);
        assert!(is_excluded(&args, "users"));
        assert!(!is_excluded(&args, "users_archive"));
        assert!(is_excluded(&args, "tmp_import"));
        assert!(is_excluded(&args, "system.profile"));
        assert!(!is_excluded(&args, "orders"));
    }

    #[test]
    fn missing_metadata_file_uses_default() {
        let meta = read_metadata(Path::new("/nonexistent/archivemux/x.metadata.json")).unwrap();
        assert_eq!(meta, DEFAULT_METADATA);
    }
}
