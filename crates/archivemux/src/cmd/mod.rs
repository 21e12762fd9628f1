use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

use archivemux_frame::Namespace;
use archivemux_mux::DEFAULT_CONCURRENCY;
use clap::{Args, Subcommand};

use crate::exit::{io_error, CliResult};
use crate::output::OutputFormat;

pub mod inspect;
pub mod pack;
pub mod unpack;
pub mod verify;
pub mod version;

/// Archive path argument value meaning stdin/stdout.
pub const STDIO: &str = "-";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pack a dump directory into a single archive.
    Pack(PackArgs),
    /// Restore collections from an archive into a dump directory.
    Unpack(UnpackArgs),
    /// Print the archive header and collection catalog.
    Inspect(InspectArgs),
    /// Read a whole archive and print per-collection checksums.
    Verify(VerifyArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Pack(args) => pack::run(args, format),
        Command::Unpack(args) => unpack::run(args, format),
        Command::Inspect(args) => inspect::run(args, format),
        Command::Verify(args) => verify::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct PackArgs {
    /// Dump directory laid out as <db>/<collection>.bson.
    pub dir: PathBuf,
    /// Archive file to write ("-" for stdout).
    #[arg(long, value_name = "FILE")]
    pub archive: String,
    /// Number of collections dumped in parallel.
    #[arg(long, short = 'j', default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,
    /// Skip collections with this name (repeatable).
    #[arg(long, value_name = "COLLECTION")]
    pub exclude_collection: Vec<String>,
    /// Skip collections whose name starts with this prefix (repeatable).
    #[arg(long, value_name = "PREFIX")]
    pub exclude_collection_prefix: Vec<String>,
}

#[derive(Args, Debug)]
pub struct UnpackArgs {
    /// Archive file to read ("-" for stdin).
    pub archive: String,
    /// Directory to restore into.
    #[arg(long, value_name = "DIR")]
    pub out: PathBuf,
    /// Only restore these namespaces (repeatable, db.collection).
    #[arg(long = "namespace", value_name = "NS")]
    pub namespaces: Vec<Namespace>,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Archive file to read ("-" for stdin).
    pub archive: String,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Archive file to read ("-" for stdin).
    pub archive: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Open an archive for reading, `-` meaning stdin.
pub fn open_archive(path: &str) -> CliResult<Box<dyn Read>> {
    if path == STDIO {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(path).map_err(|err| io_error(&format!("open {path}"), err))?;
    Ok(Box::new(BufReader::new(file)))
}
