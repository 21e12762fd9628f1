mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "archivemux", version, about = "Multiplexed dump archive CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "ARCHIVEMUX_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::debug!(code = err.code, "command failed");
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pack_subcommand() {
        let cli = Cli::try_parse_from([
            "archivemux",
            "pack",
            "/tmp/dump",
            "--archive",
            "/tmp/out.archive",
            "-j",
            "2",
            "--exclude-collection",
            "users",
            "--exclude-collection-prefix",
            "tmp_",
        ])
        .expect("pack args should parse");

        let Command::Pack(args) = cli.command else {
            panic!("expected pack");
        };
        assert_eq!(args.concurrency, 2);
        assert_eq!(args.exclude_collection, ["users"]);
        assert_eq!(args.exclude_collection_prefix, ["tmp_"]);
    }

    #[test]
    fn pack_requires_archive() {
        let err = Cli::try_parse_from(["archivemux", "pack", "/tmp/dump"])
            .expect_err("missing --archive should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_unpack_namespaces() {
        let cli = Cli::try_parse_from([
            "archivemux",
            "unpack",
            "-",
            "--out",
            "/tmp/restore",
            "--namespace",
            "shop.orders",
        ])
        .expect("unpack args should parse");

        let Command::Unpack(args) = cli.command else {
            panic!("expected unpack");
        };
        assert_eq!(args.archive, "-");
        assert_eq!(args.namespaces[0].to_string(), "shop.orders");
    }

    #[test]
    fn rejects_namespace_without_collection() {
        let err = Cli::try_parse_from([
            "archivemux",
            "unpack",
            "a.archive",
            "--out",
            "/tmp/restore",
            "--namespace",
            "shop",
        ])
        .expect_err("namespace without collection should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_verify_with_global_format() {
        let cli = Cli::try_parse_from(["archivemux", "verify", "a.archive", "--format", "pretty"])
            .expect("verify args should parse");
        assert!(matches!(cli.command, Command::Verify(_)));
        assert!(matches!(cli.format, Some(OutputFormat::Pretty)));
    }
}
