use std::io::{self, IsTerminal, Write};

use archivemux_mux::Summary;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
pub struct NamespaceRow {
    pub namespace: String,
    pub records: u64,
    pub bytes: u64,
    pub crc32: String,
}

#[derive(Serialize)]
pub struct SummaryOutput<'a> {
    pub schema_id: &'a str,
    pub archive: &'a str,
    pub namespaces: Vec<NamespaceRow>,
    pub total_records: u64,
    pub total_bytes: u64,
}

impl<'a> SummaryOutput<'a> {
    pub fn new(schema_id: &'a str, archive: &'a str, summary: &Summary) -> Self {
        let namespaces = summary
            .namespaces
            .iter()
            .map(|(ns, stats)| NamespaceRow {
                namespace: ns.to_string(),
                records: stats.records,
                bytes: stats.bytes,
                crc32: format!("{:08x}", stats.crc32),
            })
            .collect();
        Self {
            schema_id,
            archive,
            namespaces,
            total_records: summary.total_records(),
            total_bytes: summary.total_bytes(),
        }
    }
}

pub fn write_summary(
    out: &mut dyn Write,
    summary: &SummaryOutput<'_>,
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => write_json(out, summary),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["NAMESPACE", "RECORDS", "BYTES", "CRC32"]);
            for row in &summary.namespaces {
                table.add_row(vec![
                    row.namespace.clone(),
                    row.records.to_string(),
                    row.bytes.to_string(),
                    row.crc32.clone(),
                ]);
            }
            writeln!(out, "{table}")?;
            writeln!(
                out,
                "{} namespaces, {} records, {} bytes",
                summary.namespaces.len(),
                summary.total_records,
                summary.total_bytes
            )
        }
        OutputFormat::Pretty => {
            for row in &summary.namespaces {
                writeln!(
                    out,
                    "{} records={} bytes={} crc32={}",
                    row.namespace, row.records, row.bytes, row.crc32
                )?;
            }
            writeln!(
                out,
                "total records={} bytes={}",
                summary.total_records, summary.total_bytes
            )
        }
    }
}

pub fn write_json<T: Serialize>(out: &mut dyn Write, value: &T) -> io::Result<()> {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    writeln!(out, "{json}")
}
