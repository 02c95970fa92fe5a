use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Streaming WARC and ARC archive tool
#[derive(Parser, Debug)]
#[command(version)]
pub struct Args {
    /// Specifies the operation to perform.
    #[command(subcommand)]
    pub command: Command,

    /// Filter log messages by level.
    #[clap(long, default_value = "off")]
    pub log_level: super::logging::Level,

    /// Write log messages to the given file instead of standard error.
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Write log messages as JSON sequences instead of a console logging format.
    #[clap(long)]
    pub log_json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Index(IndexCommand),
    Check(CheckCommand),
    Extract(ExtractCommand),
    Recompress(RecompressCommand),
}

/// Streams an NDJSON index with one object per archive record.
#[derive(Parser, Debug)]
pub struct IndexCommand {
    /// Archive files to index ('-' reads standard input).
    #[clap(required = true)]
    pub inputs: Vec<String>,

    /// Comma-separated fields to include.
    ///
    /// Recognized keys: offset, length, filename, http:status,
    /// http:<header>, and any WARC header name.
    #[clap(long, short, default_value = "offset,warc-type,warc-target-uri")]
    pub fields: String,

    /// Write the index to a file instead of standard output.
    #[clap(long, short)]
    pub output: Option<PathBuf>,
}

/// Verifies record digests; exits 1 when any record fails.
#[derive(Parser, Debug)]
pub struct CheckCommand {
    /// Archive files to check ('-' reads standard input).
    #[clap(required = true)]
    pub inputs: Vec<String>,

    /// Also report records whose digests pass or are absent.
    #[clap(long, short)]
    pub verbose: bool,
}

/// Writes one record from an archive to standard output.
#[derive(Parser, Debug)]
pub struct ExtractCommand {
    /// Path of the archive file.
    pub file: PathBuf,

    /// Byte offset of the record in the file.
    pub offset: u64,

    /// Write only the decoded payload.
    #[clap(long, group = "part")]
    pub payload: bool,

    /// Write only the record and HTTP headers.
    #[clap(long, group = "part")]
    pub headers: bool,
}

/// Rewrites an archive with one gzip member per record.
#[derive(Parser, Debug)]
pub struct RecompressCommand {
    /// Path of the archive to repair.
    pub input: PathBuf,

    /// Path of the per-record-gzipped WARC to create.
    pub output: PathBuf,

    /// Report a per-run summary.
    #[clap(long, short)]
    pub verbose: bool,
}
