mod cli;

use clap::Parser;
use cli::{Cli, Command, Verbosity};
use czi_format::{
    DirectoryParseOptions, Stream, SubBlockDirectory, read_attachments_directory, read_file_header,
    read_metadata_segment, segments,
};
use czi_repair::{
    ConsoleProgress, JxrSizeProbe, Patcher, RepairDetector, RepairInstruction, RepairProgress, SilentProgress,
};
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Top-level application errors for czi-repair.
#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to open CZI file '{}'", path.display()))]
    OpenFile {
        path: PathBuf,
        source: czi_repair::OpenFileError,
    },

    #[snafu(display("failed to read CZI file"))]
    ReadFile { source: czi_format::Error },

    #[snafu(display("failed to scan sub-blocks"))]
    Detect { source: czi_repair::DetectError },

    #[snafu(display("failed to patch file"))]
    Patch { source: czi_repair::PatchError },

    #[snafu(display("failed to write changes to '{}'", path.display()))]
    Flush {
        path: PathBuf,
        source: std::io::Error,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

struct Options {
    verbosity: Verbosity,
    parse_options: DirectoryParseOptions,
    progress: bool,
}

impl Options {
    fn progress(&self) -> Box<dyn RepairProgress> {
        if self.progress && self.verbosity > Verbosity::Quiet {
            Box::new(ConsoleProgress::new())
        } else {
            Box::new(SilentProgress)
        }
    }

    fn loud(&self) -> bool {
        self.verbosity > Verbosity::Quiet
    }
}

#[snafu::report]
fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity);

    let options = Options {
        verbosity: cli.verbosity,
        parse_options: if cli.strict {
            DirectoryParseOptions::strict()
        } else {
            DirectoryParseOptions::lax()
        },
        progress: !cli.no_progress,
    };

    match cli.command {
        Command::DryRun { path } => cmd_dry_run(&path, &options),
        Command::Patch { path } => cmd_patch(&path, &options),
        Command::Info { path } => cmd_info(&path, &options),
    }
}

fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter()));

    // Fails only if a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

fn cmd_dry_run(path: &Path, options: &Options) -> Result<()> {
    scan(path, options)?;

    Ok(())
}

fn cmd_patch(path: &Path, options: &Options) -> Result<()> {
    let repairs = scan(path, options)?;

    if repairs.is_empty() {
        return Ok(());
    }

    if options.loud() {
        println!("Opening the file in read-write mode to patch it.");
    }

    let mut stream = unsafe { czi_repair::open_file_mut(path).context(OpenFileSnafu { path })? };
    let progress = options.progress();
    let report = Patcher::new(&*progress)
        .apply(&mut stream, &repairs)
        .context(PatchSnafu)?;

    stream.get_ref().flush().context(FlushSnafu { path })?;

    if options.loud() {
        println!(
            "Patched {} field(s) in the sub-block directory.",
            report.directory_fields
        );
        println!("Patched {} field(s) in the sub-blocks.", report.subblock_fields);
    }

    Ok(())
}

/// Scans the file read-only and reports what needs a repair.
fn scan(path: &Path, options: &Options) -> Result<Vec<RepairInstruction>> {
    if options.verbosity == Verbosity::Verbose {
        println!("File: {}", path.display());
        println!();
    }

    let stream = unsafe { czi_repair::open_file(path).context(OpenFileSnafu { path })? };
    let progress = options.progress();
    let repairs = RepairDetector::new(&stream, JxrSizeProbe, &*progress)
        .with_options(options.parse_options)
        .detect()
        .context(DetectSnafu)?;

    if !options.loud() {
        return Ok(repairs);
    }

    if repairs.is_empty() {
        println!("No repair needed.");
        return Ok(repairs);
    }

    println!("Found discrepancies with {} sub-block(s).", repairs.len());

    if options.verbosity == Verbosity::Verbose {
        print_repairs(&stream, &repairs)?;
    }

    Ok(repairs)
}

fn print_repairs<S: Stream + ?Sized>(stream: &S, repairs: &[RepairInstruction]) -> Result<()> {
    let header = read_file_header(stream).context(ReadFileSnafu)?;
    let directory = SubBlockDirectory::read(stream, header.directory_position(), DirectoryParseOptions::lax())
        .context(ReadFileSnafu)?;

    for repair in repairs {
        if let Some(entry) = directory.get(repair.tile_index) {
            let declared = entry.physical_size();

            println!(
                "tile {}: declared {} -> {}",
                repair.tile_index,
                declared,
                repair.apply_to(declared)
            );
        }
    }

    Ok(())
}

fn cmd_info(path: &Path, options: &Options) -> Result<()> {
    let stream = unsafe { czi_repair::open_file(path).context(OpenFileSnafu { path })? };
    let header = read_file_header(&stream).context(ReadFileSnafu)?;
    let (major, minor) = header.version();

    println!("CZI: {}", path.display());
    println!();
    println!("Version:          {}.{}", major, minor);
    println!("Primary GUID:     {}", header.primary_file_guid());
    println!("File GUID:        {}", header.file_guid());
    println!("File Part:        {}", header.file_part());
    println!("Update Pending:   {}", header.update_pending());
    println!("File Size:        {} bytes", stream.len());
    println!("Directory:        0x{:X}", header.directory_position());
    println!("Metadata:         0x{:X}", header.metadata_position());
    println!("Attachments:      0x{:X}", header.attachment_directory_position());

    let mut by_kind = BTreeMap::new();

    for result in segments(&stream) {
        let (_, kind, _) = result.context(ReadFileSnafu)?;
        *by_kind.entry(kind.name()).or_insert(0usize) += 1;
    }

    println!();
    println!("Segments:");

    for (name, count) in &by_kind {
        println!("  {:<22}{}", name, count);
    }

    let directory = SubBlockDirectory::read(&stream, header.directory_position(), options.parse_options)
        .context(ReadFileSnafu)?;
    let mut by_compression = BTreeMap::new();

    for entry in &directory {
        *by_compression
            .entry(entry.compression().to_string())
            .or_insert(0usize) += 1;
    }

    println!();
    println!("Sub-blocks:       {}", directory.len());

    for (compression, count) in &by_compression {
        println!("  {:<22}{}", compression, count);
    }

    if header.metadata_position() != 0 {
        let metadata = read_metadata_segment(&stream, header.metadata_position()).context(ReadFileSnafu)?;
        println!("Metadata XML:     {} bytes", metadata.xml().len());
    }

    if header.attachment_directory_position() != 0 {
        let attachments =
            read_attachments_directory(&stream, header.attachment_directory_position()).context(ReadFileSnafu)?;

        println!("Attachments:      {}", attachments.len());

        for attachment in &attachments {
            println!(
                "  {:<22}{} at 0x{:X}",
                attachment.name, attachment.content_file_type, attachment.file_position
            );
        }
    }

    Ok(())
}
