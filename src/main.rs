use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use cabextract::{
    Cabinet, CompressionType, Error, Extractor, FileEntry, FolderEntry, Options,
};
use clap::{ArgAction, Parser, Subcommand};
use log::error;

/// Extracts files from Windows cabinet (CAB) archives
#[derive(Parser)]
#[command(name = "cabextract")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increases logging; repeat for more detail
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extracts every file in a cabinet
    Extract {
        /// Path to the cabinet file
        cab: PathBuf,

        /// Output directory
        outdir: PathBuf,

        /// Skips damaged folders and files instead of stopping
        #[arg(long)]
        keep_going: bool,

        /// Fails instead of replacing files that already exist
        #[arg(long)]
        no_overwrite: bool,

        /// Leaves extracted files with the current time
        #[arg(long)]
        no_timestamps: bool,
    },

    /// Lists files in a cabinet
    List {
        /// Lists in long format
        #[arg(short, long)]
        long: bool,

        /// Path to the cabinet file
        cab: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .init();

    match cli.command {
        Command::Extract { cab, outdir, keep_going, no_overwrite, no_timestamps } => {
            let options = Options {
                continue_on_error: keep_going,
                overwrite: !no_overwrite,
                preserve_timestamps: !no_timestamps,
                cancel: None,
            };
            cmd_extract(&cab, &outdir, options)
        }
        Command::List { long, cab } => match cmd_list(&cab, long) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {:#}", err);
                ExitCode::from(2)
            }
        },
    }
}

fn cmd_extract(cab: &Path, outdir: &Path, options: Options) -> ExitCode {
    let mut extractor = match Extractor::open(cab, options) {
        Ok(extractor) => extractor,
        Err(err) => {
            eprintln!("error: {}: {}", cab.display(), err);
            return ExitCode::from(2);
        }
    };
    match extractor.extract_to(outdir) {
        Ok(report) => {
            for failure in &report.folder_errors {
                match (&failure.file, failure.folder) {
                    (Some(file), _) => error!("{}: {}", file, failure.error),
                    (None, Some(folder)) => {
                        error!("folder {}: {}", folder, failure.error)
                    }
                    (None, None) => error!("{}", failure.error),
                }
            }
            println!(
                "{}: {} files, {} bytes",
                cab.display(),
                report.files_written,
                report.bytes_written
            );
            if report.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(err) => {
            eprintln!("error: {}: {}", cab.display(), err);
            ExitCode::from(failure_code(&err, extractor.files_written()))
        }
    }
}

/// A cabinet that could not be read at all exits with 2; once some files
/// have been written, a later failure is a partial extraction and exits
/// with 1.
fn failure_code(err: &Error, files_written: u32) -> u8 {
    if err.is_archive_error() && files_written == 0 {
        2
    } else {
        1
    }
}

fn cmd_list(cab: &Path, long: bool) -> anyhow::Result<()> {
    let file = File::open(cab)
        .with_context(|| format!("failed to open {}", cab.display()))?;
    let cabinet = Cabinet::new(file)
        .with_context(|| format!("failed to read {}", cab.display()))?;
    for (index, folder) in cabinet.folder_entries().enumerate() {
        for file in folder.file_entries() {
            list_file(index, folder, file, long);
        }
    }
    Ok(())
}

fn list_file(folder_index: usize, folder: &FolderEntry, file: &FileEntry, long: bool) {
    if !long {
        println!("{}", file.name());
        return;
    }
    let ctype = match folder.compression_type() {
        Ok(CompressionType::None) => "None".to_string(),
        Ok(CompressionType::MsZip) => "MsZip".to_string(),
        Ok(CompressionType::Quantum(v, m)) => format!("Q{}/{}", v, m),
        Ok(CompressionType::Lzx(w)) => format!("Lzx{}", w),
        Err(_) => format!("?{:04x}", folder.compression_bits()),
    };
    let file_size = if file.uncompressed_size() >= 100_000_000 {
        format!("{} MB", file.uncompressed_size() / (1 << 20))
    } else if file.uncompressed_size() >= 1_000_000 {
        format!("{} kB", file.uncompressed_size() / (1 << 10))
    } else {
        format!("{} B ", file.uncompressed_size())
    };
    println!(
        "{}{}{}{}{}{} {:>2} {:<5} {:>10} {} {}",
        if file.is_read_only() { 'R' } else { '-' },
        if file.is_hidden() { 'H' } else { '-' },
        if file.is_system() { 'S' } else { '-' },
        if file.is_archive() { 'A' } else { '-' },
        if file.is_exec() { 'E' } else { '-' },
        if file.is_name_utf() { 'U' } else { '-' },
        folder_index,
        ctype,
        file_size,
        file.datetime()
            .map(|dt| dt.to_string())
            .unwrap_or_else(|| "invalid datetime".to_string()),
        file.name()
    );
}
