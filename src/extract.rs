//! Whole-cabinet extraction.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::cabinet::Cabinet;
use crate::consts;
use crate::ctype::Decompressor;
use crate::error::{Error, PathReason, Result};
use crate::file::FileEntry;
use crate::router::{FileRouter, RouterStats, Target};
use crate::sink::{sanitize_path, DirectorySink, SinkFactory};

/// Settings for an extraction.
#[derive(Clone, Debug)]
pub struct Options {
    /// Record per-folder and per-file failures in the [`Report`] and go on
    /// with the rest of the cabinet, instead of stopping at the first one.
    pub continue_on_error: bool,
    /// Replace files that already exist in the output directory.
    pub overwrite: bool,
    /// Set each extracted file's modification time from the cabinet.
    pub preserve_timestamps: bool,
    /// When set to true by another thread, extraction stops with
    /// [`Error::Cancelled`] before the next data block.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            continue_on_error: false,
            overwrite: true,
            preserve_timestamps: true,
            cancel: None,
        }
    }
}

/// The outcome of an extraction that ran to the end.
#[derive(Debug, Default)]
pub struct Report {
    /// Number of files written in full.
    pub files_written: u32,
    /// Total bytes in the files written.
    pub bytes_written: u64,
    /// Failures collected under [`Options::continue_on_error`].
    pub folder_errors: Vec<FolderError>,
}

impl Report {
    /// Returns true if every file was extracted.
    pub fn is_complete(&self) -> bool {
        self.folder_errors.is_empty()
    }
}

/// A failure that cost one folder or one file, without stopping extraction.
#[derive(Debug)]
pub struct FolderError {
    /// The folder being extracted, if the failure belongs to one.
    pub folder: Option<usize>,
    /// The stored name of the affected file, if the failure belongs to one.
    pub file: Option<String>,
    /// What went wrong.
    pub error: Error,
}

/// Extracts every file of a cabinet, folder by folder.
pub struct Extractor<R> {
    cabinet: Cabinet<R>,
    options: Options,
    files_written: u32,
}

impl Extractor<File> {
    /// Opens the cabinet file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Extractor<File>> {
        let file = File::open(path.as_ref()).map_err(|err| Error::io("open", err))?;
        Ok(Extractor::new(Cabinet::new(file)?, options))
    }
}

impl<R: Read + Seek> Extractor<R> {
    /// Creates an extractor for an already parsed cabinet.
    pub fn new(cabinet: Cabinet<R>, options: Options) -> Extractor<R> {
        Extractor { cabinet, options, files_written: 0 }
    }

    /// Returns the cabinet being extracted.
    pub fn cabinet(&self) -> &Cabinet<R> {
        &self.cabinet
    }

    /// Returns the number of files written in full by the most recent
    /// extraction, counting those written before it stopped with an error.
    pub fn files_written(&self) -> u32 {
        self.files_written
    }

    /// Extracts every file beneath `out_dir`, which is created if needed.
    pub fn extract_to<P: AsRef<Path>>(&mut self, out_dir: P) -> Result<Report> {
        let mut sink = DirectorySink::new(
            out_dir.as_ref(),
            self.options.overwrite,
            self.options.preserve_timestamps,
        );
        self.extract_with(&mut sink)
    }

    /// Extracts every file into sinks made by `factory`.
    pub fn extract_with<F: SinkFactory>(&mut self, factory: &mut F) -> Result<Report> {
        let mut report = Report::default();
        self.files_written = 0;
        let folder_targets = self.plan(&mut report)?;
        for (index, targets) in folder_targets.into_iter().enumerate() {
            match self.extract_folder(index, targets, factory) {
                Ok(stats) => {
                    self.files_written += stats.files_written;
                    report.files_written += stats.files_written;
                    report.bytes_written += stats.bytes_written;
                    for (name, error) in stats.file_errors {
                        report.folder_errors.push(FolderError {
                            folder: Some(index),
                            file: Some(name),
                            error,
                        });
                    }
                }
                Err(error) if self.options.continue_on_error && error.is_recoverable() => {
                    warn!("skipping folder {}: {}", index, error);
                    report.folder_errors.push(FolderError {
                        folder: Some(index),
                        file: None,
                        error,
                    });
                }
                Err(error) => return Err(error),
            }
        }
        info!(
            "extracted {} files ({} bytes), {} errors",
            report.files_written,
            report.bytes_written,
            report.folder_errors.len()
        );
        Ok(report)
    }

    /// Validates every stored name before anything is written, and groups
    /// the files by folder.
    fn plan(&self, report: &mut Report) -> Result<Vec<Vec<Target>>> {
        let mut folder_targets = Vec::new();
        for (index, folder) in self.cabinet.folder_entries().enumerate() {
            let mut targets = Vec::with_capacity(folder.file_entries().len());
            for file in folder.file_entries() {
                let path = match target_path(file) {
                    Ok(path) => Some(path),
                    Err(error) if self.options.continue_on_error => {
                        warn!("skipping {:?}: {}", file.name(), error);
                        report.folder_errors.push(FolderError {
                            folder: Some(index),
                            file: Some(file.name().to_string()),
                            error,
                        });
                        None
                    }
                    Err(error) => return Err(error),
                };
                targets.push(Target::new(file, path));
            }
            folder_targets.push(targets);
        }
        Ok(folder_targets)
    }

    fn extract_folder<F: SinkFactory>(
        &mut self,
        index: usize,
        targets: Vec<Target>,
        factory: &mut F,
    ) -> Result<RouterStats> {
        let folder = self.cabinet.folder(index);
        debug!(
            "folder {}: type {:#06x}, {} blocks, {} files, {} bytes",
            index,
            folder.compression_bits(),
            folder.num_data_blocks(),
            targets.len(),
            folder.required_size()
        );
        // Every folder starts from fresh decoder state.
        let mut decompressor = folder.compression_type()?.into_decompressor()?;

        let mut router =
            FileRouter::new(index, targets, factory, self.options.continue_on_error);
        let result = self
            .route_blocks(index, &mut decompressor, &mut router)
            .and_then(|()| router.finish());
        if result.is_err() {
            self.files_written += router.files_written();
        }
        result
    }

    /// Decodes a folder's data blocks in order and hands the output to the
    /// router.
    fn route_blocks<F: SinkFactory>(
        &mut self,
        index: usize,
        decompressor: &mut Decompressor,
        router: &mut FileRouter<'_, F>,
    ) -> Result<()> {
        let cancel = self.options.cancel.clone();
        for (block_index, block) in self.cabinet.data_blocks(index)?.enumerate() {
            if cancel.as_ref().map_or(false, |flag| flag.load(Ordering::Relaxed)) {
                return Err(Error::Cancelled);
            }
            let block = block?;
            if !block.checksum_ok() {
                return Err(Error::BadBlockChecksum { folder: index, block: block_index });
            }
            let size = block.uncompressed_size();
            if size == 0 {
                return Err(Error::UnsupportedMultiVolume);
            }
            if size > consts::MAX_UNCOMPRESSED_BLOCK_SIZE {
                return Err(Error::DecodeError {
                    folder: index,
                    block: block_index,
                    detail: format!("block claims {} uncompressed bytes", size),
                });
            }
            trace!(
                "folder {} block {}: {} -> {} bytes",
                index,
                block_index,
                block.data.len(),
                size
            );
            let data = decompressor.decompress(block.data, size).map_err(|err| {
                Error::DecodeError {
                    folder: index,
                    block: block_index,
                    detail: err.to_string(),
                }
            })?;
            router.accept(&data)?;
        }
        Ok(())
    }
}

/// Maps a file's stored name to its output path, refusing names that did
/// not decode cleanly.
fn target_path(file: &FileEntry) -> Result<PathBuf> {
    if !file.is_name_valid() {
        return Err(Error::PathRejected {
            path: file.name().replace('\\', "/"),
            reason: PathReason::InvalidEncoding,
        });
    }
    sanitize_path(file.name())
}

/// Extracts the cabinet at `cab_path` into `out_dir`.
pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(
    cab_path: P,
    out_dir: Q,
    options: Options,
) -> Result<Report> {
    Extractor::open(cab_path, options)?.extract_to(out_dir)
}
