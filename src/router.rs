use std::path::PathBuf;

use log::{trace, warn};

use crate::error::{Error, Result};
use crate::file::FileEntry;
use crate::sink::{FileSink, SinkFactory};

/// A file to be cut out of a folder's uncompressed stream.
#[derive(Clone, Debug)]
pub(crate) struct Target {
    name: String,
    /// `None` when the name was rejected; the file's bytes are discarded.
    path: Option<PathBuf>,
    start: u64,
    size: u64,
    date: u16,
    time: u16,
}

impl Target {
    pub(crate) fn new(entry: &FileEntry, path: Option<PathBuf>) -> Target {
        let (start, end) = entry.folder_range();
        let (date, time) = entry.dos_datetime();
        Target {
            name: entry.name().to_string(),
            path,
            start,
            size: end - start,
            date,
            time,
        }
    }

    fn end(&self) -> u64 {
        self.start + self.size
    }
}

enum Output<S> {
    Sink(S),
    Discard,
}

/// Totals for one folder.
#[derive(Debug, Default)]
pub(crate) struct RouterStats {
    pub(crate) files_written: u32,
    pub(crate) bytes_written: u64,
    /// Files that could not be written, under continue-on-error.
    pub(crate) file_errors: Vec<(String, Error)>,
}

/// Splits a folder's uncompressed stream into its files, opening each
/// file's sink on its first byte and closing it after its last.
pub(crate) struct FileRouter<'a, F: SinkFactory> {
    folder: usize,
    factory: &'a mut F,
    targets: Vec<Target>,
    next: usize,
    open: Option<Output<F::Sink>>,
    position: u64,
    continue_on_error: bool,
    stats: RouterStats,
}

impl<'a, F: SinkFactory> FileRouter<'a, F> {
    pub(crate) fn new(
        folder: usize,
        mut targets: Vec<Target>,
        factory: &'a mut F,
        continue_on_error: bool,
    ) -> FileRouter<'a, F> {
        targets.sort_by_key(|target| (target.start, target.size));
        FileRouter {
            folder,
            factory,
            targets,
            next: 0,
            open: None,
            position: 0,
            continue_on_error,
            stats: RouterStats::default(),
        }
    }

    /// Routes the next chunk of the folder's uncompressed stream.
    pub(crate) fn accept(&mut self, chunk: &[u8]) -> Result<()> {
        let chunk_start = self.position;
        let chunk_end = chunk_start + chunk.len() as u64;
        while self.next < self.targets.len() {
            let target = &self.targets[self.next];
            let (start, end) = (target.start, target.end());
            if start > chunk_end || (start == chunk_end && target.size > 0) {
                break;
            }
            if target.size == 0 {
                self.create_empty()?;
                self.next += 1;
                continue;
            }
            let from = (start.max(chunk_start) - chunk_start) as usize;
            let to = (end.min(chunk_end) - chunk_start) as usize;
            self.write(&chunk[from..to])?;
            if end > chunk_end {
                break;
            }
            self.close()?;
            self.next += 1;
        }
        self.position = chunk_end;
        Ok(())
    }

    /// Returns the number of files closed so far.
    pub(crate) fn files_written(&self) -> u32 {
        self.stats.files_written
    }

    /// Checks that every file was completed once the folder's data has run
    /// out, and returns the folder's totals.
    pub(crate) fn finish(&mut self) -> Result<RouterStats> {
        while let Some(target) = self.targets.get(self.next) {
            if target.start > self.position
                || (target.size > 0 && target.end() > self.position)
            {
                malformed!(
                    "folder {} ends after {} bytes but {:?} needs {}",
                    self.folder,
                    self.position,
                    target.name,
                    target.end()
                );
            }
            self.create_empty()?;
            self.next += 1;
        }
        Ok(std::mem::take(&mut self.stats))
    }

    fn create_empty(&mut self) -> Result<()> {
        self.open()?;
        self.close()
    }

    fn open(&mut self) -> Result<()> {
        let target = &self.targets[self.next];
        let (path, size) = (target.path.clone(), target.size);
        let output = match path {
            None => Output::Discard,
            Some(path) => match self.factory.create(&path, size) {
                Ok(sink) => Output::Sink(sink),
                Err(error) => {
                    self.fail(error)?;
                    Output::Discard
                }
            },
        };
        self.open = Some(output);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.open.is_none() {
            self.open()?;
        }
        if let Some(Output::Sink(sink)) = self.open.as_mut() {
            if let Err(error) = sink.write(bytes) {
                if let Some(Output::Sink(sink)) = self.open.take() {
                    sink.abort();
                }
                self.open = Some(Output::Discard);
                self.fail(error)?;
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let target = &self.targets[self.next];
        let (date, time, size) = (target.date, target.time, target.size);
        if let Some(Output::Sink(sink)) = self.open.take() {
            match sink.close(date, time) {
                Ok(()) => {
                    trace!("closed {:?} ({} bytes)", self.targets[self.next].name, size);
                    self.stats.files_written += 1;
                    self.stats.bytes_written += size;
                }
                Err(error) => self.fail(error)?,
            }
        }
        Ok(())
    }

    /// Records a per-file failure, or propagates it when not continuing.
    fn fail(&mut self, error: Error) -> Result<()> {
        if !self.continue_on_error {
            return Err(error);
        }
        let name = self.targets[self.next].name.clone();
        warn!("skipping {:?}: {}", name, error);
        self.stats.file_errors.push((name, error));
        Ok(())
    }
}

impl<'a, F: SinkFactory> Drop for FileRouter<'a, F> {
    fn drop(&mut self) {
        if let Some(Output::Sink(sink)) = self.open.take() {
            sink.abort();
        }
    }
}
