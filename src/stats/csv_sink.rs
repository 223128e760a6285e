use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Append-only CSV file for one statistics stream.
///
/// The header is written at most once: only when the file is empty at the
/// time of the first row. Each row is flushed immediately so a crashed run
/// still leaves every exported episode on disk.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    header_written: bool,
}

impl CsvSink {
    /// Opens (or creates) `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<CsvSink> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let header_written = file.metadata()?.len() > 0;
        let writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        Ok(CsvSink { path, writer, header_written })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row, preceded by `header` if the file has none yet.
    pub fn append<H, R>(&mut self, header: H, row: R) -> Result<()>
    where
        H: IntoIterator,
        H::Item: AsRef<[u8]>,
        R: IntoIterator,
        R::Item: AsRef<[u8]>,
    {
        if !self.header_written {
            self.writer.write_record(header)?;
            self.header_written = true;
        }
        self.writer.write_record(row)?;
        self.writer.flush()?;
        Ok(())
    }
}
