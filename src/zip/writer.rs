use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

/// The archive output file with an explicit write cursor.
///
/// Payload bytes stream in sequentially at the cursor; local headers are
/// reserved with `skip` and back-patched with `write_at` once their CRC
/// and compressed size are known. Every byte region is written exactly
/// once before the trailer phase.
#[derive(Debug)]
pub struct ArchiveWriter {
    file: File,
    path: PathBuf,
    offset: u64,
}

impl ArchiveWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).map_err(|e| Error::IO(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            offset: 0,
        })
    }

    /// Current write position, which is also the archive length so far
    /// during the sequential phases.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Reserves `len` bytes at the cursor by seeking past them.
    pub fn skip(&mut self, len: u64) -> Result<()> {
        self.offset += len;
        self.file
            .seek(SeekFrom::Start(self.offset))
            .map_err(|e| Error::IO(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }

    /// Appends bytes at the cursor.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        Write::write_all(self, bytes)?;
        Ok(())
    }

    /// Fills a previously reserved region, leaving the cursor where it
    /// was.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(bytes))
            .and_then(|_| self.file.seek(SeekFrom::Start(self.offset)))
            .map_err(|e| Error::IO(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }

    /// Flushes the archive to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file
            .flush()
            .and_then(|_| self.file.sync_all())
            .map_err(|e| Error::IO(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

impl Write for ArchiveWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self
            .file
            .write(buf)
            .map_err(|e| io::Error::other(format!("{}: {}", self.path.display(), e)))?;
        self.offset += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
