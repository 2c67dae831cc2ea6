//! File access layer for SST files.
//!
//! An SST is written once, atomically, and read randomly afterwards.
//! `FileObj` is the small surface the rest of the engine relies on:
//! size, ranged reads, atomic create-and-write, and unlink.

use crate::error::{Error, Result};
use bytes::Bytes;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A read-only handle to an immutable SST file.
///
/// Ranged reads clone the underlying descriptor so concurrent readers
/// never contend on a shared cursor.
#[derive(Debug, Clone)]
pub struct FileObj {
    file: Arc<File>,
    path: PathBuf,
    size: u64,
}

impl FileObj {
    /// Opens an existing file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        Ok(Self { file: Arc::new(file), path: path.as_ref().to_path_buf(), size })
    }

    /// Atomically creates a file at `path` with the given contents and
    /// returns a read handle to it.
    ///
    /// The data is written to a sibling `.tmp` file, synced, and renamed
    /// into place, so readers never observe a partial file. A failed
    /// write leaves at most the temporary file behind.
    pub fn create_and_write<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<Self> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("tmp");

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, path)?;

        Self::open(path)
    }

    /// Returns the file size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the path this file was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads `length` bytes starting at `offset`.
    ///
    /// Fails with [`Error::Io`] if the range extends past the end of the
    /// file.
    pub fn read_to_slice(&self, offset: u64, length: usize) -> Result<Bytes> {
        if offset + length as u64 > self.size {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("read of {} bytes at {} past end of file ({})", length, offset, self.size),
            )));
        }

        // Clone the descriptor so the shared handle keeps no cursor state.
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; length];
        file.read_exact(&mut buffer)?;
        Ok(Bytes::from(buffer))
    }

    /// Unlinks the file from the filesystem.
    ///
    /// Existing handles keep working until dropped; the name is gone
    /// immediately.
    pub fn del_file(&self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}
