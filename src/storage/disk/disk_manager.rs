use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual page I/O against the database
/// file. Page ids are handed out by the buffer pool; page `p` lives at file
/// offset `(p - 1) * PAGE_SIZE` so that id 0 stays free as the invalid
/// sentinel.
pub struct DiskManager {
    db_file: Mutex<File>,
}

impl DiskManager {
    /// Create a new DiskManager over the specified database file
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        Ok(Self {
            db_file: Mutex::new(file),
        })
    }

    /// Read a page from disk into `buf`. Reading a page that has never been
    /// written yields a zeroed buffer, matching a freshly allocated page.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.flush()?;

        Ok(())
    }

    /// Number of pages currently materialized in the file. Used to seed the
    /// buffer pool's page id allocator when reopening a database.
    pub fn num_pages(&self) -> Result<PageId, DiskManagerError> {
        let file = self.db_file.lock();
        let file_size = file.metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as PageId)
    }

    fn page_offset(page_id: PageId) -> u64 {
        (page_id as u64 - 1) * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_then_read_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut out = [0u8; PAGE_SIZE];
        out[0..4].copy_from_slice(b"page");
        disk.write_page(3, &out).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        disk.read_page(3, &mut buf).unwrap();
        assert_eq!(&buf[0..4], b"page");
        assert_eq!(disk.num_pages().unwrap(), 3);
    }

    #[test]
    fn test_read_past_eof_yields_zeroes() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut buf = [7u8; PAGE_SIZE];
        disk.read_page(9, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_page_id_rejected() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        assert!(disk.read_page(INVALID_PAGE_ID, &mut buf).is_err());
        assert!(disk.write_page(INVALID_PAGE_ID, &buf).is_err());
    }
}
