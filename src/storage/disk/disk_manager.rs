use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual disk I/O operations,
/// addressed by page id. Page ids are chosen by the buffer pool
/// (strided across instances); the disk manager only records them.
pub struct DiskManager {
    db_file: Mutex<File>,
    freed_pages: Mutex<HashSet<PageId>>,
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
            freed_pages: Mutex::new(HashSet::new()),
        })
    }

    /// Read a page from disk. Pages past the end of the file read back
    /// zeroed: allocated pages are materialized on their first write.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut buffer = [0u8; PAGE_SIZE];

        {
            let mut file = self.db_file.lock();
            let file_size = file.metadata()?.len();

            if offset >= file_size {
                page.data = [0; PAGE_SIZE];
                page.page_id = page_id;
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buffer)?;
        }

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = page.page_id as u64 * PAGE_SIZE as u64;

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Record a page id handed out by a buffer pool instance
    pub fn allocate_page(&self, page_id: PageId) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }
        self.freed_pages.lock().remove(&page_id);
        Ok(())
    }

    /// Record a freed page id. Freed ids are not reused; reclaiming them
    /// belongs to a free-space manager this layer does not have.
    pub fn deallocate_page(&self, page_id: PageId) {
        self.freed_pages.lock().insert(page_id);
    }
}
