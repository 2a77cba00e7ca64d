use std::sync::Arc;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPool, BufferPoolError};
use crate::storage::page::{PageError, PageManager};

#[derive(Error, Debug)]
pub enum TableHeapError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("Tuple of {0} bytes does not fit in a page")]
    TupleTooLarge(usize),
}

/// Heap of variable-length tuples over a chain of slotted pages.
///
/// This is the surface that hands out the record identifiers the lock
/// manager serializes access on: a tuple's `Rid` stays stable for its
/// lifetime (deletes tombstone the slot, updates rewrite in place).
pub struct TableHeap {
    buffer_pool: Arc<dyn BufferPool>,
    page_manager: PageManager,
    first_page_id: Mutex<PageId>,
    // Serializes inserts so concurrent tail growth cannot drop a link
    // out of the page chain
    insert_latch: Mutex<()>,
}

impl TableHeap {
    /// Create a heap with one empty page
    pub fn new(buffer_pool: Arc<dyn BufferPool>) -> Result<Self, TableHeapError> {
        let page_manager = PageManager::new();

        let (page_ptr, page_id) = buffer_pool.new_page()?;
        {
            let mut page = page_ptr.write();
            page_manager.init_page(&mut page);
        }
        buffer_pool.unpin_page(page_id, true)?;

        Ok(Self {
            buffer_pool,
            page_manager,
            first_page_id: Mutex::new(page_id),
            insert_latch: Mutex::new(()),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        *self.first_page_id.lock()
    }

    /// Insert a tuple, first-fit over the page chain, appending a new
    /// linked page when every existing page is full
    pub fn insert_tuple(&self, data: &[u8]) -> Result<Rid, TableHeapError> {
        if data.len() > PageManager::max_record_size() {
            return Err(TableHeapError::TupleTooLarge(data.len()));
        }

        let _insert = self.insert_latch.lock();
        let mut page_id = self.first_page_id();

        loop {
            let page_ptr = self.buffer_pool.fetch_page(page_id)?;

            let (outcome, next_page_id) = {
                let mut page = page_ptr.write();
                match self.page_manager.insert_record(&mut page, data) {
                    Ok(slot) => (Some(slot), INVALID_PAGE_ID),
                    Err(PageError::InsufficientSpace) => {
                        let header = self.page_manager.get_header(&page);
                        (None, header.next_page_id)
                    }
                    Err(e) => {
                        drop(page);
                        self.buffer_pool.unpin_page(page_id, false)?;
                        return Err(e.into());
                    }
                }
            };

            if let Some(slot) = outcome {
                self.buffer_pool.unpin_page(page_id, true)?;
                return Ok(Rid::new(page_id, slot));
            }

            if next_page_id != INVALID_PAGE_ID {
                self.buffer_pool.unpin_page(page_id, false)?;
                page_id = next_page_id;
                continue;
            }

            // Tail of the chain and still no room: grow it
            let (new_ptr, new_page_id) = self.buffer_pool.new_page()?;
            let slot = {
                let mut new_page = new_ptr.write();
                self.page_manager.init_page(&mut new_page);
                let mut header = self.page_manager.get_header(&new_page);
                header.prev_page_id = page_id;
                self.page_manager.set_header(&mut new_page, &header);
                self.page_manager.insert_record(&mut new_page, data)?
            };

            {
                let mut page = page_ptr.write();
                let mut header = self.page_manager.get_header(&page);
                header.next_page_id = new_page_id;
                self.page_manager.set_header(&mut page, &header);
            }

            self.buffer_pool.unpin_page(page_id, true)?;
            self.buffer_pool.unpin_page(new_page_id, true)?;
            return Ok(Rid::new(new_page_id, slot));
        }
    }

    pub fn get_tuple(&self, rid: Rid) -> Result<Vec<u8>, TableHeapError> {
        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let page = page_ptr.read();
            self.page_manager.get_record(&page, rid.slot)
        };
        self.buffer_pool.unpin_page(rid.page_id, false)?;
        Ok(result?)
    }

    pub fn update_tuple(&self, rid: Rid, data: &[u8]) -> Result<(), TableHeapError> {
        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let mut page = page_ptr.write();
            self.page_manager.update_record(&mut page, rid.slot, data)
        };
        self.buffer_pool.unpin_page(rid.page_id, result.is_ok())?;
        Ok(result?)
    }

    pub fn delete_tuple(&self, rid: Rid) -> Result<(), TableHeapError> {
        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let mut page = page_ptr.write();
            self.page_manager.delete_record(&mut page, rid.slot)
        };
        self.buffer_pool.unpin_page(rid.page_id, result.is_ok())?;
        Ok(result?)
    }
}
