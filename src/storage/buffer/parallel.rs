use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::manager::BufferPoolManager;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::DiskManager;

/// A buffer pool sharded into independent instances to cut latch
/// contention. Single-page operations route by `page_id % num_instances`,
/// which is exactly the congruence class each instance allocates from.
pub struct ParallelBufferPoolManager {
    instances: Vec<Arc<BufferPoolManager>>,
    next_instance: Mutex<usize>,
}

impl ParallelBufferPoolManager {
    pub fn new(
        num_instances: usize,
        pool_size: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        assert!(num_instances > 0, "a parallel pool needs at least one instance");

        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolManager::new_instance(
                    pool_size,
                    num_instances,
                    i,
                    disk_manager.clone(),
                ))
            })
            .collect();

        Ok(Self {
            instances,
            next_instance: Mutex::new(0),
        })
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Instance responsible for the given page id
    fn instance_for(&self, page_id: PageId) -> &Arc<BufferPoolManager> {
        &self.instances[page_id.rem_euclid(self.instances.len() as PageId) as usize]
    }
}

impl BufferPool for ParallelBufferPoolManager {
    /// Try each instance once, starting where the last allocation left
    /// off, and take the first that has a frame to spare
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut cursor = self.next_instance.lock();

        for _ in 0..self.instances.len() {
            let instance = &self.instances[*cursor];
            *cursor = (*cursor + 1) % self.instances.len();

            match instance.new_page() {
                Ok(result) => return Ok(result),
                Err(BufferPoolError::BufferPoolFull) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BufferPoolError::BufferPoolFull)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).flush_page(page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).delete_page(page_id)
    }

    fn pool_size(&self) -> usize {
        self.instances.iter().map(|i| i.pool_size()).sum()
    }
}
