use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{Frame, FrameId, FramePtr, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::DiskManager;

/// Bookkeeping guarded by the pool latch. Every public operation holds
/// this latch from entry to return.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
    next_page_id: PageId,
}

/// One buffer pool instance: a fixed array of frames fronting the disk
/// manager, with LRU replacement over unpinned frames.
///
/// Page id allocation is strided: an instance created as shard `i` of
/// `n` hands out ids from the congruence class `page_id % n == i`, so a
/// parallel pool can route any id back to its owning instance.
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: usize,
    frames: Vec<FramePtr>,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    /// Stand-alone pool backed by its own database file
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::new_instance(pool_size, 1, 0, disk_manager))
    }

    /// One shard of a parallel pool sharing `disk_manager` with its peers
    pub fn new_instance(
        pool_size: usize,
        num_instances: usize,
        instance_index: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = i as FrameId;
            let page = Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Arc::new(RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(pool_size),
                next_page_id: instance_index as PageId,
            }),
            disk_manager,
        }
    }

    /// Create a new page in the buffer pool, pinned once
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = self.find_victim(&mut state)?;
        let page_id = self.allocate_page_id(&mut state)?;

        let frame = &self.frames[frame_id as usize];
        let page_ptr = {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                page_guard.reset();
                page_guard.page_id = page_id;
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
            frame_guard.page.clone()
        };

        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);

        Ok((page_ptr, page_id))
    }

    /// Fetch a page from the buffer pool or disk, pinning it
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidOperation(
                "Cannot fetch invalid page ID".to_string(),
            ));
        }

        let mut state = self.state.lock();

        // Already resident: bump the pin and shield it from eviction
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id as usize];
            let mut frame_guard = frame.write();
            frame_guard.pin_count += 1;
            state.replacer.pin(frame_id);
            return Ok(frame_guard.page.clone());
        }

        let frame_id = self.find_victim(&mut state)?;

        let frame = &self.frames[frame_id as usize];
        let page_ptr = {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                page_guard.reset();
                self.disk_manager.read_page(page_id, &mut page_guard)?;
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
            frame_guard.page.clone()
        };

        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);

        Ok(page_ptr)
    }

    /// Unpin a page, OR-ing `is_dirty` into the frame's dirty flag
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let state = self.state.lock();

        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();

        if frame_guard.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        frame_guard.pin_count -= 1;
        if is_dirty {
            // OR, never assign: an earlier writer's dirty bit must survive
            frame_guard.is_dirty = true;
        }

        if frame_guard.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page back to disk and clear its dirty flag
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidOperation(
                "Cannot flush invalid page ID".to_string(),
            ));
        }

        let state = self.state.lock();

        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();
        {
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(&page_guard)?;
        }
        frame_guard.is_dirty = false;

        Ok(())
    }

    /// Write every resident page back to disk
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let state = self.state.lock();

        for &frame_id in state.page_table.values() {
            let frame = &self.frames[frame_id as usize];
            let mut frame_guard = frame.write();
            {
                let page_guard = frame_guard.page.read();
                self.disk_manager.write_page(&page_guard)?;
            }
            frame_guard.is_dirty = false;
        }

        Ok(())
    }

    /// Delete a page from the buffer pool and deallocate it.
    /// Deleting a page that is not resident succeeds; deleting a pinned
    /// page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        self.disk_manager.deallocate_page(page_id);

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(()),
        };

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();

        if frame_guard.pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        if frame_guard.is_dirty {
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(&page_guard)?;
        }

        state.replacer.pin(frame_id);
        state.page_table.remove(&page_id);
        frame_guard.is_dirty = false;
        frame_guard.pin_count = 0;
        frame_guard.page.write().reset();
        state.free_list.push_back(frame_id);

        Ok(())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Next page id in this instance's stride
    fn allocate_page_id(&self, state: &mut PoolState) -> Result<PageId, BufferPoolError> {
        let page_id = state.next_page_id;
        state.next_page_id += self.num_instances as PageId;
        self.disk_manager.allocate_page(page_id)?;
        Ok(page_id)
    }

    /// Pick a frame for a new resident page: free list first, then the
    /// LRU victim. An evicted dirty page is written back before the
    /// frame is handed out.
    fn find_victim(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = state
            .replacer
            .victim()
            .ok_or(BufferPoolError::BufferPoolFull)?;

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();
        let old_page_id = frame_guard.page.read().page_id;

        if frame_guard.is_dirty {
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(&page_guard)?;
            drop(page_guard);
            frame_guard.is_dirty = false;
            debug!("evicted dirty page {} from frame {}", old_page_id, frame_id);
        }

        state.page_table.remove(&old_page_id);

        Ok(frame_id)
    }
}

impl BufferPool for BufferPoolManager {
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        BufferPoolManager::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        BufferPoolManager::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        BufferPoolManager::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolManager::flush_page(self, page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        BufferPoolManager::flush_all_pages(self)
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolManager::delete_page(self, page_id)
    }

    fn pool_size(&self) -> usize {
        BufferPoolManager::pool_size(self)
    }
}
