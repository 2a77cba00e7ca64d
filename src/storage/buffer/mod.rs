pub mod error;
pub mod manager;
pub mod parallel;
pub mod replacer;

pub use error::BufferPoolError;
pub use manager::BufferPoolManager;
pub use parallel::ParallelBufferPoolManager;

use crate::common::types::{PageId, PagePtr};

/// Seam between the buffer layer and its consumers (hash index, table
/// heap). Implemented by both the single pool instance and the parallel
/// pool, so consumers never care which one they run on.
///
/// Every successful `new_page`/`fetch_page` must be matched by exactly
/// one `unpin_page`; callers release any page latch they hold before
/// unpinning.
pub trait BufferPool: Send + Sync {
    /// Allocate a fresh page, pinned once
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError>;

    /// Pin a page, reading it from disk if it is not resident
    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError>;

    /// Drop one pin; `is_dirty` is OR-ed into the frame's dirty flag
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError>;

    /// Write a resident page back to disk and clear its dirty flag
    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;

    /// Write every resident page back to disk
    fn flush_all_pages(&self) -> Result<(), BufferPoolError>;

    /// Drop a page from the pool and deallocate it; fails if pinned
    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;

    /// Total number of frames
    fn pool_size(&self) -> usize;
}
