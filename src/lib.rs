// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod table;
pub mod transaction;

// Re-export key items for convenient access
pub use storage::buffer::{BufferPool, BufferPoolError, BufferPoolManager, ParallelBufferPoolManager};
pub use storage::disk::DiskManager;
pub use storage::page::PageManager;
pub use index::hash::ExtendibleHashTable;
pub use table::TableHeap;
pub use transaction::{IsolationLevel, LockManager, Transaction, TransactionManager};
