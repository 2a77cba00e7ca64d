pub mod heap;

pub use heap::{TableHeap, TableHeapError};
