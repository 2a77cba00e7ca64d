use thiserror::Error;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum HashTableError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}
