pub mod bucket_page;
pub mod directory_page;
pub mod error;
pub mod key;
pub mod table;

pub use bucket_page::HashTableBucketPage;
pub use directory_page::{HashTableDirectoryPage, DIRECTORY_ARRAY_SIZE, MAX_BUCKET_DEPTH};
pub use error::HashTableError;
pub use key::{GenericKey, IndexKey, IndexValue};
pub use table::ExtendibleHashTable;
