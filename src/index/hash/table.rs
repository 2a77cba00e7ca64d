use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPool;
use super::bucket_page::HashTableBucketPage;
use super::directory_page::{HashTableDirectoryPage, MAX_BUCKET_DEPTH};
use super::error::HashTableError;
use super::key::{IndexKey, IndexValue};

/// Disk-resident extendible hash table. The directory and every bucket
/// are buffered pages; the table owns no storage of its own.
///
/// Point operations take the table latch in read mode plus the target
/// bucket's page latch; structural changes (split, merge, directory
/// growth and shrink) take the table latch in write mode. Latches are
/// always released before the matching unpin.
pub struct ExtendibleHashTable<K: IndexKey, V: IndexValue> {
    buffer_pool: Arc<dyn BufferPool>,
    table_latch: RwLock<()>,
    directory_page_id: Mutex<PageId>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: IndexKey, V: IndexValue> ExtendibleHashTable<K, V> {
    pub fn new(buffer_pool: Arc<dyn BufferPool>) -> Self {
        Self {
            buffer_pool,
            table_latch: RwLock::new(()),
            directory_page_id: Mutex::new(INVALID_PAGE_ID),
            _marker: PhantomData,
        }
    }

    /// Low 32 bits of the key's fingerprint
    fn hash(key: &K) -> u32 {
        key.fingerprint() as u32
    }

    /// Collect every value stored under `key`
    pub fn get_value(&self, key: &K) -> Result<Vec<V>, HashTableError> {
        let _table = self.table_latch.read();

        let (dir_ptr, dir_page_id) = self.fetch_directory()?;
        let directory = Self::read_directory(&dir_ptr);

        let bucket_index = (Self::hash(key) & directory.global_depth_mask()) as usize;
        let bucket_page_id = directory.bucket_page_id(bucket_index);
        let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;

        let result = {
            let page = bucket_ptr.read();
            let bucket = HashTableBucketPage::<K, V>::from_bytes(&page.data);
            bucket.get_value(key)
        };

        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        self.buffer_pool.unpin_page(dir_page_id, false)?;

        Ok(result)
    }

    /// Insert a key/value pair. Returns false on an exact duplicate, or
    /// when the target bucket is full and already at maximum depth.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        {
            let _table = self.table_latch.read();

            let (dir_ptr, dir_page_id) = self.fetch_directory()?;
            let directory = Self::read_directory(&dir_ptr);

            let bucket_index = (Self::hash(key) & directory.global_depth_mask()) as usize;
            let bucket_page_id = directory.bucket_page_id(bucket_index);
            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;

            let outcome = {
                let mut page = bucket_ptr.write();
                let mut bucket = HashTableBucketPage::<K, V>::from_bytes(&page.data);
                if bucket.is_full() {
                    None
                } else {
                    let inserted = bucket.insert(key, value);
                    if inserted {
                        bucket.write_to(&mut page.data);
                    }
                    Some(inserted)
                }
            };

            if let Some(inserted) = outcome {
                self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
                self.buffer_pool.unpin_page(dir_page_id, false)?;
                return Ok(inserted);
            }

            // Full bucket: release everything before escalating to the
            // write latch
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            self.buffer_pool.unpin_page(dir_page_id, false)?;
        }

        self.split_insert(key, value)
    }

    /// Split the key's bucket (growing the directory when needed) and
    /// retry the insert
    fn split_insert(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        {
            let _table = self.table_latch.write();

            let (dir_ptr, dir_page_id) = self.fetch_directory()?;
            let mut directory = Self::read_directory(&dir_ptr);

            let split_index = (Self::hash(key) & directory.global_depth_mask()) as usize;
            let old_depth = directory.local_depth(split_index);

            if old_depth >= MAX_BUCKET_DEPTH {
                self.buffer_pool.unpin_page(dir_page_id, false)?;
                return Ok(false);
            }

            if old_depth == directory.global_depth() {
                directory.incr_global_depth();
            }
            directory.incr_local_depth(split_index);
            let new_depth = directory.local_depth(split_index);

            let split_page_id = directory.bucket_page_id(split_index);
            let split_ptr = self.buffer_pool.fetch_page(split_page_id)?;
            let (image_ptr, image_page_id) = self.buffer_pool.new_page()?;

            let image_index = directory.split_image_index(split_index);
            directory.set_local_depth(image_index, new_depth);
            directory.set_bucket_page_id(image_index, image_page_id);

            // Retarget every slot of both residue classes before moving
            // entries, so redistribution resolves against final targets.
            // Slots congruent to the split index mod 2^new_depth keep the
            // old bucket; slots congruent to the image index get the new
            // one.
            let diff = 1usize << new_depth;
            let size = directory.size();
            let mut i = split_index % diff;
            while i < size {
                directory.set_bucket_page_id(i, split_page_id);
                directory.set_local_depth(i, new_depth);
                i += diff;
            }
            let mut i = image_index % diff;
            while i < size {
                directory.set_bucket_page_id(i, image_page_id);
                directory.set_local_depth(i, new_depth);
                i += diff;
            }

            {
                let mut split_page = split_ptr.write();
                let mut image_page = image_ptr.write();
                let mut split_bucket = HashTableBucketPage::<K, V>::from_bytes(&split_page.data);
                let mut image_bucket = HashTableBucketPage::<K, V>::from_bytes(&image_page.data);

                let saved = split_bucket.get_array_copy();
                split_bucket.reset();

                for (k, v) in &saved {
                    let target = (Self::hash(k) as usize) & (diff - 1);
                    let target_page_id = directory.bucket_page_id(target);
                    debug_assert!(
                        target_page_id == split_page_id || target_page_id == image_page_id
                    );
                    let moved = if target_page_id == split_page_id {
                        split_bucket.insert(k, v)
                    } else {
                        image_bucket.insert(k, v)
                    };
                    debug_assert!(moved, "redistributed entry must fit");
                }

                split_bucket.write_to(&mut split_page.data);
                image_bucket.write_to(&mut image_page.data);
            }

            {
                let mut dir_page = dir_ptr.write();
                directory.write_to(&mut dir_page.data);
            }

            debug!(
                "split bucket page {} into image page {} at depth {}",
                split_page_id, image_page_id, new_depth
            );

            self.buffer_pool.unpin_page(split_page_id, true)?;
            self.buffer_pool.unpin_page(image_page_id, true)?;
            self.buffer_pool.unpin_page(dir_page_id, true)?;
        }

        // The key may still land in a bucket that is full again; the
        // retry splits further until it fits or depth maxes out
        self.insert(key, value)
    }

    /// Remove a key/value pair; an emptied bucket triggers a merge
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        let removed;
        let became_empty;
        let bucket_index;
        {
            let _table = self.table_latch.read();

            let (dir_ptr, dir_page_id) = self.fetch_directory()?;
            let directory = Self::read_directory(&dir_ptr);

            bucket_index = (Self::hash(key) & directory.global_depth_mask()) as usize;
            let bucket_page_id = directory.bucket_page_id(bucket_index);
            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;

            {
                let mut page = bucket_ptr.write();
                let mut bucket = HashTableBucketPage::<K, V>::from_bytes(&page.data);
                removed = bucket.remove(key, value);
                if removed {
                    bucket.write_to(&mut page.data);
                }
                became_empty = bucket.is_empty();
            }

            self.buffer_pool.unpin_page(bucket_page_id, removed)?;
            self.buffer_pool.unpin_page(dir_page_id, false)?;
        }

        if became_empty {
            self.merge(bucket_index)?;
        }

        Ok(removed)
    }

    /// Fold an empty bucket into its split image and shrink the
    /// directory as far as it allows.
    ///
    /// Everything is re-checked under the write latch: the bucket may
    /// have been refilled, re-split, or already merged since the caller
    /// observed it empty.
    fn merge(&self, target_index: usize) -> Result<(), HashTableError> {
        let _table = self.table_latch.write();

        let (dir_ptr, dir_page_id) = self.fetch_directory()?;
        let mut directory = Self::read_directory(&dir_ptr);

        // A concurrent shrink can leave the caller's index beyond the
        // live prefix
        if target_index >= directory.size() {
            self.buffer_pool.unpin_page(dir_page_id, false)?;
            return Ok(());
        }

        let local_depth = directory.local_depth(target_index);
        if local_depth == 0 {
            self.buffer_pool.unpin_page(dir_page_id, false)?;
            return Ok(());
        }

        // Merging is only sound while the pair still mirrors one split
        let image_index = directory.split_image_index(target_index);
        if local_depth != directory.local_depth(image_index) {
            self.buffer_pool.unpin_page(dir_page_id, false)?;
            return Ok(());
        }

        let target_page_id = directory.bucket_page_id(target_index);
        let target_ptr = self.buffer_pool.fetch_page(target_page_id)?;
        let still_empty = {
            let page = target_ptr.read();
            HashTableBucketPage::<K, V>::from_bytes(&page.data).is_empty()
        };
        if !still_empty {
            self.buffer_pool.unpin_page(target_page_id, false)?;
            self.buffer_pool.unpin_page(dir_page_id, false)?;
            return Ok(());
        }

        self.buffer_pool.unpin_page(target_page_id, false)?;
        self.buffer_pool.delete_page(target_page_id)?;

        let image_page_id = directory.bucket_page_id(image_index);
        directory.set_bucket_page_id(target_index, image_page_id);
        directory.decr_local_depth(target_index);
        directory.decr_local_depth(image_index);
        let merged_depth = directory.local_depth(target_index);

        // Every slot that pointed at either half now points at the
        // survivor
        for i in 0..directory.size() {
            let page_id = directory.bucket_page_id(i);
            if page_id == target_page_id || page_id == image_page_id {
                directory.set_bucket_page_id(i, image_page_id);
                directory.set_local_depth(i, merged_depth);
            }
        }

        while directory.can_shrink() {
            directory.decr_global_depth();
        }

        {
            let mut dir_page = dir_ptr.write();
            directory.write_to(&mut dir_page.data);
        }

        debug!(
            "merged bucket page {} into {}, global depth now {}",
            target_page_id,
            image_page_id,
            directory.global_depth()
        );

        self.buffer_pool.unpin_page(dir_page_id, true)?;
        Ok(())
    }

    pub fn get_global_depth(&self) -> Result<u32, HashTableError> {
        let _table = self.table_latch.read();

        let (dir_ptr, dir_page_id) = self.fetch_directory()?;
        let depth = Self::read_directory(&dir_ptr).global_depth();
        self.buffer_pool.unpin_page(dir_page_id, false)?;

        Ok(depth)
    }

    /// Assert the directory invariants and that every stored entry
    /// hashes to a slot mapping to its bucket. Panics on violation.
    pub fn verify_integrity(&self) -> Result<(), HashTableError> {
        let _table = self.table_latch.read();

        let (dir_ptr, dir_page_id) = self.fetch_directory()?;
        let directory = Self::read_directory(&dir_ptr);
        directory.verify_integrity();

        let mut seen = HashSet::new();
        for i in 0..directory.size() {
            let bucket_page_id = directory.bucket_page_id(i);
            if !seen.insert(bucket_page_id) {
                continue;
            }

            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;
            {
                let page = bucket_ptr.read();
                let bucket = HashTableBucketPage::<K, V>::from_bytes(&page.data);
                for slot in 0..HashTableBucketPage::<K, V>::capacity() {
                    if !bucket.is_readable(slot) {
                        continue;
                    }
                    let key = bucket.key_at(slot);
                    let index = (Self::hash(&key) & directory.global_depth_mask()) as usize;
                    assert_eq!(
                        directory.bucket_page_id(index),
                        bucket_page_id,
                        "entry in bucket page {} hashes to slot {} which maps elsewhere",
                        bucket_page_id,
                        index
                    );
                }
            }
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
        }

        self.buffer_pool.unpin_page(dir_page_id, false)?;
        Ok(())
    }

    /// Fetch the directory page, creating it (and the first bucket)
    /// on first use
    fn fetch_directory(&self) -> Result<(PagePtr, PageId), HashTableError> {
        let mut dir_id = self.directory_page_id.lock();

        if *dir_id == INVALID_PAGE_ID {
            let (dir_ptr, new_dir_id) = self.buffer_pool.new_page()?;
            let (_bucket_ptr, bucket_page_id) = self.buffer_pool.new_page()?;

            {
                let mut page = dir_ptr.write();
                let mut directory = HashTableDirectoryPage::new(new_dir_id);
                directory.set_bucket_page_id(0, bucket_page_id);
                directory.write_to(&mut page.data);
            }
            // the fresh bucket page is all zeroes, which already encodes
            // an empty bucket

            self.buffer_pool.unpin_page(new_dir_id, true)?;
            self.buffer_pool.unpin_page(bucket_page_id, true)?;
            *dir_id = new_dir_id;

            debug!(
                "created hash directory page {} with first bucket page {}",
                new_dir_id, bucket_page_id
            );
        }

        let page_id = *dir_id;
        drop(dir_id);

        let page = self.buffer_pool.fetch_page(page_id)?;
        Ok((page, page_id))
    }

    fn read_directory(dir_ptr: &PagePtr) -> HashTableDirectoryPage {
        let page = dir_ptr.read();
        HashTableDirectoryPage::from_bytes(&page.data)
    }
}
