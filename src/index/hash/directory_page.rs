use std::collections::HashMap;
use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Maximum local (and therefore global) depth the directory can represent
pub const MAX_BUCKET_DEPTH: u32 = 9;

/// Number of directory slots allocated on the page; only the first
/// `2^global_depth` are live
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_BUCKET_DEPTH;

const HEADER_BYTES: usize = 12; // page_id + lsn + global_depth
const LOCAL_DEPTHS_OFFSET: usize = HEADER_BYTES;
const BUCKET_PAGE_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

/// In-memory image of the hash table's directory page.
///
/// Persisted layout: `{ page_id: i32, lsn: i32, global_depth: u32,
/// local_depths: u8[2^MAX], bucket_page_ids: i32[2^MAX] }`.
pub struct HashTableDirectoryPage {
    page_id: PageId,
    lsn: i32,
    global_depth: u32,
    local_depths: [u8; DIRECTORY_ARRAY_SIZE],
    bucket_page_ids: [PageId; DIRECTORY_ARRAY_SIZE],
}

impl HashTableDirectoryPage {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            lsn: 0,
            global_depth: 0,
            local_depths: [0; DIRECTORY_ARRAY_SIZE],
            bucket_page_ids: [INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE],
        }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        let page_id = LittleEndian::read_i32(&data[0..4]);
        let lsn = LittleEndian::read_i32(&data[4..8]);
        let global_depth = LittleEndian::read_u32(&data[8..12]);

        let mut local_depths = [0u8; DIRECTORY_ARRAY_SIZE];
        local_depths
            .copy_from_slice(&data[LOCAL_DEPTHS_OFFSET..LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE]);

        let mut bucket_page_ids = [INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE];
        for (i, id) in bucket_page_ids.iter_mut().enumerate() {
            let off = BUCKET_PAGE_IDS_OFFSET + i * 4;
            *id = LittleEndian::read_i32(&data[off..off + 4]);
        }

        Self {
            page_id,
            lsn,
            global_depth,
            local_depths,
            bucket_page_ids,
        }
    }

    pub fn write_to(&self, data: &mut [u8]) {
        debug_assert!(BUCKET_PAGE_IDS_OFFSET + DIRECTORY_ARRAY_SIZE * 4 <= PAGE_SIZE);

        LittleEndian::write_i32(&mut data[0..4], self.page_id);
        LittleEndian::write_i32(&mut data[4..8], self.lsn);
        LittleEndian::write_u32(&mut data[8..12], self.global_depth);

        data[LOCAL_DEPTHS_OFFSET..LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE]
            .copy_from_slice(&self.local_depths);

        for (i, id) in self.bucket_page_ids.iter().enumerate() {
            let off = BUCKET_PAGE_IDS_OFFSET + i * 4;
            LittleEndian::write_i32(&mut data[off..off + 4], *id);
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    /// Mask with exactly `global_depth` low bits set
    pub fn global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth) - 1
    }

    /// Number of live directory slots
    pub fn size(&self) -> usize {
        1 << self.global_depth
    }

    /// Double the live directory, copying the existing half into the new
    /// one so every key keeps resolving to the same bucket
    pub fn incr_global_depth(&mut self) {
        assert!(
            self.global_depth < MAX_BUCKET_DEPTH,
            "directory cannot grow past depth {}",
            MAX_BUCKET_DEPTH
        );
        let old_size = self.size();
        for i in 0..old_size {
            self.local_depths[old_size + i] = self.local_depths[i];
            self.bucket_page_ids[old_size + i] = self.bucket_page_ids[i];
        }
        self.global_depth += 1;
    }

    pub fn decr_global_depth(&mut self) {
        assert!(self.global_depth > 0, "directory depth underflow");
        self.global_depth -= 1;
    }

    /// True iff every live slot's local depth is strictly below the
    /// global depth
    pub fn can_shrink(&self) -> bool {
        if self.global_depth == 0 {
            return false;
        }
        (0..self.size()).all(|i| (self.local_depths[i] as u32) < self.global_depth)
    }

    pub fn local_depth(&self, slot: usize) -> u32 {
        self.local_depths[slot] as u32
    }

    pub fn set_local_depth(&mut self, slot: usize, depth: u32) {
        debug_assert!(depth <= MAX_BUCKET_DEPTH);
        self.local_depths[slot] = depth as u8;
    }

    pub fn incr_local_depth(&mut self, slot: usize) {
        self.local_depths[slot] += 1;
    }

    pub fn decr_local_depth(&mut self, slot: usize) {
        self.local_depths[slot] -= 1;
    }

    /// Mask with exactly `local_depth(slot)` low bits set
    pub fn local_depth_mask(&self, slot: usize) -> u32 {
        (1u32 << self.local_depths[slot]) - 1
    }

    pub fn bucket_page_id(&self, slot: usize) -> PageId {
        self.bucket_page_ids[slot]
    }

    pub fn set_bucket_page_id(&mut self, slot: usize, page_id: PageId) {
        self.bucket_page_ids[slot] = page_id;
    }

    /// Sibling slot formed by flipping bit `local_depth - 1`
    pub fn split_image_index(&self, slot: usize) -> usize {
        debug_assert!(self.local_depths[slot] > 0);
        slot ^ (1 << (self.local_depths[slot] - 1))
    }

    /// Assert the directory invariants; a violation is a bug, not an
    /// error the caller can recover from.
    ///
    /// For every live slot: local depth never exceeds global depth, all
    /// slots pointing at one bucket agree on its local depth, and each
    /// bucket with local depth `d` is referenced by exactly
    /// `2^(global_depth - d)` slots.
    pub fn verify_integrity(&self) {
        let mut ref_counts: HashMap<PageId, u32> = HashMap::new();
        let mut depths: HashMap<PageId, u32> = HashMap::new();

        for i in 0..self.size() {
            let ld = self.local_depth(i);
            assert!(
                ld <= self.global_depth,
                "slot {}: local depth {} exceeds global depth {}",
                i,
                ld,
                self.global_depth
            );

            let page_id = self.bucket_page_id(i);
            assert_ne!(page_id, INVALID_PAGE_ID, "slot {} has no bucket", i);

            *ref_counts.entry(page_id).or_insert(0) += 1;
            match depths.get(&page_id) {
                Some(&known) => assert_eq!(
                    known, ld,
                    "bucket page {} has inconsistent local depths",
                    page_id
                ),
                None => {
                    depths.insert(page_id, ld);
                }
            }
        }

        for (page_id, count) in &ref_counts {
            let expected = 1u32 << (self.global_depth - depths[page_id]);
            assert_eq!(
                *count, expected,
                "bucket page {} referenced by {} slots, expected {}",
                page_id, count, expected
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_copies_live_prefix() {
        let mut dir = HashTableDirectoryPage::new(0);
        dir.set_bucket_page_id(0, 7);
        dir.set_local_depth(0, 0);
        assert_eq!(dir.size(), 1);

        dir.incr_global_depth();
        assert_eq!(dir.size(), 2);
        assert_eq!(dir.bucket_page_id(1), 7);
        assert_eq!(dir.local_depth(1), 0);
        dir.verify_integrity();
    }

    #[test]
    fn test_split_image_index() {
        let mut dir = HashTableDirectoryPage::new(0);
        dir.incr_global_depth();
        dir.incr_global_depth();

        dir.set_local_depth(1, 2);
        assert_eq!(dir.split_image_index(1), 0b11);

        dir.set_local_depth(2, 1);
        assert_eq!(dir.split_image_index(2), 0b11);
    }

    #[test]
    fn test_can_shrink() {
        let mut dir = HashTableDirectoryPage::new(0);
        assert!(!dir.can_shrink());

        dir.set_bucket_page_id(0, 3);
        dir.incr_global_depth();
        // both slots still at local depth 0 < 1
        assert!(dir.can_shrink());

        dir.set_local_depth(0, 1);
        assert!(!dir.can_shrink());
    }

    #[test]
    fn test_codec_roundtrip() {
        let mut dir = HashTableDirectoryPage::new(5);
        dir.set_bucket_page_id(0, 11);
        dir.incr_global_depth();
        dir.set_bucket_page_id(1, 13);
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);

        let mut data = [0u8; PAGE_SIZE];
        dir.write_to(&mut data);
        let decoded = HashTableDirectoryPage::from_bytes(&data);

        assert_eq!(decoded.page_id(), 5);
        assert_eq!(decoded.global_depth(), 1);
        assert_eq!(decoded.bucket_page_id(0), 11);
        assert_eq!(decoded.bucket_page_id(1), 13);
        assert_eq!(decoded.local_depth(1), 1);
        decoded.verify_integrity();
    }

    #[test]
    #[should_panic(expected = "inconsistent local depths")]
    fn test_verify_integrity_catches_mismatch() {
        let mut dir = HashTableDirectoryPage::new(0);
        dir.set_bucket_page_id(0, 3);
        dir.incr_global_depth();
        // slots 0 and 1 share a bucket but disagree on depth
        dir.set_local_depth(0, 1);
        dir.verify_integrity();
    }
}
