use crate::common::types::PAGE_SIZE;
use super::key::{IndexKey, IndexValue};

/// In-memory image of one hash bucket page, decoded from and encoded to
/// the page's byte array.
///
/// Layout: occupied bitmap, readable bitmap, then `capacity()` key/value
/// slots. `occupied` marks slots that ever held an entry (tombstones
/// included); `readable` marks slots that currently hold one, so
/// `readable` is always a subset of `occupied`.
pub struct HashTableBucketPage<K: IndexKey, V: IndexValue> {
    occupied: Vec<u8>,
    readable: Vec<u8>,
    entries: Vec<(K, V)>,
}

fn bitmap_len(capacity: usize) -> usize {
    capacity.div_ceil(8)
}

impl<K: IndexKey, V: IndexValue> HashTableBucketPage<K, V> {
    /// Slots per bucket: the largest count whose two bitmaps and entry
    /// array still fit a page
    pub fn capacity() -> usize {
        let pair_size = K::SIZE + V::SIZE;
        let mut cap = (PAGE_SIZE * 8) / (pair_size * 8 + 2);
        while 2 * bitmap_len(cap) + cap * pair_size > PAGE_SIZE {
            cap -= 1;
        }
        cap
    }

    pub fn new() -> Self {
        let cap = Self::capacity();
        let zero = vec![0u8; K::SIZE.max(V::SIZE)];
        let zero_entry = (K::from_bytes(&zero), V::from_bytes(&zero));
        Self {
            occupied: vec![0; bitmap_len(cap)],
            readable: vec![0; bitmap_len(cap)],
            entries: vec![zero_entry; cap],
        }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        let cap = Self::capacity();
        let bl = bitmap_len(cap);
        let pair_size = K::SIZE + V::SIZE;

        let occupied = data[0..bl].to_vec();
        let readable = data[bl..2 * bl].to_vec();

        let mut entries = Vec::with_capacity(cap);
        for i in 0..cap {
            let off = 2 * bl + i * pair_size;
            let key = K::from_bytes(&data[off..off + K::SIZE]);
            let value = V::from_bytes(&data[off + K::SIZE..off + pair_size]);
            entries.push((key, value));
        }

        Self {
            occupied,
            readable,
            entries,
        }
    }

    pub fn write_to(&self, data: &mut [u8]) {
        let bl = self.occupied.len();
        let pair_size = K::SIZE + V::SIZE;

        data[0..bl].copy_from_slice(&self.occupied);
        data[bl..2 * bl].copy_from_slice(&self.readable);

        for (i, (key, value)) in self.entries.iter().enumerate() {
            let off = 2 * bl + i * pair_size;
            key.write_to(&mut data[off..off + K::SIZE]);
            value.write_to(&mut data[off + K::SIZE..off + pair_size]);
        }
    }

    /// Insert into the first free slot. Rejects an exact key/value
    /// duplicate and a full bucket.
    pub fn insert(&mut self, key: &K, value: &V) -> bool {
        let mut available = None;
        for i in 0..self.entries.len() {
            if self.is_readable(i) {
                if self.entries[i].0 == *key && self.entries[i].1 == *value {
                    return false;
                }
            } else if available.is_none() {
                available = Some(i);
            }
        }

        let slot = match available {
            Some(slot) => slot,
            None => return false,
        };

        self.entries[slot] = (*key, *value);
        self.set_occupied(slot);
        self.set_readable(slot);
        true
    }

    /// Collect the values of every live entry matching `key`
    pub fn get_value(&self, key: &K) -> Vec<V> {
        let mut result = Vec::new();
        for i in 0..self.entries.len() {
            if self.is_readable(i) && self.entries[i].0 == *key {
                result.push(self.entries[i].1);
            }
        }
        result
    }

    /// Remove the first live entry matching both key and value
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        for i in 0..self.entries.len() {
            if self.is_readable(i) && self.entries[i].0 == *key && self.entries[i].1 == *value {
                self.remove_at(i);
                return true;
            }
        }
        false
    }

    pub fn key_at(&self, slot: usize) -> K {
        self.entries[slot].0
    }

    pub fn value_at(&self, slot: usize) -> V {
        self.entries[slot].1
    }

    /// Clear the readable bit only; occupied stays set as a tombstone
    pub fn remove_at(&mut self, slot: usize) {
        self.readable[slot / 8] &= !(1 << (slot % 8));
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        self.occupied[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn set_occupied(&mut self, slot: usize) {
        self.occupied[slot / 8] |= 1 << (slot % 8);
    }

    pub fn is_readable(&self, slot: usize) -> bool {
        self.readable[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn set_readable(&mut self, slot: usize) {
        self.readable[slot / 8] |= 1 << (slot % 8);
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readable.iter().all(|&b| b == 0)
    }

    pub fn num_readable(&self) -> usize {
        self.readable.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Dense copy of the live entries, for redistribution during a split
    pub fn get_array_copy(&self) -> Vec<(K, V)> {
        (0..self.entries.len())
            .filter(|&i| self.is_readable(i))
            .map(|i| self.entries[i])
            .collect()
    }

    /// Zero both bitmaps and the entry array
    pub fn reset(&mut self) {
        self.occupied.iter_mut().for_each(|b| *b = 0);
        self.readable.iter_mut().for_each(|b| *b = 0);
        let zero = vec![0u8; K::SIZE.max(V::SIZE)];
        let zero_entry = (K::from_bytes(&zero), V::from_bytes(&zero));
        self.entries.iter_mut().for_each(|e| *e = zero_entry);
    }
}

impl<K: IndexKey, V: IndexValue> Default for HashTableBucketPage<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
