use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PAGE_SIZE};
use crate::storage::page::error::PageError;
use crate::storage::page::header::{PageHeader, HEADER_SIZE};

/// Bytes per slot entry: a u16 record offset and a u16 length. A 4KB
/// page never needs wider fields.
const SLOT_SIZE: usize = 4;

/// Slotted-page record operations.
///
/// Record data grows forward from just behind the header; the slot array
/// grows backward from the end of the page. A deleted record keeps its
/// slot with length zero, so slot indices stay stable for the lifetime
/// of the page.
pub struct PageManager;

impl Default for PageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PageManager {
    pub fn new() -> Self {
        Self
    }

    /// Largest record a freshly initialized page can take
    pub fn max_record_size() -> usize {
        PAGE_SIZE - HEADER_SIZE - SLOT_SIZE
    }

    pub fn init_page(&self, page: &mut Page) {
        let header = PageHeader::new();
        page.data[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    pub fn get_header(&self, page: &Page) -> PageHeader {
        PageHeader::from_bytes(&page.data[0..HEADER_SIZE])
    }

    pub fn set_header(&self, page: &mut Page, header: &PageHeader) {
        page.data[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    /// Insert a record and return its slot index
    pub fn insert_record(&self, page: &mut Page, data: &[u8]) -> Result<u32, PageError> {
        let mut header = self.get_header(page);

        if Self::free_space(&header) < data.len() + SLOT_SIZE {
            return Err(PageError::InsufficientSpace);
        }

        let slot = header.record_count as u32;
        let offset = header.free_space_offset;

        let start = offset as usize;
        page.data[start..start + data.len()].copy_from_slice(data);
        Self::write_slot(page, slot, offset, data.len() as u16);

        header.free_space_offset += data.len() as u16;
        header.record_count += 1;
        self.set_header(page, &header);

        Ok(slot)
    }

    pub fn get_record(&self, page: &Page, slot: u32) -> Result<Vec<u8>, PageError> {
        let header = self.get_header(page);
        if slot >= header.record_count as u32 {
            return Err(PageError::InvalidRecordId);
        }

        let (offset, length) = Self::read_slot(page, slot);
        if length == 0 {
            return Err(PageError::RecordNotFound);
        }

        let start = offset as usize;
        Ok(page.data[start..start + length as usize].to_vec())
    }

    pub fn update_record(&self, page: &mut Page, slot: u32, data: &[u8]) -> Result<(), PageError> {
        let mut header = self.get_header(page);
        if slot >= header.record_count as u32 {
            return Err(PageError::InvalidRecordId);
        }

        let (offset, length) = Self::read_slot(page, slot);
        if length == 0 {
            return Err(PageError::RecordNotFound);
        }

        if data.len() <= length as usize {
            // Shrinking update fits in place; the tail bytes are dead
            // until compaction, which this layer does not do
            let start = offset as usize;
            page.data[start..start + data.len()].copy_from_slice(data);
            Self::write_slot(page, slot, offset, data.len() as u16);
            return Ok(());
        }

        // A growing record is rewritten at the record frontier so its
        // slot index survives
        if Self::free_space(&header) < data.len() {
            return Err(PageError::InsufficientSpace);
        }
        let new_offset = header.free_space_offset;
        let start = new_offset as usize;
        page.data[start..start + data.len()].copy_from_slice(data);
        Self::write_slot(page, slot, new_offset, data.len() as u16);

        header.free_space_offset += data.len() as u16;
        self.set_header(page, &header);

        Ok(())
    }

    /// Tombstone the record: the slot stays, its length drops to zero
    pub fn delete_record(&self, page: &mut Page, slot: u32) -> Result<(), PageError> {
        let header = self.get_header(page);
        if slot >= header.record_count as u32 {
            return Err(PageError::InvalidRecordId);
        }

        let (offset, length) = Self::read_slot(page, slot);
        if length == 0 {
            return Err(PageError::RecordNotFound);
        }

        Self::write_slot(page, slot, offset, 0);

        Ok(())
    }

    /// Bytes between the record frontier and the slot array
    fn free_space(header: &PageHeader) -> usize {
        PAGE_SIZE - SLOT_SIZE * header.record_count as usize - header.free_space_offset as usize
    }

    fn slot_position(slot: u32) -> usize {
        PAGE_SIZE - SLOT_SIZE * (slot as usize + 1)
    }

    fn read_slot(page: &Page, slot: u32) -> (u16, u16) {
        let pos = Self::slot_position(slot);
        let offset = LittleEndian::read_u16(&page.data[pos..pos + 2]);
        let length = LittleEndian::read_u16(&page.data[pos + 2..pos + 4]);
        (offset, length)
    }

    fn write_slot(page: &mut Page, slot: u32, offset: u16, length: u16) {
        let pos = Self::slot_position(slot);
        LittleEndian::write_u16(&mut page.data[pos..pos + 2], offset);
        LittleEndian::write_u16(&mut page.data[pos + 2..pos + 4], length);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_page() -> Page {
        let mut page = Page::new(0);
        PageManager::new().init_page(&mut page);
        page
    }

    #[test]
    fn test_insert_and_get() {
        let pm = PageManager::new();
        let mut page = test_page();

        let slot = pm.insert_record(&mut page, b"hello").unwrap();
        assert_eq!(slot, 0);
        assert_eq!(pm.get_record(&page, slot).unwrap(), b"hello");

        let slot2 = pm.insert_record(&mut page, b"world").unwrap();
        assert_eq!(slot2, 1);
        assert_eq!(pm.get_record(&page, slot2).unwrap(), b"world");
        // first record untouched
        assert_eq!(pm.get_record(&page, slot).unwrap(), b"hello");
    }

    #[test]
    fn test_delete_tombstones_slot() {
        let pm = PageManager::new();
        let mut page = test_page();

        let a = pm.insert_record(&mut page, b"aaa").unwrap();
        let b = pm.insert_record(&mut page, b"bbb").unwrap();

        pm.delete_record(&mut page, a).unwrap();
        assert!(matches!(pm.get_record(&page, a), Err(PageError::RecordNotFound)));
        assert!(matches!(pm.delete_record(&mut page, a), Err(PageError::RecordNotFound)));

        // the other slot keeps its index
        assert_eq!(pm.get_record(&page, b).unwrap(), b"bbb");
    }

    #[test]
    fn test_update_in_place_and_grow() {
        let pm = PageManager::new();
        let mut page = test_page();

        let slot = pm.insert_record(&mut page, b"0123456789").unwrap();

        pm.update_record(&mut page, slot, b"short").unwrap();
        assert_eq!(pm.get_record(&page, slot).unwrap(), b"short");

        pm.update_record(&mut page, slot, b"a considerably longer record").unwrap();
        assert_eq!(pm.get_record(&page, slot).unwrap(), b"a considerably longer record");
    }

    #[test]
    fn test_insufficient_space() {
        let pm = PageManager::new();
        let mut page = test_page();

        let big = vec![0xabu8; PageManager::max_record_size()];
        pm.insert_record(&mut page, &big).unwrap();
        assert!(matches!(
            pm.insert_record(&mut page, b"x"),
            Err(PageError::InsufficientSpace)
        ));
    }

    #[test]
    fn test_slot_array_accounts_for_free_space() {
        let pm = PageManager::new();
        let mut page = test_page();

        // every insert consumes its payload plus one slot entry; the
        // page must fill exactly, never overflow into the slot array
        let payload = [0u8; 96];
        let per_record = payload.len() + SLOT_SIZE;
        let expected = (PAGE_SIZE - HEADER_SIZE) / per_record;

        let mut inserted = 0;
        while pm.insert_record(&mut page, &payload).is_ok() {
            inserted += 1;
            assert!(inserted <= expected);
        }
        assert_eq!(inserted, expected);
    }

    #[test]
    fn test_invalid_slot() {
        let pm = PageManager::new();
        let page = test_page();
        assert!(matches!(pm.get_record(&page, 3), Err(PageError::InvalidRecordId)));
    }
}
