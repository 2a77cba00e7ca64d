use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type; pages live in a single database file addressed by id
pub type PageId = i32;

/// Sentinel id for "no page"
pub const INVALID_PAGE_ID: PageId = -1;

/// Buffer pool frame ID type, an index into a pool instance's frame array
pub type FrameId = u32;

/// Transaction ID type; lower ids belong to older transactions
pub type TxnId = u32;

/// LSN (Log Sequence Number) type
pub type Lsn = u64;

/// Record identifier: a page and a slot within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    /// Zero the data and reset metadata to the invalid page
    pub fn reset(&mut self) {
        self.data = [0; PAGE_SIZE];
        self.page_id = INVALID_PAGE_ID;
        self.lsn = 0;
    }
}

/// Smart pointer to a page; the RwLock doubles as the page latch
pub type PagePtr = Arc<RwLock<Page>>;

/// Buffer pool frame structure. Pin count and dirty flag belong to the
/// frame, not the page: they describe residency, not content.
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            is_dirty: false,
            pin_count: 0,
        }
    }
}

/// Smart pointer to a frame
pub type FramePtr = Arc<RwLock<Frame>>;
