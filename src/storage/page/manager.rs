use crate::common::types::{Page, PageId};
use crate::storage::page::error::PageError;
use crate::storage::page::header::PageHeader;
use crate::storage::page::layout::{Slot, HEADER_SIZE, SLOT_SIZE};

/// Record-level operations on a slotted page.
///
/// This is the surface the log and recovery layers drive: insertion, the
/// two-phase delete (mark, then apply), rollback of a mark, in-place update,
/// and slot-addressed restore for redo/undo. The full table heap sits above
/// this and is not part of the engine.
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

    pub fn init_page(&self, page: &mut Page) {
        self.init_page_with_links(page, crate::common::types::INVALID_PAGE_ID);
    }

    /// Initialize a fresh record page, linking it after `prev_page_id`.
    pub fn init_page_with_links(&self, page: &mut Page, prev_page_id: PageId) {
        let mut header = PageHeader::new();
        header.prev_page_id = prev_page_id;
        self.set_header(page, header);
    }

    pub fn get_header(&self, page: &Page) -> PageHeader {
        PageHeader::from_bytes(&page.data[0..HEADER_SIZE])
    }

    pub fn set_header(&self, page: &mut Page, header: PageHeader) {
        page.data[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    pub fn record_count(&self, page: &Page) -> u32 {
        self.get_header(page).record_count
    }

    /// LSN of the latest log record applied to this page image.
    pub fn page_lsn(&self, page: &Page) -> crate::common::types::Lsn {
        self.get_header(page).page_lsn
    }

    /// Stamp the durable LSN; callers also mirror it into `page.lsn` so the
    /// buffer pool's WAL-before-flush guard sees it.
    pub fn set_page_lsn(&self, page: &mut Page, lsn: crate::common::types::Lsn) {
        let mut header = self.get_header(page);
        header.page_lsn = lsn;
        self.set_header(page, header);
        page.lsn = lsn;
    }

    /// Append a record and return its slot number.
    pub fn insert_record(&self, page: &mut Page, data: &[u8]) -> Result<u32, PageError> {
        let mut header = self.get_header(page);
        let needed = data.len() as u32 + SLOT_SIZE as u32;
        if header.free_space_size < needed {
            return Err(PageError::InsufficientSpace);
        }

        let slot_index = header.record_count;
        let slot = Slot {
            offset: header.free_space_offset,
            length: data.len() as u32,
        };

        let start = header.free_space_offset as usize;
        page.data[start..start + data.len()].copy_from_slice(data);
        let slot_pos = Slot::position(slot_index);
        page.data[slot_pos..slot_pos + SLOT_SIZE].copy_from_slice(&slot.to_bytes());

        header.free_space_offset += data.len() as u32;
        header.free_space_size -= needed;
        header.record_count += 1;
        self.set_header(page, header);

        Ok(slot_index)
    }

    /// Fetch a live record's bytes.
    pub fn get_record(&self, page: &Page, slot_index: u32) -> Result<Vec<u8>, PageError> {
        let slot = self.get_slot(page, slot_index)?;
        if slot.is_vacant() {
            return Err(PageError::RecordNotFound);
        }
        if slot.is_deleted() {
            return Err(PageError::RecordDeleted);
        }
        let start = slot.offset as usize;
        Ok(page.data[start..start + slot.payload_len()].to_vec())
    }

    /// First phase of delete: tombstone the slot, keeping the bytes so the
    /// mark can be rolled back.
    pub fn mark_delete(&self, page: &mut Page, slot_index: u32) -> Result<(), PageError> {
        let mut slot = self.get_slot(page, slot_index)?;
        if slot.is_vacant() {
            return Err(PageError::RecordNotFound);
        }
        slot.length |= super::layout::DELETE_MASK;
        self.set_slot(page, slot_index, slot);
        Ok(())
    }

    /// Undo a mark_delete.
    pub fn rollback_delete(&self, page: &mut Page, slot_index: u32) -> Result<(), PageError> {
        let mut slot = self.get_slot(page, slot_index)?;
        if slot.is_vacant() {
            return Err(PageError::RecordNotFound);
        }
        slot.length &= !super::layout::DELETE_MASK;
        self.set_slot(page, slot_index, slot);
        Ok(())
    }

    /// Second phase of delete: vacate the slot. The record bytes become dead
    /// space until compaction (which this engine does not do).
    pub fn apply_delete(&self, page: &mut Page, slot_index: u32) -> Result<(), PageError> {
        let slot = self.get_slot(page, slot_index)?;
        if slot.is_vacant() {
            return Err(PageError::RecordNotFound);
        }
        let mut header = self.get_header(page);
        header.free_space_size += slot.payload_len() as u32;
        self.set_header(page, header);
        self.set_slot(page, slot_index, Slot { offset: 0, length: 0 });
        Ok(())
    }

    /// Overwrite a record in place. Growth is served from the free space by
    /// relocating the record within the page; the slot number is stable.
    pub fn update_record(
        &self,
        page: &mut Page,
        slot_index: u32,
        data: &[u8],
    ) -> Result<(), PageError> {
        let mut slot = self.get_slot(page, slot_index)?;
        if slot.is_vacant() {
            return Err(PageError::RecordNotFound);
        }
        if slot.is_deleted() {
            return Err(PageError::RecordDeleted);
        }

        if data.len() <= slot.payload_len() {
            let start = slot.offset as usize;
            page.data[start..start + data.len()].copy_from_slice(data);
            let mut header = self.get_header(page);
            header.free_space_size += (slot.payload_len() - data.len()) as u32;
            self.set_header(page, header);
            slot.length = data.len() as u32;
            self.set_slot(page, slot_index, slot);
            return Ok(());
        }

        let mut header = self.get_header(page);
        if (header.free_space_size as usize) < data.len() {
            return Err(PageError::InsufficientSpace);
        }
        let start = header.free_space_offset as usize;
        page.data[start..start + data.len()].copy_from_slice(data);
        slot.offset = header.free_space_offset;
        slot.length = data.len() as u32;
        header.free_space_offset += data.len() as u32;
        header.free_space_size -= data.len() as u32;
        self.set_header(page, header);
        self.set_slot(page, slot_index, slot);
        Ok(())
    }

    /// Place a record at a specific slot, materializing the slot if the page
    /// image has not seen it yet. Recovery uses this so that redo of an
    /// insert and undo of an applied delete land on the logged RID.
    pub fn restore_record(
        &self,
        page: &mut Page,
        slot_index: u32,
        data: &[u8],
    ) -> Result<(), PageError> {
        let mut header = self.get_header(page);

        // Materialize any missing slots as vacant.
        while header.record_count <= slot_index {
            if header.free_space_size < SLOT_SIZE as u32 {
                return Err(PageError::InsufficientSpace);
            }
            self.set_slot(page, header.record_count, Slot { offset: 0, length: 0 });
            header.record_count += 1;
            header.free_space_size -= SLOT_SIZE as u32;
        }

        if (header.free_space_size as usize) < data.len() {
            return Err(PageError::InsufficientSpace);
        }
        let start = header.free_space_offset as usize;
        page.data[start..start + data.len()].copy_from_slice(data);
        let slot = Slot {
            offset: header.free_space_offset,
            length: data.len() as u32,
        };
        header.free_space_offset += data.len() as u32;
        header.free_space_size -= data.len() as u32;
        self.set_header(page, header);
        self.set_slot(page, slot_index, slot);
        Ok(())
    }

    fn get_slot(&self, page: &Page, slot_index: u32) -> Result<Slot, PageError> {
        let header = self.get_header(page);
        if slot_index >= header.record_count {
            return Err(PageError::InvalidSlot(slot_index));
        }
        let pos = Slot::position(slot_index);
        Ok(Slot::from_bytes(&page.data[pos..pos + SLOT_SIZE]))
    }

    fn set_slot(&self, page: &mut Page, slot_index: u32, slot: Slot) {
        let pos = Slot::position(slot_index);
        page.data[pos..pos + SLOT_SIZE].copy_from_slice(&slot.to_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Page;

    fn fresh_page() -> (PageManager, Page) {
        let pm = PageManager::new();
        let mut page = Page::new(1);
        pm.init_page(&mut page);
        (pm, page)
    }

    #[test]
    fn insert_and_get() {
        let (pm, mut page) = fresh_page();
        let a = pm.insert_record(&mut page, b"alpha").unwrap();
        let b = pm.insert_record(&mut page, b"beta").unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(pm.get_record(&page, a).unwrap(), b"alpha");
        assert_eq!(pm.get_record(&page, b).unwrap(), b"beta");
    }

    #[test]
    fn two_phase_delete() {
        let (pm, mut page) = fresh_page();
        let slot = pm.insert_record(&mut page, b"doomed").unwrap();

        pm.mark_delete(&mut page, slot).unwrap();
        assert_eq!(pm.get_record(&page, slot), Err(PageError::RecordDeleted));

        pm.rollback_delete(&mut page, slot).unwrap();
        assert_eq!(pm.get_record(&page, slot).unwrap(), b"doomed");

        pm.mark_delete(&mut page, slot).unwrap();
        pm.apply_delete(&mut page, slot).unwrap();
        assert_eq!(pm.get_record(&page, slot), Err(PageError::RecordNotFound));
    }

    #[test]
    fn update_in_place_and_grown() {
        let (pm, mut page) = fresh_page();
        let slot = pm.insert_record(&mut page, b"short").unwrap();

        pm.update_record(&mut page, slot, b"tiny").unwrap();
        assert_eq!(pm.get_record(&page, slot).unwrap(), b"tiny");

        pm.update_record(&mut page, slot, b"a considerably longer record")
            .unwrap();
        assert_eq!(
            pm.get_record(&page, slot).unwrap(),
            b"a considerably longer record"
        );
    }

    #[test]
    fn restore_lands_on_requested_slot() {
        let (pm, mut page) = fresh_page();
        pm.restore_record(&mut page, 2, b"slot-two").unwrap();
        assert_eq!(pm.record_count(&page), 3);
        assert_eq!(pm.get_record(&page, 2).unwrap(), b"slot-two");
        assert_eq!(pm.get_record(&page, 0), Err(PageError::RecordNotFound));
    }

    #[test]
    fn page_fills_up() {
        let (pm, mut page) = fresh_page();
        let blob = vec![7u8; 512];
        let mut inserted = 0;
        loop {
            match pm.insert_record(&mut page, &blob) {
                Ok(_) => inserted += 1,
                Err(PageError::InsufficientSpace) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(inserted >= 7);
        assert_eq!(pm.record_count(&page), inserted);
    }
}
