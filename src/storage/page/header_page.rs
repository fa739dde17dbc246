use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId};
use crate::storage::page::error::PageError;

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

/// The header page (page 0) keeps a directory of `(index name, root page id)`
/// records. Every root change of a B+tree is published here so the tree can
/// be reopened after a restart.
pub struct HeaderPage;

impl HeaderPage {
    pub fn record_count(page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[RECORD_COUNT_OFFSET..RECORDS_OFFSET]) as usize
    }

    /// Add a `(name, root_page_id)` record. Fails if the name already exists
    /// or the directory is full.
    pub fn insert_record(page: &mut Page, name: &str, root_page_id: PageId) -> Result<(), PageError> {
        if name.len() >= NAME_SIZE {
            return Err(PageError::NameTooLong);
        }
        if Self::find_record(page, name).is_some() {
            return Err(PageError::DuplicateRecord);
        }
        let count = Self::record_count(page);
        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        if offset + RECORD_SIZE > page.data.len() {
            return Err(PageError::InsufficientSpace);
        }
        page.data[offset..offset + NAME_SIZE].fill(0);
        page.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_i32(
            &mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
            root_page_id,
        );
        LittleEndian::write_u32(
            &mut page.data[RECORD_COUNT_OFFSET..RECORDS_OFFSET],
            (count + 1) as u32,
        );
        Ok(())
    }

    /// Overwrite the root page id of an existing record.
    pub fn update_record(page: &mut Page, name: &str, root_page_id: PageId) -> Result<(), PageError> {
        match Self::find_record(page, name) {
            Some(index) => {
                let offset = RECORDS_OFFSET + index * RECORD_SIZE;
                LittleEndian::write_i32(
                    &mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
                    root_page_id,
                );
                Ok(())
            }
            None => Err(PageError::RecordNotFound),
        }
    }

    pub fn get_record(page: &Page, name: &str) -> Option<PageId> {
        Self::find_record(page, name).map(|index| {
            let offset = RECORDS_OFFSET + index * RECORD_SIZE;
            LittleEndian::read_i32(&page.data[offset + NAME_SIZE..offset + RECORD_SIZE])
        })
    }

    fn find_record(page: &Page, name: &str) -> Option<usize> {
        if name.len() >= NAME_SIZE {
            return None;
        }
        let count = Self::record_count(page);
        (0..count).find(|&index| {
            let offset = RECORDS_OFFSET + index * RECORD_SIZE;
            let stored = &page.data[offset..offset + NAME_SIZE];
            let end = stored.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
            &stored[..end] == name.as_bytes()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Page, HEADER_PAGE_ID};

    #[test]
    fn insert_update_get() {
        let mut page = Page::new(HEADER_PAGE_ID);
        HeaderPage::insert_record(&mut page, "orders_pk", 3).unwrap();
        HeaderPage::insert_record(&mut page, "users_pk", 9).unwrap();

        assert_eq!(HeaderPage::get_record(&page, "orders_pk"), Some(3));
        assert_eq!(HeaderPage::get_record(&page, "users_pk"), Some(9));
        assert_eq!(HeaderPage::get_record(&page, "missing"), None);

        HeaderPage::update_record(&mut page, "orders_pk", 17).unwrap();
        assert_eq!(HeaderPage::get_record(&page, "orders_pk"), Some(17));
        assert_eq!(HeaderPage::record_count(&page), 2);
    }

    #[test]
    fn duplicate_insert_rejected() {
        let mut page = Page::new(HEADER_PAGE_ID);
        HeaderPage::insert_record(&mut page, "idx", 1).unwrap();
        assert!(HeaderPage::insert_record(&mut page, "idx", 2).is_err());
    }
}
