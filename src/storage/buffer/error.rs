use thiserror::Error;

use crate::common::types::PageId;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BufferPoolError {
    #[error("All frames in the buffer pool are pinned")]
    OutOfFrames,

    #[error("Page {0} is not resident in the buffer pool")]
    PageNotFound(PageId),

    #[error("Page {0} is pinned and cannot be deleted")]
    PagePinned(PageId),

    #[error("Page {0} is not pinned")]
    PageNotPinned(PageId),

    #[error("Invalid page ID")]
    InvalidPageId,
}
