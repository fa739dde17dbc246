use thiserror::Error;

use crate::storage::buffer::BufferPoolError;
use crate::storage::page::PageError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error(transparent)]
    BufferPool(#[from] BufferPoolError),

    #[error("Header page error: {0}")]
    Page(#[from] PageError),

    #[error("Failed to serialize key: {0}")]
    KeySerialization(String),

    #[error("Node does not fit in a page")]
    NodeTooLarge,

    #[error("Corrupt index page: {0}")]
    Corrupt(String),
}
