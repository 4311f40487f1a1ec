use thiserror::Error;
use crate::common::types::PageId;
use crate::storage::buffer::page_table::PageTableError;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Page {0} not found in the buffer pool")]
    PageNotFound(PageId),

    #[error("Page {0} is pinned")]
    PagePinned(PageId),

    #[error("Buffer pool exhausted: every frame is pinned")]
    PoolExhausted,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Page table error: {0}")]
    PageTable(#[from] PageTableError),

    #[error("Disk manager error: {0}")]
    DiskManager(#[from] DiskManagerError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
