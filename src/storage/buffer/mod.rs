pub mod error;
pub mod manager;
pub mod page_guard;
pub mod page_table;
pub mod replacer;

pub use error::BufferPoolError;
pub use manager::{BufferPoolConfig, BufferPoolManager};
pub use page_guard::PageGuard;
pub use page_table::ExtendibleHashTable;
pub use replacer::LruKReplacer;
