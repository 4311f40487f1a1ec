use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use stratadb::storage::buffer::{BufferPoolConfig, BufferPoolManager};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let config = BufferPoolConfig {
        pool_size,
        replacer_k: 2,
    };
    let buffer_pool = Arc::new(BufferPoolManager::new(config, path)?);
    Ok((buffer_pool, file))
}
