use std::sync::Arc;
use anyhow::Result;

use stratadb::index::btree::BPlusTree;
use stratadb::storage::buffer::{BufferPoolConfig, BufferPoolManager};
use stratadb::transaction::concurrency::{
    IsolationLevel, LockManager, LockManagerConfig, LockMode, TransactionManager,
};
use stratadb::common::types::Rid;

fn main() -> Result<()> {
    env_logger::init();

    // Create the buffer pool over a database file
    let db_path = "stratadb.db";
    let buffer_pool = Arc::new(BufferPoolManager::new(BufferPoolConfig::default(), db_path)?);
    println!("Buffer pool initialized over {db_path}");

    // Create a B+tree index for 64-bit integer keys
    let index = BPlusTree::<i64>::create("demo_pk", Arc::clone(&buffer_pool), 64, 64)?;

    // Insert a handful of keys
    for key in [42i64, 7, 19, 3, 88, 55] {
        index.insert(&key, Rid::new(2, key as u32))?;
    }
    println!("Inserted 6 keys into index {:?}", index.name());

    // Point lookup
    let hits = index.get_value(&19)?;
    println!("get(19) -> {:?}", hits);

    // Ordered scan through the leaf chain
    let keys: Vec<i64> = index.iter()?.map(|(k, _)| k).collect();
    println!("scan -> {:?}", keys);

    // Remove a key and scan again
    index.remove(&7)?;
    let keys: Vec<i64> = index.iter()?.map(|(k, _)| k).collect();
    println!("after remove(7) -> {:?}", keys);

    // A short transaction against the lock manager
    let lock_manager = Arc::new(LockManager::new(LockManagerConfig::default()));
    let txn_manager = TransactionManager::new(Arc::clone(&lock_manager));

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let table_oid = 1;
    lock_manager.lock_table(&txn, LockMode::IntentionExclusive, table_oid)?;
    lock_manager.lock_row(&txn, LockMode::Exclusive, table_oid, Rid::new(2, 42))?;
    println!("txn {} holds IX({table_oid}) and X on one row", txn.id());
    txn_manager.commit(&txn);
    println!("txn {} committed", txn.id());

    // Flush everything back to the pagefile
    buffer_pool.flush_all()?;
    println!("All pages flushed");

    Ok(())
}
