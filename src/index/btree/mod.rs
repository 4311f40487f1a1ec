pub mod error;
pub mod header;
pub mod index;
pub mod internal;
pub mod key;
pub mod layout;
pub mod leaf;

pub use error::BTreeError;
pub use index::{BPlusTree, BPlusTreeIter};
pub use key::KeyCodec;
