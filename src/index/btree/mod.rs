pub mod error;
pub mod iterator;
pub mod latch;
pub mod node;
pub mod serialization;
pub mod tree;

pub use error::BTreeError;
pub use iterator::BTreeIterator;
pub use tree::BPlusTree;
