pub mod btree_index;
pub mod btree_iterator;
pub mod btree_page;
pub mod bulk_loader;

pub use btree_index::{BPlusTree, TreeStats};
pub use btree_iterator::{BPlusTreeIterator, ScanDirection};
pub use btree_page::{node_type, InternalNode, InternalPage, LeafNode, LeafPage, NodeType};
pub use bulk_loader::BulkLoader;
