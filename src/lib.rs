//! Loam - a disk-backed B+Tree index in Rust
//!
//! This crate implements a durable ordered map from 64-bit integer keys to
//! 64-bit integer values, stored in a single page-oriented file. Nodes are
//! buffered in memory by an LRU cache that writes dirty nodes back to disk
//! when they are evicted, and leaves chain together in key order so the whole
//! index can be scanned without touching internal nodes.
//!
//! # Architecture
//!
//! The system is organized into three layers:
//!
//! - **Storage** (`storage`): page-level persistence
//!   - `DiskManager`: allocates pages and reads/writes serialized nodes
//!   - `Node`: the page-resident node model and its on-disk wire format
//!
//! - **Buffer** (`buffer`): memory management for nodes
//!   - `NodeCache`: capacity-bounded LRU cache with dirty-flush-on-evict and
//!     hit/miss/eviction accounting
//!
//! - **Index** (`index`): the B+Tree algorithms
//!   - `BTreeIndex`: insert with split propagation and root growth, point
//!     lookup, and leaf-chain traversal
//!
//! # Example
//!
//! ```rust,no_run
//! use loam::BTreeIndex;
//!
//! // Create an index backed by "index.db" with a 64 KB node cache.
//! let mut tree = BTreeIndex::open("index.db", 64 * 1024).unwrap();
//!
//! for key in 1..=100 {
//!     tree.insert(key, key * 10).unwrap();
//! }
//!
//! assert_eq!(tree.search(42).unwrap(), Some(420));
//! assert_eq!(tree.search(500).unwrap(), None);
//!
//! // Flush every dirty node and release the file.
//! tree.close().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{LoamError, PageId, Result};
pub use index::BTreeIndex;
