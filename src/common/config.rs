/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Bytes set aside per page for node header fields when sizing the tree order
pub const NODE_HEADER_RESERVE: usize = 32;

/// Serialized cost of one entry: an 8-byte key plus an 8-byte value or child pointer
pub const NODE_ENTRY_SIZE: usize = 16;
