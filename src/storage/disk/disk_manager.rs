use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{PageId, Result, PAGE_SIZE};
use crate::storage::node::Node;

/// Page id of the reserved metadata page holding the root pointer.
pub const METADATA_PAGE_ID: PageId = PageId(0);

/// DiskManager owns the backing file and is responsible for reading and
/// writing nodes to/from fixed-size pages.
///
/// Page 0 is reserved for metadata and stores only the current root page id.
/// Every other page holds one serialized node. Pages are addressed by id,
/// where `file_offset = page_id * PAGE_SIZE`.
pub struct DiskManager {
    /// Backing file. The Mutex guards the shared seek cursor.
    file: Mutex<File>,
    /// Number of page-level reads performed
    num_reads: AtomicU64,
    /// Number of page-level writes performed
    num_writes: AtomicU64,
}

impl DiskManager {
    /// Opens (or creates) the backing file at `path`. A new or empty file is
    /// extended to hold the reserved metadata page.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.metadata()?.len() == 0 {
            file.set_len(PAGE_SIZE as u64)?;
        }

        Ok(Self {
            file: Mutex::new(file),
            num_reads: AtomicU64::new(0),
            num_writes: AtomicU64::new(0),
        })
    }

    /// Returns true while the file holds nothing beyond the metadata page.
    pub fn is_fresh(&self) -> Result<bool> {
        let file = self.file.lock();
        Ok(file.metadata()?.len() == PAGE_SIZE as u64)
    }

    /// Extends the file by one page and returns the new page's id. The page
    /// contents are unspecified until the first `write_node` for that id.
    pub fn allocate_page(&self) -> Result<PageId> {
        let file = self.file.lock();
        let len = file.metadata()?.len();
        file.set_len(len + PAGE_SIZE as u64)?;
        Ok(PageId::new(len / PAGE_SIZE as u64))
    }

    /// Total number of pages in the file, metadata page included.
    pub fn num_pages(&self) -> Result<u64> {
        let file = self.file.lock();
        Ok(file.metadata()?.len() / PAGE_SIZE as u64)
    }

    /// Writes the root page id into the metadata page.
    pub fn write_root_page(&self, root_page_id: PageId) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&root_page_id.as_u64().to_be_bytes())?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reads the root page id back from the metadata page.
    pub fn read_root_page(&self) -> Result<PageId> {
        let mut buf = [0u8; 8];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(PageId::new(u64::from_be_bytes(buf)))
    }

    /// Serializes a node into its page and clears the dirty flag.
    ///
    /// Serialization happens into a scratch buffer first, so an overfull node
    /// fails with `PageOverflow` before any bytes reach the file.
    pub fn write_node(&self, node: &mut Node) -> Result<()> {
        let mut page = [0u8; PAGE_SIZE];
        node.write_page(&mut page)?;

        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(node.page_id().as_u64() * PAGE_SIZE as u64))?;
            file.write_all(&page)?;
        }

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        node.clear_dirty();
        Ok(())
    }

    /// Reads the page at `page_id` and reconstructs its node, with arrays
    /// sized for `order`. The returned node is clean.
    pub fn read_node(&self, page_id: PageId, order: usize) -> Result<Node> {
        let mut page = [0u8; PAGE_SIZE];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(page_id.as_u64() * PAGE_SIZE as u64))?;
            file.read_exact(&mut page)?;
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(Node::read_page(&page, page_id, order))
    }

    pub fn num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Syncs file contents to the host before the handle is dropped.
    pub fn close(&self) -> Result<()> {
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.file.get_mut().sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_reserves_metadata_page() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(temp_dir.path().join("test.db")).unwrap();

        assert!(dm.is_fresh().unwrap());
        assert_eq!(dm.num_pages().unwrap(), 1);
    }

    #[test]
    fn test_allocate_pages_sequentially() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(temp_dir.path().join("alloc.db")).unwrap();

        for i in 1..=5 {
            assert_eq!(dm.allocate_page().unwrap(), PageId::new(i));
        }
        assert!(!dm.is_fresh().unwrap());
        assert_eq!(dm.num_pages().unwrap(), 6);
    }

    #[test]
    fn test_root_page_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(temp_dir.path().join("root.db")).unwrap();

        dm.write_root_page(PageId::new(42)).unwrap();
        assert_eq!(dm.read_root_page().unwrap(), PageId::new(42));
    }

    #[test]
    fn test_write_node_clears_dirty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(temp_dir.path().join("node.db")).unwrap();

        let page_id = dm.allocate_page().unwrap();
        let mut node = Node::new_leaf(page_id, 4);
        node.insert_leaf_at(0, 7, 70);
        assert!(node.is_dirty());

        dm.write_node(&mut node).unwrap();
        assert!(!node.is_dirty());

        let back = dm.read_node(page_id, 4).unwrap();
        assert_eq!(back.keys(), &[7]);
        assert_eq!(back.value_at(0), 70);
    }
}
