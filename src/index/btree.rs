use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::NodeCache;
use crate::common::{PageId, Result, NODE_ENTRY_SIZE, NODE_HEADER_RESERVE, PAGE_SIZE};
use crate::storage::disk::DiskManager;
use crate::storage::node::{Node, NodeKind, NodeRef};

/// Result of splitting an overfull node: the separator key to push into the
/// parent and the freshly created right sibling.
struct Split {
    key: i64,
    right: NodeRef,
}

/// A disk-backed B+Tree index mapping 64-bit keys to 64-bit values.
///
/// Nodes live in fixed-size pages owned by a [`DiskManager`] and are buffered
/// through a [`NodeCache`] that writes dirty nodes back on eviction. Each node
/// holds up to `order` keys, where the order is derived from the page size.
/// Leaves chain together in ascending key order for ordered scans.
///
/// Operations assume exclusive access; the index is a single-threaded
/// structure with internally synchronized components.
pub struct BTreeIndex {
    disk: Arc<DiskManager>,
    cache: NodeCache,
    /// Page id of the current root node.
    root_page_id: PageId,
    /// Maximum number of keys allowed in a node.
    order: usize,
}

impl BTreeIndex {
    /// Creates an empty B+Tree backed by the file at `path`, discarding any
    /// previous file at that location. `cache_bytes` sizes the node cache,
    /// with a floor of one page.
    pub fn open<P: AsRef<Path>>(path: P, cache_bytes: usize) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            fs::remove_file(path)?;
        }

        let disk = Arc::new(DiskManager::open(path)?);

        let capacity = (cache_bytes / PAGE_SIZE).max(1);
        let flush_disk = Arc::clone(&disk);
        let cache = NodeCache::new(capacity, Box::new(move |node| flush_disk.write_node(node)));

        let order = Self::compute_order();

        let mut tree = Self {
            disk,
            cache,
            root_page_id: PageId::new(0),
            order,
        };

        if tree.disk.is_fresh()? {
            let root_id = tree.disk.allocate_page()?;
            let mut root = Node::new_leaf(root_id, order);
            tree.disk.write_node(&mut root)?;
            tree.disk.write_root_page(root_id)?;
            tree.root_page_id = root_id;
        } else {
            tree.root_page_id = tree.disk.read_root_page()?;
        }

        Ok(tree)
    }

    /// Maximum number of keys that fit in one page, leaving room for the
    /// serialized node header.
    fn compute_order() -> usize {
        (PAGE_SIZE - NODE_HEADER_RESERVE) / NODE_ENTRY_SIZE
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// The node cache, exposed for its hit/miss/eviction accounting.
    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    /// Inserts the given key/value pair, splitting nodes as required. If the
    /// key already exists, its value is updated in place.
    pub fn insert(&mut self, key: i64, value: i64) -> Result<()> {
        let root = self.load(self.root_page_id)?;

        // A split bubbling out of the root grows the tree by one level.
        if let Some(split) = self.insert_recursive(&root, key, value)? {
            let new_root_id = self.disk.allocate_page()?;

            let mut new_root = Node::new_internal(new_root_id, self.order);
            new_root.keys[0] = split.key;
            if let NodeKind::Internal { children } = &mut new_root.kind {
                children[0] = self.root_page_id;
                children[1] = split.right.lock().page_id();
            }
            new_root.key_count = 1;

            let new_root = Arc::new(Mutex::new(new_root));
            self.mark_dirty(&new_root)?;
            self.root_page_id = new_root_id;
            self.disk.write_root_page(new_root_id)?;
        }

        Ok(())
    }

    /// Recursive insert into the subtree rooted at `node`.
    ///
    /// Returns the split result when this node overflowed and was halved,
    /// otherwise `None`. Node locks are scoped so that none is held across a
    /// cache or disk call; eviction may flush any node the descent still
    /// references.
    fn insert_recursive(&self, node: &NodeRef, key: i64, value: i64) -> Result<Option<Split>> {
        let descend = {
            let mut n = node.lock();
            let pos = n.search(key);

            if n.is_leaf() {
                match pos {
                    Ok(i) => n.set_value(i, value),
                    Err(i) => n.insert_leaf_at(i, key, value),
                }
                None
            } else {
                // An exact separator match descends into the left child on
                // insertion; lookups route right (see `search`).
                let idx = match pos {
                    Ok(i) | Err(i) => i,
                };
                Some((n.child_at(idx), idx))
            }
        };

        if let Some((child_id, idx)) = descend {
            let child = self.load(child_id)?;
            if let Some(split) = self.insert_recursive(&child, key, value)? {
                let right_id = split.right.lock().page_id();
                node.lock().insert_child_at(idx, split.key, right_id);
            }
        }

        if node.lock().key_count() > self.order {
            return Ok(Some(self.split_node(node)?));
        }

        self.mark_dirty(node)?;
        Ok(None)
    }

    /// Halves an overfull node around `key_count / 2`, returning the
    /// separator and the new right sibling. Both halves are left dirty and
    /// resident in the cache.
    fn split_node(&self, node: &NodeRef) -> Result<Split> {
        let right_id = self.disk.allocate_page()?;

        let (key, right) = {
            let mut n = node.lock();
            let mut right = if n.is_leaf() {
                Node::new_leaf(right_id, self.order)
            } else {
                Node::new_internal(right_id, self.order)
            };
            let key = n.split_into(&mut right);
            (key, right)
        };

        let right = Arc::new(Mutex::new(right));
        self.mark_dirty(node)?;
        self.mark_dirty(&right)?;

        Ok(Split { key, right })
    }

    /// Searches the tree for `key`, returning its value if present.
    pub fn search(&self, key: i64) -> Result<Option<i64>> {
        let mut node = self.load(self.root_page_id)?;

        loop {
            let child = {
                let n = node.lock();
                match &n.kind {
                    NodeKind::Leaf { values } => {
                        return Ok(n.search(key).ok().map(|pos| values[pos]));
                    }
                    // A separator equals the first key of its right subtree's
                    // leftmost leaf, so an exact match routes right.
                    NodeKind::Internal { children } => match n.search(key) {
                        Ok(pos) => children[pos + 1],
                        Err(pos) => children[pos],
                    },
                }
            };
            node = self.load(child)?;
        }
    }

    /// Fetches a node through the cache, reading from disk on a miss.
    fn load(&self, page_id: PageId) -> Result<NodeRef> {
        if let Some(node) = self.cache.get(page_id) {
            return Ok(node);
        }

        let node = Arc::new(Mutex::new(self.disk.read_node(page_id, self.order)?));
        self.cache.put(page_id, Arc::clone(&node))?;
        Ok(node)
    }

    /// Flags a node as modified and refreshes its cache entry.
    fn mark_dirty(&self, node: &NodeRef) -> Result<()> {
        let page_id = {
            let mut n = node.lock();
            n.mark_dirty();
            n.page_id()
        };
        self.cache.put(page_id, Arc::clone(node))
    }

    /// Renders the tree structure as an indented outline, one node per line.
    pub fn dump_tree(&self) -> Result<String> {
        let mut out = format!("BTree(root={}):\n", self.root_page_id.as_u64());
        self.dump_node(&mut out, self.root_page_id, 0)?;
        Ok(out)
    }

    fn dump_node(&self, out: &mut String, page_id: PageId, depth: usize) -> Result<()> {
        let node = self.load(page_id)?;
        let indent = "    ".repeat(depth);

        let children = {
            let n = node.lock();
            let keys = n
                .keys()
                .iter()
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
                .join(", ");

            match &n.kind {
                NodeKind::Leaf { .. } => {
                    let next = n.next().map(|p| p.as_u64() as i64).unwrap_or(-1);
                    out.push_str(&format!(
                        "{}Leaf({}) keys=[{}] next={}\n",
                        indent,
                        page_id.as_u64(),
                        keys,
                        next
                    ));
                    Vec::new()
                }
                NodeKind::Internal { children } => {
                    out.push_str(&format!(
                        "{}Internal({}) keys=[{}]\n",
                        indent,
                        page_id.as_u64(),
                        keys
                    ));
                    children[..=n.key_count()].to_vec()
                }
            }
        };

        for child in children {
            self.dump_node(out, child, depth + 1)?;
        }
        Ok(())
    }

    /// Renders the leaf chain in key order, one leaf per line.
    pub fn dump_leaves(&self) -> Result<String> {
        let mut node = self.load(self.root_page_id)?;

        // Walk the leftmost spine down to the first leaf.
        loop {
            let first_child = {
                let n = node.lock();
                match &n.kind {
                    NodeKind::Leaf { .. } => None,
                    NodeKind::Internal { children } => Some(children[0]),
                }
            };
            match first_child {
                Some(child) => node = self.load(child)?,
                None => break,
            }
        }

        let mut out = String::from("Leaf chain:\n");
        loop {
            let next = {
                let n = node.lock();
                let keys = n
                    .keys()
                    .iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!("Leaf({}): {}\n", n.page_id().as_u64(), keys));
                n.next()
            };
            match next {
                Some(id) => node = self.load(id)?,
                None => break,
            }
        }

        Ok(out)
    }

    /// Prints the tree structure to standard output.
    pub fn print_tree(&self) -> Result<()> {
        print!("{}", self.dump_tree()?);
        Ok(())
    }

    /// Prints the leaf chain to standard output.
    pub fn print_leaves(&self) -> Result<()> {
        print!("{}", self.dump_leaves()?);
        Ok(())
    }

    /// Flushes all cached nodes and releases the backing file. Consuming the
    /// index makes use-after-close impossible.
    pub fn close(self) -> Result<()> {
        self.cache.flush_all()?;
        self.disk.close()
    }
}
