//! A typed B+-tree over `INT`/`REAL`/`TEXT(n)` primary keys. Seek is a
//! binary search per node; insert and erase keep every leaf and internal
//! node within `[min_slot_count, max_slot_count]` by splitting, merging, or
//! borrowing from a sibling. `destroy` uses an explicit stack rather than
//! host recursion to avoid blowing the stack on a deep tree.

pub mod node;

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::EngineError;
use crate::frame_manager::FrameManager;
use crate::page::{Magic, PageId};
use crate::schema::KeyType;
use node::{InternalNode, LeafNode, NodeKeys};

pub enum OpenNode {
    Internal(InternalNode),
    Leaf(LeafNode),
}

pub struct BPlusTree {
    fm: Rc<RefCell<FrameManager>>,
    key_type: KeyType,
    key_size: u8,
    row_size: u16,
    root: PageId,
}

impl BPlusTree {
    /// Opens a tree rooted at `root`, or — if `root` is nil — allocates a
    /// fresh empty root leaf and uses that.
    pub fn new(
        fm: Rc<RefCell<FrameManager>>,
        key_type: KeyType,
        key_size: u8,
        row_size: u16,
        root: PageId,
    ) -> Result<Self, EngineError> {
        let mut tree = BPlusTree {
            fm,
            key_type,
            key_size,
            row_size,
            root,
        };
        if tree.root.is_none() {
            let frame = tree.fm.borrow_mut().allocate()?;
            let pid = frame.page_id();
            LeafNode::create(frame, key_size, row_size, PageId::NONE, PageId::NONE);
            tree.root = pid;
        }
        Ok(tree)
    }

    pub fn root(&self) -> PageId {
        self.root
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn open_leaf(&self, pid: PageId) -> Result<LeafNode, EngineError> {
        LeafNode::open(self.fm.borrow().pin(pid)?)
    }

    pub fn open_internal(&self, pid: PageId) -> Result<InternalNode, EngineError> {
        InternalNode::open(self.fm.borrow().pin(pid)?)
    }

    pub fn open_node(&self, pid: PageId) -> Result<OpenNode, EngineError> {
        let magic = node::node_magic(&self.fm.borrow(), pid)?;
        match magic {
            Magic::InternalNode => Ok(OpenNode::Internal(self.open_internal(pid)?)),
            Magic::LeafNode => Ok(OpenNode::Leaf(self.open_leaf(pid)?)),
            other => Err(EngineError::InvalidMagic(other as u8)),
        }
    }

    /// Smallest slot index `s` such that `node.key(s) >= target`, or
    /// `node.slot_count()` if every key is smaller.
    fn seek_slot<T: NodeKeys>(&self, node: &T, target: &[u8]) -> u16 {
        let mut lo = 0u16;
        let mut hi = node.slot_count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_type.compare(&node.key(mid), target) == std::cmp::Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn seek_leaf(&self, target: &[u8]) -> Result<LeafNode, EngineError> {
        let mut pid = self.root;
        loop {
            match self.open_node(pid)? {
                OpenNode::Leaf(leaf) => return Ok(leaf),
                OpenNode::Internal(node) => {
                    let s = self.seek_slot(&node, target);
                    pid = node.child(s as i32 - 1);
                }
            }
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let leaf = self.seek_leaf(key)?;
        let slot = self.seek_slot(&leaf, key);
        if slot < leaf.slot_count() && leaf.key(slot) == key {
            Ok(Some(leaf.slot_bytes(slot)))
        } else {
            Ok(None)
        }
    }

    /// Inserts `row` under `key`. Returns `Ok(false)` without mutating
    /// anything if `key` is already present — callers surface that as a
    /// duplicate-primary-key error at the level that has the vocabulary for
    /// it (the B+-tree itself only deals in engine-level failures).
    pub fn insert(&mut self, key: &[u8], row: &[u8]) -> Result<bool, EngineError> {
        let leaf = self.seek_leaf(key)?;
        let slot = self.seek_slot(&leaf, key);
        if slot < leaf.slot_count() && leaf.key(slot) == key {
            return Ok(false);
        }
        self.insert_into_leaf(leaf, slot, row)?;
        Ok(true)
    }

    fn child_slot_in_parent(&self, parent: &InternalNode, target: PageId) -> i32 {
        if parent.first_child() == target {
            return -1;
        }
        for i in 0..parent.slot_count() {
            if parent.child(i as i32) == target {
                return i as i32;
            }
        }
        -1
    }

    fn insert_into_leaf(&mut self, mut leaf: LeafNode, slot: u16, row: &[u8]) -> Result<(), EngineError> {
        if !leaf.at_max() {
            leaf.insert(slot, row);
            return Ok(());
        }

        let old_pid = leaf.page_id();
        let old_parent = leaf.parent();
        let old_next = leaf.next_leaf();
        let old_count = leaf.slot_count();
        let new_count = old_count / 2; // new leaf takes the floor half, old leaf keeps the ceiling half

        let new_frame = self.fm.borrow_mut().allocate()?;
        let new_pid = new_frame.page_id();
        let mut new_leaf = LeafNode::create(new_frame, self.key_size, self.row_size, old_parent, old_next);

        LeafNode::transfer_back_to_front(&mut new_leaf, &mut leaf, new_count)?;
        leaf.set_next_leaf(new_pid);

        let old_remaining = leaf.slot_count();
        if slot < old_remaining {
            leaf.insert(slot, row);
        } else {
            new_leaf.insert(slot - old_remaining, row);
        }

        let is_root = old_pid == self.root;
        let parent_pid = if is_root {
            let parent_frame = self.fm.borrow_mut().allocate()?;
            let ppid = parent_frame.page_id();
            InternalNode::create(parent_frame, self.key_size, PageId::NONE, old_pid);
            self.root = ppid;
            leaf.set_parent(ppid);
            new_leaf.set_parent(ppid);
            ppid
        } else {
            old_parent
        };

        let separator = leaf.key(leaf.slot_count() - 1);
        drop(leaf);
        drop(new_leaf);

        let parent = self.open_internal(parent_pid)?;
        let pslot = self.seek_slot(&parent, &separator);
        self.insert_into_internal(parent, pslot, &separator, new_pid)
    }

    fn insert_into_internal(
        &mut self,
        mut node: InternalNode,
        slot: u16,
        key: &[u8],
        child: PageId,
    ) -> Result<(), EngineError> {
        if !node.at_max() {
            node.insert(slot, key, child);
            self.reparent(child, node.page_id())?;
            return Ok(());
        }

        let old_pid = node.page_id();
        let old_parent = node.parent();
        let c = node.slot_count();
        let middle = c / 2 + c % 2 - 1;

        let new_frame = self.fm.borrow_mut().allocate()?;
        let new_pid = new_frame.page_id();

        let separator = node.key(middle);
        let new_first_child = node.child(middle as i32);
        let mut new_node = InternalNode::create(new_frame, self.key_size, old_parent, new_first_child);

        let count_to_transfer = c - middle - 1;
        InternalNode::transfer_back_to_front(&mut new_node, &mut node, count_to_transfer)?;
        node.erase(middle);

        if slot <= middle {
            node.insert(slot, key, child);
        } else {
            new_node.insert(slot - middle - 1, key, child);
        }

        let is_root = old_pid == self.root;
        let parent_pid = if is_root {
            let parent_frame = self.fm.borrow_mut().allocate()?;
            let ppid = parent_frame.page_id();
            InternalNode::create(parent_frame, self.key_size, PageId::NONE, old_pid);
            self.root = ppid;
            node.set_parent(ppid);
            new_node.set_parent(ppid);
            ppid
        } else {
            old_parent
        };

        self.reparent(new_node.first_child(), new_pid)?;
        for i in 0..new_node.slot_count() {
            self.reparent(new_node.child(i as i32), new_pid)?;
        }
        self.reparent(child, if slot <= middle { node.page_id() } else { new_pid })?;

        drop(node);
        drop(new_node);

        let parent = self.open_internal(parent_pid)?;
        let pslot = self.seek_slot(&parent, &separator);
        self.insert_into_internal(parent, pslot, &separator, new_pid)
    }

    fn reparent(&self, child: PageId, parent: PageId) -> Result<(), EngineError> {
        if child.is_none() {
            return Ok(());
        }
        node::set_node_parent(&self.fm.borrow(), child, parent)
    }

    /// Erases `key`. Returns `Ok(false)` if `key` was not present.
    pub fn erase(&mut self, key: &[u8]) -> Result<bool, EngineError> {
        let leaf = self.seek_leaf(key)?;
        let slot = self.seek_slot(&leaf, key);
        if slot >= leaf.slot_count() || leaf.key(slot) != key {
            return Ok(false);
        }
        self.erase_from_leaf(leaf, slot)?;
        Ok(true)
    }

    fn erase_from_leaf(&mut self, mut leaf: LeafNode, slot: u16) -> Result<(), EngineError> {
        let is_root = leaf.page_id() == self.root;
        if is_root || !leaf.at_min(is_root) {
            leaf.erase(slot);
            return Ok(());
        }

        let parent_pid = leaf.parent();
        let mut parent = self.open_internal(parent_pid)?;
        let child_slot = self.child_slot_in_parent(&parent, leaf.page_id());

        if child_slot != -1 {
            let left_pid = parent.child(child_slot - 1);
            let mut left = self.open_leaf(left_pid)?;
            if !left.at_min(false) {
                LeafNode::transfer_back_to_front(&mut leaf, &mut left, 1)?;
                leaf.erase(slot + 1);
                let new_sep = left.key(left.slot_count() - 1);
                parent.set_key(child_slot as u16, &new_sep);
                return Ok(());
            }
        }

        let right_slot = child_slot + 1;
        if (right_slot as u16) < parent.slot_count() || (child_slot == -1 && parent.slot_count() > 0) {
            let right_pid = parent.child(right_slot);
            let mut right = self.open_leaf(right_pid)?;
            if !right.at_min(false) {
                leaf.erase(slot);
                LeafNode::transfer_front_to_back(&mut leaf, &mut right, 1)?;
                let new_sep = leaf.key(leaf.slot_count() - 1);
                parent.set_key(right_slot as u16, &new_sep);
                return Ok(());
            }
        }

        // no sibling can lend a slot: merge
        if child_slot != -1 {
            let left_pid = parent.child(child_slot - 1);
            let mut left = self.open_leaf(left_pid)?;
            let left_old_count = left.slot_count();
            let leaf_next = leaf.next_leaf();
            LeafNode::transfer_front_to_back(&mut left, &mut leaf, leaf.slot_count())?;
            left.erase(left_old_count + slot);
            left.set_next_leaf(leaf_next);
            let dead_pid = leaf.page_id();
            leaf.mark_deleted();
            drop(leaf);
            drop(left);
            self.fm.borrow_mut().deallocate(dead_pid)?;
            self.erase_from_internal(parent, child_slot as u16)
        } else {
            let right_pid = parent.child(0);
            let mut right = self.open_leaf(right_pid)?;
            let right_next = right.next_leaf();
            let right_count = right.slot_count();
            LeafNode::transfer_front_to_back(&mut leaf, &mut right, right_count)?;
            leaf.erase(slot);
            leaf.set_next_leaf(right_next);
            let dead_pid = right.page_id();
            right.mark_deleted();
            drop(right);
            drop(leaf);
            self.fm.borrow_mut().deallocate(dead_pid)?;
            self.erase_from_internal(parent, 0)
        }
    }

    fn erase_from_internal(&mut self, mut node: InternalNode, slot: u16) -> Result<(), EngineError> {
        let is_root = node.page_id() == self.root;

        if node.slot_count() > node.min_slot_count(is_root) {
            node.erase(slot);
            return Ok(());
        }

        if is_root {
            // root already at its minimum (one key): collapsing it into its
            // only child shrinks the tree's height by one level.
            let new_root = node.first_child();
            let dead_pid = node.page_id();
            node.mark_deleted();
            drop(node);
            self.fm.borrow_mut().deallocate(dead_pid)?;
            if new_root.is_some() {
                node::set_node_parent(&self.fm.borrow(), new_root, PageId::NONE)?;
                self.root = new_root;
            }
            return Ok(());
        }

        let parent_pid = node.parent();
        let mut parent = self.open_internal(parent_pid)?;
        let child_slot = self.child_slot_in_parent(&parent, node.page_id());

        if child_slot != -1 {
            let left_pid = parent.child(child_slot - 1);
            let mut left = self.open_internal(left_pid)?;
            if left.slot_count() > left.min_slot_count(false) {
                let parent_sep = parent.key(child_slot as u16);
                let sibling_last_key = left.key(left.slot_count() - 1);
                let sibling_last_child = left.child((left.slot_count() - 1) as i32);

                let old_first_child = node.first_child();
                node.insert(0, &parent_sep, old_first_child);
                node.set_first_child(sibling_last_child);
                self.reparent(sibling_last_child, node.page_id())?;
                left.erase(left.slot_count() - 1);
                parent.set_key(child_slot as u16, &sibling_last_key);

                node.erase(slot + 1);
                return Ok(());
            }
        }

        let right_slot = child_slot + 1;
        if (right_slot as u16) < parent.slot_count() || (child_slot == -1 && parent.slot_count() > 0) {
            let right_pid = parent.child(right_slot);
            let mut right = self.open_internal(right_pid)?;
            if right.slot_count() > right.min_slot_count(false) {
                let parent_sep = parent.key(right_slot as u16);
                let right_first_key = right.key(0);
                let right_first_child = right.first_child();

                node.erase(slot);
                let insert_at = node.slot_count();
                node.insert(insert_at, &parent_sep, right_first_child);
                self.reparent(right_first_child, node.page_id())?;

                let right_new_first_child = right.child(0);
                right.set_first_child(right_new_first_child);
                right.erase(0);

                parent.set_key(right_slot as u16, &right_first_key);
                return Ok(());
            }
        }

        // merge
        if child_slot != -1 {
            let left_pid = parent.child(child_slot - 1);
            let mut left = self.open_internal(left_pid)?;
            let sep = parent.key(child_slot as u16);
            let left_old_count = left.slot_count();

            let node_first_child = node.first_child();
            left.insert(left_old_count, &sep, node_first_child);
            self.reparent(node_first_child, left.page_id())?;

            let node_count = node.slot_count();
            InternalNode::transfer_front_to_back(&mut left, &mut node, node_count)?;
            for i in left_old_count + 1..left.slot_count() {
                let cpid = left.child(i as i32);
                self.reparent(cpid, left.page_id())?;
            }

            left.erase(left_old_count + slot + 1);
            let dead = node.page_id();
            node.mark_deleted();
            drop(node);
            drop(left);
            self.fm.borrow_mut().deallocate(dead)?;
            self.erase_from_internal(parent, child_slot as u16)
        } else {
            let right_pid = parent.child(0);
            let mut right = self.open_internal(right_pid)?;
            let sep = parent.key(0);
            let node_old_count = node.slot_count();

            let right_first_child = right.first_child();
            node.insert(node_old_count, &sep, right_first_child);
            self.reparent(right_first_child, node.page_id())?;

            let right_count = right.slot_count();
            InternalNode::transfer_front_to_back(&mut node, &mut right, right_count)?;
            for i in node_old_count + 1..node.slot_count() {
                let cpid = node.child(i as i32);
                self.reparent(cpid, node.page_id())?;
            }

            node.erase(slot);
            let dead = right.page_id();
            right.mark_deleted();
            drop(right);
            drop(node);
            self.fm.borrow_mut().deallocate(dead)?;
            self.erase_from_internal(parent, 0)
        }
    }

    /// Deallocates every page of the tree. Traversal is iterative (an
    /// explicit `Vec`-backed stack) so dropping a very deep tree never
    /// recurses on the host stack.
    pub fn destroy(&mut self) -> Result<(), EngineError> {
        let mut stack = vec![self.root];
        let mut to_free = Vec::new();
        while let Some(pid) = stack.pop() {
            match self.open_node(pid)? {
                OpenNode::Leaf(_) => to_free.push(pid),
                OpenNode::Internal(node) => {
                    stack.push(node.first_child());
                    for i in 0..node.slot_count() {
                        stack.push(node.child(i as i32));
                    }
                    to_free.push(pid);
                }
            }
        }
        for pid in to_free {
            let mut h = self.fm.borrow().pin(pid)?;
            h.mark_deleted();
            drop(h);
            self.fm.borrow_mut().deallocate(pid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use std::cell::RefCell;
    use tempfile::NamedTempFile;

    fn fresh_tree(page_size: u32) -> BPlusTree {
        let tmp = NamedTempFile::new().unwrap();
        let disk = DiskManager::open(tmp.path(), 0, page_size).unwrap();
        let cache = crate::cache::PageCache::new(disk, 64);
        let free_list = crate::freelist::FreeList::new(cache.clone(), PageId::NONE);
        let fm = crate::frame_manager::FrameManager::from_parts(cache, free_list);
        BPlusTree::new(Rc::new(RefCell::new(fm)), KeyType::Int, 4, 8, PageId::NONE).unwrap()
    }

    fn key(i: i32) -> Vec<u8> {
        i.to_ne_bytes().to_vec()
    }

    fn row(i: i32) -> Vec<u8> {
        let mut v = key(i);
        v.extend_from_slice(&(i * 10).to_ne_bytes());
        v
    }

    #[test]
    fn insert_then_get_round_trips() {
        let mut tree = fresh_tree(128);
        for i in 0..5 {
            assert!(tree.insert(&key(i), &row(i)).unwrap());
        }
        for i in 0..5 {
            assert_eq!(tree.get(&key(i)).unwrap(), Some(row(i)));
        }
        assert_eq!(tree.get(&key(99)).unwrap(), None);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut tree = fresh_tree(128);
        assert!(tree.insert(&key(1), &row(1)).unwrap());
        assert!(!tree.insert(&key(1), &row(2)).unwrap());
    }

    #[test]
    fn insert_enough_to_split_then_find_all() {
        let mut tree = fresh_tree(64); // tiny page forces leaf splits quickly
        for i in 0..40 {
            assert!(tree.insert(&key(i), &row(i)).unwrap());
        }
        for i in 0..40 {
            assert_eq!(tree.get(&key(i)).unwrap(), Some(row(i)), "missing key {i}");
        }
    }

    #[test]
    fn insert_and_erase_all_leaves_empty_tree() {
        let mut tree = fresh_tree(64);
        for i in 0..40 {
            tree.insert(&key(i), &row(i)).unwrap();
        }
        for i in 0..40 {
            assert!(tree.erase(&key(i)).unwrap(), "failed to erase {i}");
        }
        for i in 0..40 {
            assert_eq!(tree.get(&key(i)).unwrap(), None);
        }
    }

    #[test]
    fn erase_missing_key_is_a_noop() {
        let mut tree = fresh_tree(128);
        tree.insert(&key(1), &row(1)).unwrap();
        assert!(!tree.erase(&key(2)).unwrap());
    }
}
