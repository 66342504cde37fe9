//! Binary layout of B+-tree leaf and internal nodes atop a pinned frame:
//! fixed header, variable-width slots addressed by index rather than a
//! zerocopy struct, since slot width is a runtime (schema-dependent)
//! quantity here.

use crate::byteio;
use crate::cache::FrameHandle;
use crate::error::EngineError;
use crate::frame_manager::FrameManager;
use crate::page::{Magic, PageId};

mod offsets {
    pub const MAGIC: usize = 0;
    pub const KEY_SIZE: usize = 1;
    pub const SLOT_SIZE: usize = 2;
    pub const SLOT_COUNT: usize = 4;
    pub const PARENT: usize = 6;
    /// Internal node's `first_child`, leaf node's `next_leaf` — same offset,
    /// different meaning, never both present on one page.
    pub const TRAILER: usize = 10;
}

pub const COMMON_HEADER_SIZE: usize = 10;
pub const INTERNAL_HEADER_SIZE: usize = 14;
pub const LEAF_HEADER_SIZE: usize = 14;

/// Writes the page's common header fields in place without constructing a
/// typed façade; used by split/merge code when reparenting children.
pub fn set_node_parent(fm: &FrameManager, pid: PageId, parent: PageId) -> Result<(), EngineError> {
    let mut h = fm.pin(pid)?;
    h.with_bytes_mut(|b| {
        let _ = byteio::write_u32(b, offsets::PARENT, parent.0);
    });
    Ok(())
}

pub fn node_magic(fm: &FrameManager, pid: PageId) -> Result<Magic, EngineError> {
    let h = fm.pin(pid)?;
    let byte = h.with_bytes(|b| byteio::read_u8(b, offsets::MAGIC))?;
    Magic::from_byte(byte)
}

fn check_compatible(key_size_a: u8, key_size_b: u8, slot_size_a: u16, slot_size_b: u16) -> Result<(), EngineError> {
    if key_size_a != key_size_b || slot_size_a != slot_size_b {
        return Err(EngineError::NodeIncompatible {
            key_size_a,
            key_size_b,
            slot_size_a,
            slot_size_b,
        });
    }
    Ok(())
}

/// `F = floor((page_size - header) / (key_size + 4))`.
pub fn internal_capacity(page_size: usize, key_size: u8) -> u16 {
    ((page_size - INTERNAL_HEADER_SIZE) / (key_size as usize + 4)) as u16
}

/// `L = floor((page_size - header) / slot_size)`.
pub fn leaf_capacity(page_size: usize, slot_size: u16) -> u16 {
    ((page_size - LEAF_HEADER_SIZE) / slot_size as usize) as u16
}

/// Common read surface for binary search over a node's keys, shared by
/// [`InternalNode`] and [`LeafNode`] so `btree::seek_slot` can be written
/// once against either.
pub trait NodeKeys {
    fn slot_count(&self) -> u16;
    fn key(&self, slot: u16) -> Vec<u8>;
}

pub struct InternalNode {
    frame: FrameHandle,
    key_size: u8,
}

impl NodeKeys for InternalNode {
    fn slot_count(&self) -> u16 {
        InternalNode::slot_count(self)
    }
    fn key(&self, slot: u16) -> Vec<u8> {
        InternalNode::key(self, slot)
    }
}

impl NodeKeys for LeafNode {
    fn slot_count(&self) -> u16 {
        LeafNode::slot_count(self)
    }
    fn key(&self, slot: u16) -> Vec<u8> {
        LeafNode::key(self, slot)
    }
}

impl InternalNode {
    pub fn create(
        mut frame: FrameHandle,
        key_size: u8,
        parent: PageId,
        first_child: PageId,
    ) -> Self {
        let slot_size = key_size as u16 + 4;
        frame.with_bytes_mut(|b| {
            let _ = byteio::write_u8(b, offsets::MAGIC, Magic::InternalNode as u8);
            let _ = byteio::write_u8(b, offsets::KEY_SIZE, key_size);
            let _ = byteio::write_u16(b, offsets::SLOT_SIZE, slot_size);
            let _ = byteio::write_u16(b, offsets::SLOT_COUNT, 0);
            let _ = byteio::write_u32(b, offsets::PARENT, parent.0);
            let _ = byteio::write_u32(b, offsets::TRAILER, first_child.0);
        });
        InternalNode { frame, key_size }
    }

    pub fn open(frame: FrameHandle) -> Result<Self, EngineError> {
        let magic = frame.with_bytes(|b| byteio::read_u8(b, offsets::MAGIC))?;
        if Magic::from_byte(magic)? != Magic::InternalNode {
            return Err(EngineError::InvalidMagic(magic));
        }
        let key_size = frame.with_bytes(|b| byteio::read_u8(b, offsets::KEY_SIZE))?;
        Ok(InternalNode { frame, key_size })
    }

    pub fn page_id(&self) -> PageId {
        self.frame.page_id()
    }

    pub fn key_size(&self) -> u8 {
        self.key_size
    }

    pub fn slot_size(&self) -> u16 {
        self.key_size as u16 + 4
    }

    fn stride(&self) -> usize {
        self.slot_size() as usize
    }

    pub fn slot_count(&self) -> u16 {
        self.frame.with_bytes(|b| byteio::read_u16(b, offsets::SLOT_COUNT)).unwrap_or(0)
    }

    fn set_slot_count(&mut self, count: u16) {
        self.frame.with_bytes_mut(|b| {
            let _ = byteio::write_u16(b, offsets::SLOT_COUNT, count);
        });
    }

    pub fn parent(&self) -> PageId {
        PageId(self.frame.with_bytes(|b| byteio::read_u32(b, offsets::PARENT)).unwrap_or(PageId::NONE.0))
    }

    pub fn set_parent(&mut self, parent: PageId) {
        self.frame.with_bytes_mut(|b| {
            let _ = byteio::write_u32(b, offsets::PARENT, parent.0);
        });
    }

    /// Marks the underlying page logically deleted ahead of deallocation.
    pub fn mark_deleted(&mut self) {
        self.frame.mark_deleted();
    }

    pub fn first_child(&self) -> PageId {
        PageId(self.frame.with_bytes(|b| byteio::read_u32(b, offsets::TRAILER)).unwrap_or(PageId::NONE.0))
    }

    pub fn set_first_child(&mut self, pid: PageId) {
        self.frame.with_bytes_mut(|b| {
            let _ = byteio::write_u32(b, offsets::TRAILER, pid.0);
        });
    }

    fn slot_offset(&self, slot: u16) -> usize {
        INTERNAL_HEADER_SIZE + slot as usize * self.stride()
    }

    pub fn key(&self, slot: u16) -> Vec<u8> {
        let off = self.slot_offset(slot);
        self.frame
            .with_bytes(|b| byteio::read_bytes(b, off, self.key_size as usize).map(|s| s.to_vec()))
            .unwrap_or_default()
    }

    pub fn set_key(&mut self, slot: u16, key: &[u8]) {
        let off = self.slot_offset(slot);
        self.frame.with_bytes_mut(|b| {
            let _ = byteio::write_bytes(b, off, key);
        });
    }

    /// `child(-1)` is `first_child`; `child(i)` for `i >= 0` is slot `i`'s child.
    pub fn child(&self, i: i32) -> PageId {
        if i < 0 {
            return self.first_child();
        }
        let off = self.slot_offset(i as u16) + self.key_size as usize;
        PageId(self.frame.with_bytes(|b| byteio::read_u32(b, off)).unwrap_or(PageId::NONE.0))
    }

    pub fn set_child(&mut self, i: i32, pid: PageId) {
        if i < 0 {
            self.set_first_child(pid);
            return;
        }
        let off = self.slot_offset(i as u16) + self.key_size as usize;
        self.frame.with_bytes_mut(|b| {
            let _ = byteio::write_u32(b, off, pid.0);
        });
    }

    pub fn max_slot_count(&self) -> u16 {
        internal_capacity(self.frame.page_size(), self.key_size)
    }

    pub fn min_slot_count(&self, is_root: bool) -> u16 {
        if is_root {
            1
        } else {
            let f = self.max_slot_count();
            f.div_ceil(2).saturating_sub(1)
        }
    }

    pub fn at_max(&self) -> bool {
        self.slot_count() >= self.max_slot_count()
    }

    pub fn at_min(&self, is_root: bool) -> bool {
        self.slot_count() <= self.min_slot_count(is_root)
    }

    /// Moves the run of slots `[start, slot_count)` by `steps` slot
    /// positions (signed) and adjusts `slot_count` by `steps`.
    pub fn shift(&mut self, start: u16, steps: i32) {
        let count = self.slot_count() as i32;
        let run_len = count - start as i32;
        if run_len > 0 {
            let stride = self.stride();
            let src = self.slot_offset(start);
            let dst = (start as i32 + steps) as u16;
            let dst_off = self.slot_offset(dst);
            let bytes = run_len as usize * stride;
            self.frame.with_bytes_mut(|b| {
                let _ = byteio::move_bytes(b, src, dst_off, bytes);
            });
        }
        self.set_slot_count((count + steps) as u16);
    }

    pub fn erase(&mut self, i: u16) {
        self.shift(i + 1, -1);
    }

    pub fn insert(&mut self, slot: u16, key: &[u8], child: PageId) {
        self.shift(slot, 1);
        self.set_key(slot, key);
        self.set_child(slot as i32, child);
    }

    /// Moves the last `count` slots of `src` to the front of `dst`.
    pub fn transfer_back_to_front(dst: &mut InternalNode, src: &mut InternalNode, count: u16) -> Result<(), EngineError> {
        check_compatible(dst.key_size, src.key_size, dst.slot_size(), src.slot_size())?;
        let src_count = src.slot_count();
        dst.shift(0, count as i32);
        for i in 0..count {
            let key = src.key(src_count - count + i);
            let child = src.child((src_count - count + i) as i32);
            dst.set_key(i, &key);
            dst.set_child(i as i32, child);
        }
        src.shift(src_count, -(count as i32));
        Ok(())
    }

    /// Moves the first `count` slots of `src` to the back of `dst`.
    pub fn transfer_front_to_back(dst: &mut InternalNode, src: &mut InternalNode, count: u16) -> Result<(), EngineError> {
        check_compatible(dst.key_size, src.key_size, dst.slot_size(), src.slot_size())?;
        let dst_count = dst.slot_count();
        dst.shift(dst_count, count as i32);
        for i in 0..count {
            let key = src.key(i);
            let child = src.child(i as i32);
            dst.set_key(dst_count + i, &key);
            dst.set_child((dst_count + i) as i32, child);
        }
        src.shift(count, -(count as i32));
        Ok(())
    }
}

pub struct LeafNode {
    frame: FrameHandle,
    key_size: u8,
    row_size: u16,
}

impl LeafNode {
    pub fn create(mut frame: FrameHandle, key_size: u8, row_size: u16, parent: PageId, next_leaf: PageId) -> Self {
        frame.with_bytes_mut(|b| {
            let _ = byteio::write_u8(b, offsets::MAGIC, Magic::LeafNode as u8);
            let _ = byteio::write_u8(b, offsets::KEY_SIZE, key_size);
            let _ = byteio::write_u16(b, offsets::SLOT_SIZE, row_size);
            let _ = byteio::write_u16(b, offsets::SLOT_COUNT, 0);
            let _ = byteio::write_u32(b, offsets::PARENT, parent.0);
            let _ = byteio::write_u32(b, offsets::TRAILER, next_leaf.0);
        });
        LeafNode { frame, key_size, row_size }
    }

    pub fn open(frame: FrameHandle) -> Result<Self, EngineError> {
        let magic = frame.with_bytes(|b| byteio::read_u8(b, offsets::MAGIC))?;
        if Magic::from_byte(magic)? != Magic::LeafNode {
            return Err(EngineError::InvalidMagic(magic));
        }
        let key_size = frame.with_bytes(|b| byteio::read_u8(b, offsets::KEY_SIZE))?;
        let row_size = frame.with_bytes(|b| byteio::read_u16(b, offsets::SLOT_SIZE))?;
        Ok(LeafNode { frame, key_size, row_size })
    }

    pub fn page_id(&self) -> PageId {
        self.frame.page_id()
    }

    pub fn key_size(&self) -> u8 {
        self.key_size
    }

    pub fn slot_size(&self) -> u16 {
        self.row_size
    }

    pub fn slot_count(&self) -> u16 {
        self.frame.with_bytes(|b| byteio::read_u16(b, offsets::SLOT_COUNT)).unwrap_or(0)
    }

    fn set_slot_count(&mut self, count: u16) {
        self.frame.with_bytes_mut(|b| {
            let _ = byteio::write_u16(b, offsets::SLOT_COUNT, count);
        });
    }

    pub fn parent(&self) -> PageId {
        PageId(self.frame.with_bytes(|b| byteio::read_u32(b, offsets::PARENT)).unwrap_or(PageId::NONE.0))
    }

    pub fn set_parent(&mut self, parent: PageId) {
        self.frame.with_bytes_mut(|b| {
            let _ = byteio::write_u32(b, offsets::PARENT, parent.0);
        });
    }

    pub fn next_leaf(&self) -> PageId {
        PageId(self.frame.with_bytes(|b| byteio::read_u32(b, offsets::TRAILER)).unwrap_or(PageId::NONE.0))
    }

    pub fn set_next_leaf(&mut self, pid: PageId) {
        self.frame.with_bytes_mut(|b| {
            let _ = byteio::write_u32(b, offsets::TRAILER, pid.0);
        });
    }

    /// Marks the underlying page logically deleted ahead of deallocation.
    pub fn mark_deleted(&mut self) {
        self.frame.mark_deleted();
    }

    fn slot_offset(&self, slot: u16) -> usize {
        LEAF_HEADER_SIZE + slot as usize * self.row_size as usize
    }

    pub fn key(&self, slot: u16) -> Vec<u8> {
        let off = self.slot_offset(slot);
        self.frame
            .with_bytes(|b| byteio::read_bytes(b, off, self.key_size as usize).map(|s| s.to_vec()))
            .unwrap_or_default()
    }

    /// Runs `f` against the slot's raw row bytes without copying them out
    /// first — the only way to get a genuinely borrowed view through the
    /// cache's `Rc<RefCell<_>>` frame storage, whose dynamic borrow can't be
    /// handed back across a return boundary.
    pub fn with_slot_bytes<R>(&self, slot: u16, f: impl FnOnce(&[u8]) -> R) -> R {
        let off = self.slot_offset(slot);
        let size = self.row_size as usize;
        self.frame.with_bytes(|b| f(&b[off..off + size]))
    }

    pub fn slot_bytes(&self, slot: u16) -> Vec<u8> {
        let off = self.slot_offset(slot);
        self.frame
            .with_bytes(|b| byteio::read_bytes(b, off, self.row_size as usize).map(|s| s.to_vec()))
            .unwrap_or_default()
    }

    pub fn set_slot(&mut self, slot: u16, bytes: &[u8]) {
        let off = self.slot_offset(slot);
        self.frame.with_bytes_mut(|b| {
            let _ = byteio::write_bytes(b, off, bytes);
        });
    }

    /// Overwrites one field of a slot's row in place, at `field_offset`
    /// bytes into the row (used to apply an `Update` modifier without
    /// re-serializing the whole row).
    pub fn write_field(&mut self, slot: u16, field_offset: usize, bytes: &[u8]) {
        let off = self.slot_offset(slot) + field_offset;
        self.frame.with_bytes_mut(|b| {
            let _ = byteio::write_bytes(b, off, bytes);
        });
    }

    pub fn max_slot_count(&self) -> u16 {
        leaf_capacity(self.frame.page_size(), self.row_size)
    }

    pub fn min_slot_count(&self, is_root: bool) -> u16 {
        if is_root {
            0
        } else {
            self.max_slot_count() / 2
        }
    }

    pub fn at_max(&self) -> bool {
        self.slot_count() >= self.max_slot_count()
    }

    pub fn at_min(&self, is_root: bool) -> bool {
        self.slot_count() <= self.min_slot_count(is_root)
    }

    pub fn shift(&mut self, start: u16, steps: i32) {
        let count = self.slot_count() as i32;
        let run_len = count - start as i32;
        if run_len > 0 {
            let stride = self.row_size as usize;
            let src = self.slot_offset(start);
            let dst = (start as i32 + steps) as u16;
            let dst_off = self.slot_offset(dst);
            let bytes = run_len as usize * stride;
            self.frame.with_bytes_mut(|b| {
                let _ = byteio::move_bytes(b, src, dst_off, bytes);
            });
        }
        self.set_slot_count((count + steps) as u16);
    }

    pub fn erase(&mut self, i: u16) {
        self.shift(i + 1, -1);
    }

    pub fn insert(&mut self, slot: u16, bytes: &[u8]) {
        self.shift(slot, 1);
        self.set_slot(slot, bytes);
    }

    /// `middle = slot_count / 2` split point: moves the back half of `src`
    /// (the new leaf's share) to the front of `dst`. See `btree/mod.rs` for
    /// why this split point is chosen over the source's ambiguous
    /// `floor`/`ceil` revisions.
    pub fn transfer_back_to_front(dst: &mut LeafNode, src: &mut LeafNode, count: u16) -> Result<(), EngineError> {
        check_compatible(dst.key_size, src.key_size, dst.slot_size(), src.slot_size())?;
        let src_count = src.slot_count();
        dst.shift(0, count as i32);
        for i in 0..count {
            let bytes = src.slot_bytes(src_count - count + i);
            dst.set_slot(i, &bytes);
        }
        src.shift(src_count, -(count as i32));
        Ok(())
    }

    pub fn transfer_front_to_back(dst: &mut LeafNode, src: &mut LeafNode, count: u16) -> Result<(), EngineError> {
        check_compatible(dst.key_size, src.key_size, dst.slot_size(), src.slot_size())?;
        let dst_count = dst.slot_count();
        dst.shift(dst_count, count as i32);
        for i in 0..count {
            let bytes = src.slot_bytes(i);
            dst.set_slot(dst_count + i, &bytes);
        }
        src.shift(count, -(count as i32));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use crate::cache::PageCache;
    use tempfile::NamedTempFile;
    use std::rc::Rc;

    fn cache(pages: u32) -> Rc<PageCache> {
        let tmp = NamedTempFile::new().unwrap();
        let mut disk = DiskManager::open(tmp.path(), 0, 256).unwrap();
        for _ in 0..pages {
            disk.extend().unwrap();
        }
        PageCache::new(disk, 16)
    }

    #[test]
    fn leaf_insert_and_erase_shift_slots() {
        let cache = cache(1);
        let frame = cache.pin(PageId(0)).unwrap();
        let mut leaf = LeafNode::create(frame, 4, 8, PageId::NONE, PageId::NONE);

        leaf.insert(0, &[1, 0, 0, 0, 10, 0, 0, 0]);
        leaf.insert(1, &[2, 0, 0, 0, 20, 0, 0, 0]);
        leaf.insert(1, &[3, 0, 0, 0, 30, 0, 0, 0]); // insert between: 1, 3, 2

        assert_eq!(leaf.slot_count(), 3);
        assert_eq!(leaf.key(0), vec![1, 0, 0, 0]);
        assert_eq!(leaf.key(1), vec![3, 0, 0, 0]);
        assert_eq!(leaf.key(2), vec![2, 0, 0, 0]);

        leaf.erase(1);
        assert_eq!(leaf.slot_count(), 2);
        assert_eq!(leaf.key(1), vec![2, 0, 0, 0]);
    }

    #[test]
    fn internal_child_minus_one_is_first_child() {
        let cache = cache(1);
        let frame = cache.pin(PageId(0)).unwrap();
        let node = InternalNode::create(frame, 4, PageId::NONE, PageId(7));
        assert_eq!(node.child(-1), PageId(7));
    }

    #[test]
    fn transfer_back_to_front_moves_the_tail() {
        let cache = cache(2);
        let f0 = cache.pin(PageId(0)).unwrap();
        let f1 = cache.pin(PageId(1)).unwrap();
        let mut a = LeafNode::create(f0, 4, 8, PageId::NONE, PageId::NONE);
        let mut b = LeafNode::create(f1, 4, 8, PageId::NONE, PageId::NONE);

        for k in 0..4i32 {
            a.insert(k as u16, &[k as u8, 0, 0, 0, 0, 0, 0, 0]);
        }
        LeafNode::transfer_back_to_front(&mut b, &mut a, 2).unwrap();

        assert_eq!(a.slot_count(), 2);
        assert_eq!(b.slot_count(), 2);
        assert_eq!(b.key(0), vec![2, 0, 0, 0]);
        assert_eq!(b.key(1), vec![3, 0, 0, 0]);
    }
}
