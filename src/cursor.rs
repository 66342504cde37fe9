//! A typed cursor over a [`BPlusTree`], giving the plan iterators ordered
//! traversal plus positioned insert/erase without re-deriving the tree's
//! split/merge logic. Row access borrows through a closure, mirroring
//! `FrameHandle::with_bytes` in `cache.rs`.
//!
//! Held as `Rc<RefCell<BPlusTree>>` rather than a borrowed reference: a
//! single statement's plan tree routinely needs more than one cursor over
//! the same table (e.g. `Update`'s scan cursor and its own mutation), and a
//! `&mut` borrow threaded through a tree of trait objects doesn't compose
//! the way shared, dynamically-checked ownership does in this
//! single-threaded engine.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;

use crate::btree::node::LeafNode;
use crate::btree::{BPlusTree, OpenNode};
use crate::error::EngineError;
use crate::page::PageId;
use crate::row::{Row, RowView};
use crate::schema::Schema;

/// `(leaf, slot)`, or `None` once traversal has run off the end of the leaf
/// chain.
type Position = Option<(PageId, u16)>;

pub struct Cursor {
    tree: Rc<RefCell<BPlusTree>>,
    schema: Arc<Schema>,
    position: Position,
    /// Whether the next [`Cursor::step`] must advance before reporting. A
    /// freshly-opened or freshly-erased cursor already sits on a row that
    /// hasn't been delivered to a pull yet, so it starts `false`.
    needs_advance: bool,
}

impl Cursor {
    /// Positions at the first row of the leftmost leaf.
    pub fn open_first(tree: Rc<RefCell<BPlusTree>>, schema: Arc<Schema>) -> Result<Self, EngineError> {
        let mut pid = tree.borrow().root();
        loop {
            let descend = match tree.borrow().open_node(pid)? {
                OpenNode::Leaf(_) => None,
                OpenNode::Internal(node) => Some(node.first_child()),
            };
            match descend {
                Some(child) => pid = child,
                None => break,
            }
        }
        let mut cursor = Cursor {
            tree,
            schema,
            position: Some((pid, 0)),
            needs_advance: false,
        };
        cursor.skip_empty_leaves()?;
        Ok(cursor)
    }

    /// Positions at the first row with a primary key `>= key`, honoring the
    /// lower bound an `IndexScan` plan lowers a `WHERE` clause into.
    pub fn open_at(tree: Rc<RefCell<BPlusTree>>, schema: Arc<Schema>, key: &[u8]) -> Result<Self, EngineError> {
        let (pid, slot) = {
            let t = tree.borrow();
            let leaf = t.seek_leaf(key)?;
            let slot = Self::seek_slot_in(&leaf, &t, key);
            (leaf.page_id(), slot)
        };
        let mut cursor = Cursor {
            tree,
            schema,
            position: Some((pid, slot)),
            needs_advance: false,
        };
        cursor.skip_empty_leaves()?;
        Ok(cursor)
    }

    fn seek_slot_in(leaf: &LeafNode, tree: &BPlusTree, key: &[u8]) -> u16 {
        let mut lo = 0u16;
        let mut hi = leaf.slot_count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if tree.key_type().compare(&leaf.key(mid), key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Advances across leaf boundaries while the current leaf is exhausted,
    /// so `position` always points at a real row or is `None`.
    fn skip_empty_leaves(&mut self) -> Result<(), EngineError> {
        loop {
            let Some((pid, slot)) = self.position else {
                return Ok(());
            };
            let next = {
                let tree = self.tree.borrow();
                let leaf = tree.open_leaf(pid)?;
                if slot < leaf.slot_count() {
                    return Ok(());
                }
                leaf.next_leaf()
            };
            self.position = if next.is_none() { None } else { Some((next, 0)) };
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.position.is_none()
    }

    /// Runs `f` against the current row without materializing it, or
    /// returns `None` if the cursor is exhausted.
    pub fn with_row<R>(&self, f: impl FnOnce(&RowView) -> R) -> Result<Option<R>, EngineError> {
        let Some((pid, slot)) = self.position else {
            return Ok(None);
        };
        let tree = self.tree.borrow();
        let leaf = tree.open_leaf(pid)?;
        let schema = self.schema.clone();
        Ok(Some(leaf.with_slot_bytes(slot, |bytes| {
            let view = RowView::new(schema, bytes);
            f(&view)
        })))
    }

    pub fn materialize_current(&self) -> Result<Option<Row>, EngineError> {
        self.with_row(|v| v.materialize())
    }

    pub fn current_key(&self) -> Result<Option<Vec<u8>>, EngineError> {
        let Some((pid, slot)) = self.position else {
            return Ok(None);
        };
        let tree = self.tree.borrow();
        let leaf = tree.open_leaf(pid)?;
        Ok(Some(leaf.key(slot)))
    }

    pub fn advance(&mut self) -> Result<(), EngineError> {
        if let Some((pid, slot)) = self.position {
            self.position = Some((pid, slot + 1));
            self.skip_empty_leaves()?;
        }
        Ok(())
    }

    /// The pull primitive plan iterators drive a scan with: advances past
    /// the previously-delivered row, unless the cursor is sitting on a row
    /// that hasn't been delivered yet (just after `open_first`/`open_at`, or
    /// just after `erase_current` landed on the erased row's successor).
    /// Returns `false` once the cursor runs off the end of the leaf chain.
    pub fn step(&mut self) -> Result<bool, EngineError> {
        if self.needs_advance {
            self.advance()?;
        }
        self.needs_advance = true;
        Ok(!self.is_exhausted())
    }

    /// Overwrites one field of the current row in place (used by `Update`).
    /// Leaves position and key unchanged — callers must only use this for
    /// non-primary-key columns, since mutating the primary key out from
    /// under the tree's ordering would corrupt it.
    pub fn write_field(&mut self, field_offset: usize, bytes: &[u8]) -> Result<(), EngineError> {
        let Some((pid, slot)) = self.position else {
            return Err(EngineError::EndOfTree);
        };
        let tree = self.tree.borrow();
        let mut leaf = tree.open_leaf(pid)?;
        leaf.write_field(slot, field_offset, bytes);
        Ok(())
    }

    /// Inserts `row` under `key`, rejecting the insert (returning `Ok(false)`
    /// without mutating the tree) if the key is already present. On success
    /// the cursor repositions to the inserted row, since a split may have
    /// invalidated whatever leaf it was previously pinned to.
    pub fn insert(&mut self, key: &[u8], row: &[u8]) -> Result<bool, EngineError> {
        let inserted = self.tree.borrow_mut().insert(key, row)?;
        if inserted {
            self.reseek(key)?;
            self.needs_advance = false;
        }
        Ok(inserted)
    }

    /// Erases the row at the cursor's current position and repositions to
    /// its in-order successor.
    pub fn erase_current(&mut self) -> Result<bool, EngineError> {
        let Some(key) = self.current_key()? else {
            return Ok(false);
        };
        let erased = self.tree.borrow_mut().erase(&key)?;
        if erased {
            self.reseek(&key)?;
            self.needs_advance = false;
        }
        Ok(erased)
    }

    fn reseek(&mut self, key: &[u8]) -> Result<(), EngineError> {
        let (pid, slot) = {
            let tree = self.tree.borrow();
            let leaf = tree.seek_leaf(key)?;
            let slot = Self::seek_slot_in(&leaf, &tree, key);
            (leaf.page_id(), slot)
        };
        self.position = Some((pid, slot));
        self.skip_empty_leaves()
    }
}
