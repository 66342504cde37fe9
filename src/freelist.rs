//! Persistent stack of reusable page ids, stored as a chain of free-list
//! blocks.

use std::rc::Rc;

use log::trace;

use crate::byteio;
use crate::cache::{FrameHandle, PageCache};
use crate::error::EngineError;
use crate::page::{Magic, PageId};

const OFFSET_MAGIC: usize = 0;
const OFFSET_STACK_PTR: usize = 2;
const OFFSET_NEXT_BLOCK: usize = 4;
const HEADER_SIZE: usize = 8;

pub struct FreeList {
    cache: Rc<PageCache>,
    head: PageId,
}

impl FreeList {
    pub fn new(cache: Rc<PageCache>, head: PageId) -> Self {
        FreeList { cache, head }
    }

    pub fn head(&self) -> PageId {
        self.head
    }

    fn stack_pointer(h: &FrameHandle) -> Result<u16, EngineError> {
        h.with_bytes(|b| byteio::read_u16(b, OFFSET_STACK_PTR))
    }

    fn next_block(h: &FrameHandle) -> Result<PageId, EngineError> {
        h.with_bytes(|b| byteio::read_u32(b, OFFSET_NEXT_BLOCK)).map(PageId)
    }

    fn is_full(h: &FrameHandle) -> Result<bool, EngineError> {
        Ok(Self::stack_pointer(h)? as usize + 4 > h.page_size())
    }

    fn is_empty(h: &FrameHandle) -> Result<bool, EngineError> {
        Ok(Self::stack_pointer(h)? as usize == HEADER_SIZE)
    }

    /// Initializes `pid` in place as a new (empty) free-list block.
    fn init_block(&self, pid: PageId, next_block: PageId) -> Result<(), EngineError> {
        let mut h = self.cache.pin(pid)?;
        h.with_bytes_mut(|b| {
            let _ = byteio::write_u8(b, OFFSET_MAGIC, Magic::FreeListBlock as u8);
            let _ = byteio::write_u16(b, OFFSET_STACK_PTR, HEADER_SIZE as u16);
            let _ = byteio::write_u32(b, OFFSET_NEXT_BLOCK, next_block.0);
        });
        Ok(())
    }

    fn tail(&self) -> Result<PageId, EngineError> {
        let mut current = self.head;
        loop {
            let next = {
                let h = self.cache.pin(current)?;
                Self::next_block(&h)?
            };
            if next.is_none() {
                return Ok(current);
            }
            current = next;
        }
    }

    /// Pushes `pid` onto the list. If the list is empty, `pid` becomes the
    /// sole (empty) block. Otherwise it is pushed onto the tail block if
    /// there's room, else the tail's `next_block` is set to `pid` and `pid`
    /// is initialized as the new (empty) tail.
    pub fn push(&mut self, pid: PageId) -> Result<(), EngineError> {
        if self.head.is_none() {
            self.init_block(pid, PageId::NONE)?;
            self.head = pid;
            trace!("freelist: {pid:?} becomes the first block");
            return Ok(());
        }

        let tail = self.tail()?;
        let full = {
            let h = self.cache.pin(tail)?;
            Self::is_full(&h)?
        };

        if !full {
            let mut h = self.cache.pin(tail)?;
            let sp = Self::stack_pointer(&h)?;
            h.with_bytes_mut(|b| {
                let _ = byteio::write_u32(b, sp as usize, pid.0);
                let _ = byteio::write_u16(b, OFFSET_STACK_PTR, sp + 4);
            });
            trace!("freelist: pushed {pid:?} onto block {tail:?}");
        } else {
            {
                let mut h = self.cache.pin(tail)?;
                h.with_bytes_mut(|b| {
                    let _ = byteio::write_u32(b, OFFSET_NEXT_BLOCK, pid.0);
                });
            }
            self.init_block(pid, PageId::NONE)?;
            trace!("freelist: chained new tail block {pid:?} after {tail:?}");
        }
        Ok(())
    }

    /// Pops the most recently pushed page id, or `Ok(None)` if the list is
    /// empty (the caller should extend the disk in that case).
    pub fn pop(&mut self) -> Result<Option<PageId>, EngineError> {
        if self.head.is_none() {
            return Ok(None);
        }

        let head_is_sole_block = {
            let h = self.cache.pin(self.head)?;
            Self::next_block(&h)?.is_none()
        };
        if head_is_sole_block {
            let empty = {
                let h = self.cache.pin(self.head)?;
                Self::is_empty(&h)?
            };
            if empty {
                let popped = self.head;
                self.head = PageId::NONE;
                let mut h = self.cache.pin(popped)?;
                h.mark_deleted();
                trace!("freelist: popped sole empty block {popped:?}, list now empty");
                return Ok(Some(popped));
            }
        }

        let mut prev: Option<PageId> = None;
        let mut current = self.head;
        loop {
            let next = {
                let h = self.cache.pin(current)?;
                Self::next_block(&h)?
            };
            if next.is_none() {
                break;
            }
            prev = Some(current);
            current = next;
        }

        let empty = {
            let h = self.cache.pin(current)?;
            Self::is_empty(&h)?
        };

        if !empty {
            let mut h = self.cache.pin(current)?;
            let sp = Self::stack_pointer(&h)?;
            let new_sp = sp - 4;
            let popped = h.with_bytes_mut(|b| {
                let v = byteio::read_u32(b, new_sp as usize).unwrap_or(PageId::NONE.0);
                let _ = byteio::write_u16(b, OFFSET_STACK_PTR, new_sp);
                v
            });
            trace!("freelist: popped {popped:#x} from block {current:?}");
            Ok(Some(PageId(popped)))
        } else {
            let prev = prev.expect("single-block empty case handled above");
            let mut ph = self.cache.pin(prev)?;
            ph.with_bytes_mut(|b| {
                let _ = byteio::write_u32(b, OFFSET_NEXT_BLOCK, PageId::NONE.0);
            });
            let mut h = self.cache.pin(current)?;
            h.mark_deleted();
            trace!("freelist: detached empty tail block {current:?} from {prev:?}");
            Ok(Some(current))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn fresh_cache(pages: u32) -> Rc<PageCache> {
        let tmp = NamedTempFile::new().unwrap();
        let mut disk = DiskManager::open(tmp.path(), 0, 64).unwrap();
        for _ in 0..pages {
            disk.extend().unwrap();
        }
        PageCache::new(disk, 16)
    }

    #[test]
    fn push_then_pop_is_lifo() {
        let cache = fresh_cache(4);
        let mut fl = FreeList::new(cache, PageId::NONE);
        fl.push(PageId(0)).unwrap();
        fl.push(PageId(1)).unwrap();
        fl.push(PageId(2)).unwrap();

        assert_eq!(fl.pop().unwrap(), Some(PageId(2)));
        assert_eq!(fl.pop().unwrap(), Some(PageId(1)));
        assert_eq!(fl.pop().unwrap(), Some(PageId(0)));
        assert_eq!(fl.pop().unwrap(), None);
    }

    #[test]
    fn chains_a_new_block_when_the_tail_is_full() {
        // page_size=64, header=8 bytes, 4 bytes per id -> 14 ids fit in one block
        let cache = fresh_cache(20);
        let mut fl = FreeList::new(cache, PageId::NONE);
        for i in 0..16 {
            fl.push(PageId(i)).unwrap();
        }
        for i in (0..16).rev() {
            assert_eq!(fl.pop().unwrap(), Some(PageId(i)));
        }
        assert_eq!(fl.pop().unwrap(), None);
    }
}
