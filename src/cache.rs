//! Pinning page cache with LRU eviction of unpinned frames, and the
//! scoped [`FrameHandle`] that unpins on drop. An `Rc<RefCell<_>>` per frame
//! gives shared, address-stable storage that a scoped handle can borrow
//! from without the frame table's own reallocation invalidating it.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use log::debug;

use crate::disk::DiskManager;
use crate::error::EngineError;
use crate::page::PageId;

struct Frame {
    page_id: PageId,
    data: Vec<u8>,
    dirty: bool,
    pin_count: u32,
}

type FrameRef = Rc<RefCell<Frame>>;

struct Inner {
    disk: DiskManager,
    capacity: usize,
    frames: HashMap<PageId, FrameRef>,
    /// Frame indices (by page id) with `pin_count == 0`; front is the most
    /// recently unpinned, back is the next eviction victim.
    lru: VecDeque<PageId>,
}

pub struct PageCache {
    inner: RefCell<Inner>,
}

impl PageCache {
    pub fn new(disk: DiskManager, capacity: usize) -> Rc<PageCache> {
        Rc::new(PageCache {
            inner: RefCell::new(Inner {
                disk,
                capacity,
                frames: HashMap::new(),
                lru: VecDeque::new(),
            }),
        })
    }

    pub fn page_size(&self) -> usize {
        self.inner.borrow().disk.page_size() as usize
    }

    pub fn page_count(&self) -> u32 {
        self.inner.borrow().disk.page_count()
    }

    pub fn extend(&self) -> Result<PageId, EngineError> {
        self.inner.borrow_mut().disk.extend()
    }

    /// Pins `pid`, returning a scoped handle. Resident pages bump the pin
    /// count (removing the frame from the LRU list on the 0→1 transition).
    /// Non-resident pages occupy a free slot, or the LRU tail is evicted
    /// (flushed first if dirty). Fails with `CacheCapacity` if every frame
    /// is pinned and no slot is free.
    pub fn pin(self: &Rc<Self>, pid: PageId) -> Result<FrameHandle, EngineError> {
        let mut inner = self.inner.borrow_mut();

        if let Some(frame_ref) = inner.frames.get(&pid).cloned() {
            let was_unpinned = frame_ref.borrow().pin_count == 0;
            if was_unpinned {
                inner.lru.retain(|&p| p != pid);
            }
            frame_ref.borrow_mut().pin_count += 1;
            return Ok(FrameHandle {
                cache: self.clone(),
                page_id: pid,
                frame: frame_ref,
                dirty: false,
            });
        }

        let page_size = inner.disk.page_size() as usize;
        let frame_ref = if inner.frames.len() < inner.capacity {
            Rc::new(RefCell::new(Frame {
                page_id: pid,
                data: vec![0u8; page_size],
                dirty: false,
                pin_count: 0,
            }))
        } else {
            let victim_pid = inner
                .lru
                .pop_back()
                .ok_or(EngineError::CacheCapacity { capacity: inner.capacity })?;
            let victim_ref = inner
                .frames
                .remove(&victim_pid)
                .expect("lru and frame table out of sync");
            let (victim_dirty, victim_data) = {
                let victim = victim_ref.borrow();
                (victim.dirty, victim.data.clone())
            };
            if victim_dirty {
                inner.disk.write(victim_pid, &victim_data)?;
                debug!("cache: flushed dirty victim page {victim_pid:?} on eviction");
            }
            Rc::new(RefCell::new(Frame {
                page_id: pid,
                data: vec![0u8; page_size],
                dirty: false,
                pin_count: 0,
            }))
        };

        inner.disk.read(pid, &mut frame_ref.borrow_mut().data)?;
        frame_ref.borrow_mut().pin_count = 1;
        inner.frames.insert(pid, frame_ref.clone());

        Ok(FrameHandle {
            cache: self.clone(),
            page_id: pid,
            frame: frame_ref,
            dirty: false,
        })
    }

    fn unpin(&self, pid: PageId, dirty: bool) -> Result<(), EngineError> {
        let mut inner = self.inner.borrow_mut();
        let frame_ref = inner
            .frames
            .get(&pid)
            .cloned()
            .ok_or(EngineError::CacheUnpin(pid))?;

        {
            let mut frame = frame_ref.borrow_mut();
            if frame.pin_count == 0 {
                return Err(EngineError::CacheUnpin(pid));
            }
            frame.dirty |= dirty;
            frame.pin_count -= 1;
        }

        if frame_ref.borrow().pin_count == 0 {
            inner.lru.push_front(pid);
        }
        Ok(())
    }

    fn mark_deleted(&self, pid: PageId) {
        if let Some(frame_ref) = self.inner.borrow().frames.get(&pid).cloned() {
            frame_ref.borrow_mut().dirty = false;
        }
    }

    /// Writes every dirty frame to disk and clears its dirty flag.
    pub fn flush_all(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.borrow_mut();
        let pids: Vec<PageId> = inner.frames.keys().copied().collect();
        for pid in pids {
            let frame_ref = inner.frames.get(&pid).unwrap().clone();
            let dirty = frame_ref.borrow().dirty;
            if dirty {
                let data = frame_ref.borrow().data.clone();
                inner.disk.write(pid, &data)?;
                frame_ref.borrow_mut().dirty = false;
            }
        }
        inner.disk.flush()?;
        debug!("cache: flush_all wrote all dirty frames");
        Ok(())
    }
}

/// Scoped access to one pinned page. Unpins on drop with whatever
/// dirtiness was accumulated through `with_bytes_mut`/`mark_deleted`.
/// Move-only: there is deliberately no `Clone` impl, matching the "one pin,
/// one owner" discipline the B+-tree descent relies on.
pub struct FrameHandle {
    cache: Rc<PageCache>,
    page_id: PageId,
    frame: FrameRef,
    dirty: bool,
}

impl FrameHandle {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page_size(&self) -> usize {
        self.frame.borrow().data.len()
    }

    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.frame.borrow().data)
    }

    pub fn with_bytes_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.dirty = true;
        f(&mut self.frame.borrow_mut().data)
    }

    /// Marks the page logically deleted: clears the dirty bit so eviction
    /// or `flush_all` does not write a now-freed page back to disk.
    pub fn mark_deleted(&mut self) {
        self.dirty = false;
        self.cache.mark_deleted(self.page_id);
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        let _ = self.cache.unpin(self.page_id, self.dirty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn cache_with(capacity: usize, pages: u32) -> Rc<PageCache> {
        let tmp = NamedTempFile::new().unwrap();
        let mut disk = DiskManager::open(tmp.path(), 0, 64).unwrap();
        for _ in 0..pages {
            disk.extend().unwrap();
        }
        PageCache::new(disk, capacity)
    }

    #[test]
    fn pin_then_write_then_flush_round_trips() {
        let cache = cache_with(4, 1);
        {
            let mut h = cache.pin(PageId(0)).unwrap();
            h.with_bytes_mut(|b| b[0] = 42);
        }
        cache.flush_all().unwrap();

        let h = cache.pin(PageId(0)).unwrap();
        h.with_bytes(|b| assert_eq!(b[0], 42));
    }

    #[test]
    fn evicts_lru_unpinned_frame() {
        let cache = cache_with(2, 3);
        let h0 = cache.pin(PageId(0)).unwrap();
        let h1 = cache.pin(PageId(1)).unwrap();
        drop(h0);
        drop(h1);
        // both unpinned, page 0 evicted first (it was unpinned first)
        let _h2 = cache.pin(PageId(2)).unwrap();
        // page 0 should be evictable again without erroring
        let _h0_again = cache.pin(PageId(0)).unwrap();
    }

    #[test]
    fn capacity_error_when_all_pinned() {
        let cache = cache_with(2, 3);
        let _h0 = cache.pin(PageId(0)).unwrap();
        let _h1 = cache.pin(PageId(1)).unwrap();
        assert!(matches!(
            cache.pin(PageId(2)),
            Err(EngineError::CacheCapacity { .. })
        ));
    }
}
