//! Composes the disk manager, page cache, and free list into the single
//! entry point the B+-tree pins pages through.

use std::path::Path;
use std::rc::Rc;

use log::info;

use crate::cache::{FrameHandle, PageCache};
use crate::disk::DiskManager;
use crate::error::EngineError;
use crate::freelist::FreeList;
use crate::page::PageId;

pub struct FrameManager {
    cache: Rc<PageCache>,
    free_list: FreeList,
}

impl FrameManager {
    pub fn open(
        path: &Path,
        base_offset: u64,
        page_size: u32,
        cache_capacity: usize,
        first_free_list_block: PageId,
    ) -> Result<Self, EngineError> {
        let disk = DiskManager::open(path, base_offset, page_size)?;
        let cache = PageCache::new(disk, cache_capacity);
        let free_list = FreeList::new(cache.clone(), first_free_list_block);
        info!("frame manager opened {path:?} (page_size={page_size}, cache_capacity={cache_capacity})");
        Ok(FrameManager { cache, free_list })
    }

    /// Assembles a frame manager from an already-open cache and free list.
    /// Used where the caller wants to share a cache across more than one
    /// B+-tree (tables plus the catalog) without reopening the disk file.
    pub fn from_parts(cache: Rc<PageCache>, free_list: FreeList) -> Self {
        FrameManager { cache, free_list }
    }

    pub fn pin(&self, pid: PageId) -> Result<FrameHandle, EngineError> {
        self.cache.pin(pid)
    }

    /// Returns a pinned frame for a fresh page: reused from the free list
    /// if one is available, else obtained by extending the disk.
    pub fn allocate(&mut self) -> Result<FrameHandle, EngineError> {
        let pid = match self.free_list.pop()? {
            Some(pid) => pid,
            None => self.cache.extend()?,
        };
        self.cache.pin(pid)
    }

    /// Returns `pid` to the free list. The caller must have already marked
    /// any held frame handle for `pid` deleted (see [`FrameHandle::mark_deleted`])
    /// so no stale write-back races with the page's second life.
    pub fn deallocate(&mut self, pid: PageId) -> Result<(), EngineError> {
        self.free_list.push(pid)
    }

    pub fn flush_all(&self) -> Result<(), EngineError> {
        self.cache.flush_all()
    }

    pub fn page_count(&self) -> u32 {
        self.cache.page_count()
    }

    pub fn first_free_list_block(&self) -> PageId {
        self.free_list.head()
    }

    pub fn page_size(&self) -> usize {
        self.cache.page_size()
    }
}
