//! Fixed-size page I/O against a single random-access file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::error::EngineError;
use crate::page::PageId;

#[derive(Debug)]
pub struct DiskManager {
    file: File,
    base_offset: u64,
    page_size: u32,
    page_count: u32,
}

impl DiskManager {
    /// Opens `path`, creating it if absent. `base_offset` is the number of
    /// header bytes preceding page 0. Validates that the file's length is
    /// exactly `base_offset + page_size * page_count`; a fresh (empty,
    /// zero-length) file is accepted with `page_count = 0`.
    pub fn open(path: &Path, base_offset: u64, page_size: u32) -> Result<Self, EngineError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| EngineError::Disk {
                expected: 0,
                actual: e.raw_os_error().unwrap_or(-1) as u64,
            })?;
        let actual_len = file.metadata().map(|m| m.len()).unwrap_or(0);

        let page_count = if actual_len <= base_offset {
            0
        } else {
            let data_len = actual_len - base_offset;
            (data_len / page_size as u64) as u32
        };
        let expected = base_offset + page_size as u64 * page_count as u64;
        if expected != actual_len {
            return Err(EngineError::Disk {
                expected,
                actual: actual_len,
            });
        }

        Ok(DiskManager {
            file,
            base_offset,
            page_size,
            page_count,
        })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    fn offset_of(&self, pid: PageId) -> u64 {
        self.base_offset + pid.0 as u64 * self.page_size as u64
    }

    fn check_resident(&self, pid: PageId) -> Result<(), EngineError> {
        if pid.0 >= self.page_count {
            return Err(EngineError::Disk {
                expected: (pid.0 as u64 + 1) * self.page_size as u64 + self.base_offset,
                actual: self.base_offset + self.page_count as u64 * self.page_size as u64,
            });
        }
        Ok(())
    }

    pub fn read(&mut self, pid: PageId, dst: &mut [u8]) -> Result<(), EngineError> {
        self.check_resident(pid)?;
        debug_assert_eq!(dst.len(), self.page_size as usize);
        self.file
            .seek(SeekFrom::Start(self.offset_of(pid)))
            .map_err(|_| EngineError::Disk {
                expected: self.offset_of(pid),
                actual: 0,
            })?;
        self.file.read_exact(dst).map_err(|_| EngineError::Disk {
            expected: dst.len() as u64,
            actual: 0,
        })?;
        Ok(())
    }

    pub fn write(&mut self, pid: PageId, src: &[u8]) -> Result<(), EngineError> {
        self.check_resident(pid)?;
        debug_assert_eq!(src.len(), self.page_size as usize);
        self.file
            .seek(SeekFrom::Start(self.offset_of(pid)))
            .map_err(|_| EngineError::Disk {
                expected: self.offset_of(pid),
                actual: 0,
            })?;
        self.file.write_all(src).map_err(|_| EngineError::Disk {
            expected: src.len() as u64,
            actual: 0,
        })?;
        Ok(())
    }

    /// Appends one zero-filled page, bumping `page_count`, and returns its id.
    pub fn extend(&mut self) -> Result<PageId, EngineError> {
        let pid = PageId(self.page_count);
        let zeros = vec![0u8; self.page_size as usize];
        self.file
            .seek(SeekFrom::End(0))
            .map_err(|_| EngineError::Disk {
                expected: 0,
                actual: 0,
            })?;
        self.file.write_all(&zeros).map_err(|_| EngineError::Disk {
            expected: zeros.len() as u64,
            actual: 0,
        })?;
        self.page_count += 1;
        debug!("disk: extended to {} pages", self.page_count);
        Ok(pid)
    }

    pub fn flush(&mut self) -> Result<(), EngineError> {
        self.file.flush().map_err(|_| EngineError::Disk {
            expected: 0,
            actual: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn extends_and_round_trips_a_page() {
        let tmp = NamedTempFile::new().unwrap();
        let mut disk = DiskManager::open(tmp.path(), 16, 64).unwrap();
        assert_eq!(disk.page_count(), 0);

        let pid = disk.extend().unwrap();
        assert_eq!(pid, PageId(0));
        assert_eq!(disk.page_count(), 1);

        let mut page = vec![7u8; 64];
        disk.write(pid, &page).unwrap();
        page.fill(0);
        disk.read(pid, &mut page).unwrap();
        assert!(page.iter().all(|&b| b == 7));
    }

    #[test]
    fn rejects_reads_past_page_count() {
        let tmp = NamedTempFile::new().unwrap();
        let mut disk = DiskManager::open(tmp.path(), 0, 64).unwrap();
        let mut buf = vec![0u8; 64];
        assert!(matches!(
            disk.read(PageId(0), &mut buf),
            Err(EngineError::Disk { .. })
        ));
    }
}
