//! # Memory-Mapped File Storage
//!
//! This module implements `MmapFile`, the owner of the database file handle
//! and of a writable shared memory mapping covering the whole file.
//!
//! ## Design Philosophy
//!
//! Traditional database systems copy page data between kernel buffers and a
//! user-space page cache. Memory-mapped I/O eliminates this copy by mapping
//! the file directly into the process address space; the OS page cache is
//! the page cache.
//!
//! ## Safety Considerations
//!
//! Memory-mapped regions become invalid when the file grows and is remapped.
//! LeafDB keeps every reference into the mapping inside a single borrow of
//! `MmapFile`:
//!
//! ```text
//! page(&self) -> &[u8]              // Immutable borrow of self
//! page_mut(&mut self) -> &mut [u8]  // Mutable borrow of self
//! grow(&mut self)                   // Mutable borrow (exclusive)
//! ```
//!
//! Since `grow()` requires `&mut self`, the compiler ensures no page
//! references exist when the mapping is replaced. The database wraps
//! `MmapFile` in an `RwLock`, which extends the same rule across threads:
//! readers copy page bytes out under a shared acquisition, growth happens
//! under the exclusive one, and no pointer into the mapping ever outlives
//! a lock scope.
//!
//! ## Durability
//!
//! `sync()` forces an msync of the mapping so dirty pages reach the device
//! cache; `sync_data()` issues fdatasync on the file for the final
//! durability point of a commit.

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{Error, Result};

/// Number of pages a freshly created database file is sized to:
/// two meta pages plus one root leaf.
pub const INITIAL_PAGE_COUNT: u64 = 3;

#[derive(Debug)]
pub struct MmapFile {
    file: std::fs::File,
    map: MmapMut,
    page_size: usize,
}

impl MmapFile {
    /// Opens the database file at `path`, creating it (mode 0o644) if absent.
    /// An empty file is sized to [`INITIAL_PAGE_COUNT`] pages; the returned
    /// flag is true in that case and the caller is expected to initialize
    /// the meta pages and root leaf.
    pub fn open(path: &Path, page_size: usize) -> Result<(Self, bool)> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let file = options.open(path)?;

        let len = file.metadata()?.len();
        let created = len == 0;
        if created {
            file.set_len(INITIAL_PAGE_COUNT * page_size as u64)?;
        } else if len < 2 * page_size as u64 {
            return Err(Error::Corruption("database file smaller than two pages"));
        }

        // SAFETY: MmapMut::map_mut is unsafe because a memory-mapped file can
        // be modified externally, leading to undefined behavior. This is safe
        // because:
        // 1. The file is opened read+write and owned by this process; the
        //    engine does not support multi-process access to one file.
        // 2. The mmap lifetime is tied to MmapFile, preventing use-after-unmap.
        // 3. All access goes through page()/page_mut(), which bounds-check
        //    the page id against the mapped length.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok((
            Self {
                file,
                map,
                page_size,
            },
            created,
        ))
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    fn page_bounds(&self, id: u64) -> Option<(usize, usize)> {
        let start = id.checked_mul(self.page_size as u64)?;
        let end = start.checked_add(self.page_size as u64)?;
        if end > self.map.len() as u64 {
            return None;
        }
        Some((start as usize, end as usize))
    }

    pub fn page(&self, id: u64) -> Result<&[u8]> {
        let (start, end) = self
            .page_bounds(id)
            .ok_or(Error::Corruption("page read out of bounds"))?;
        Ok(&self.map[start..end])
    }

    pub fn page_mut(&mut self, id: u64) -> Result<&mut [u8]> {
        let (start, end) = self
            .page_bounds(id)
            .ok_or(Error::Corruption("page write out of bounds"))?;
        Ok(&mut self.map[start..end])
    }

    /// Extends the file to `new_len` bytes and remaps. No-op if the file is
    /// already at least that long.
    pub fn grow(&mut self, new_len: u64) -> Result<()> {
        if new_len <= self.map.len() as u64 {
            return Ok(());
        }

        self.map.flush_async()?;
        self.file.set_len(new_len)?;

        // SAFETY: the old mmap becomes invalid here. This is safe because:
        // 1. grow() takes &mut self, so no page references exist (borrow
        //    checker locally, the mapping RwLock across threads).
        // 2. The old mapping was flushed above before being dropped.
        // 3. The file was extended to new_len before remapping.
        self.map = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(())
    }

    /// msync: flush dirty mapped pages to the device cache.
    pub fn sync(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }

    /// fdatasync on the underlying file.
    pub fn sync_data(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
