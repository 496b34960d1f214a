//! # Storage Module
//!
//! This module provides the foundational storage layer for LeafDB: a single
//! database file, memory-mapped read/write, carved into fixed-size pages.
//!
//! ## Architecture Overview
//!
//! The file is an array of pages. A page's byte offset is simply
//! `page_id * page_size`; there is no indirection table. Pages 0 and 1 are
//! the two meta pages that alternate per commit; every other page carries
//! tree nodes, bucket headers, freelist spill, or overflow value payload.
//!
//! ```text
//! Offset 0:              Meta page 0
//! Offset page_size:      Meta page 1
//! Offset 2*page_size:    Data pages ...
//! ```
//!
//! ## Copy-on-Write Discipline
//!
//! Committed pages are never mutated in place. A write transaction buffers
//! every page it produces in a private dirty map and only copies them into
//! the mapping at commit, before the meta page flips. Readers therefore see
//! a stable tree for the lifetime of their snapshot, and a torn commit is
//! recovered by falling back to the other meta page.
//!
//! ## The PageStore Seam
//!
//! The B+ tree, bucket, and overflow layers never touch the mapping
//! directly. They operate against the [`PageStore`] capability set, which
//! the per-transaction pager implements with dirty-map buffering. Tests
//! implement it with a plain in-memory map.
//!
//! ## Module Organization
//!
//! - `mmap`: file handle + writable shared mapping (`MmapFile`)
//! - `meta`: meta-page codec and live-meta selection
//! - `node`: byte-level leaf/branch page codec
//! - `freelist`: freelist-page codec, pending-free accounting, spill planning
//! - `overflow`: large-value page chains

pub mod freelist;
pub mod meta;
pub mod mmap;
pub mod node;
pub mod overflow;

use std::borrow::Cow;

use crate::error::Result;

/// Page identifier. Byte offset in the file is `id * page_size`.
pub type PageId = u64;

/// Monotonic per-commit transaction identifier.
pub type TxId = u64;

/// Page size used when creating a new database file. Persisted in the meta
/// page; a file whose meta records a different size is rejected at open.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// First meta page. Never allocated, freed, or reused.
pub const META_PAGE_0: PageId = 0;

/// Second meta page. Never allocated, freed, or reused.
pub const META_PAGE_1: PageId = 1;

/// Kind tag stored in the first byte of every non-meta page.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Leaf = 1,
    Branch = 2,
    Bucket = 3,
    Freelist = 4,
    Overflow = 5,
}

impl PageKind {
    pub fn from_byte(b: u8) -> Option<PageKind> {
        match b {
            1 => Some(PageKind::Leaf),
            2 => Some(PageKind::Branch),
            3 => Some(PageKind::Bucket),
            4 => Some(PageKind::Freelist),
            5 => Some(PageKind::Overflow),
            _ => None,
        }
    }
}

/// Per-transaction page access capability.
///
/// Two implementations exist: the transaction pager, which buffers writes in
/// a dirty map over the shared mapping, and the in-memory test double. The
/// tree layers are generic over this trait so their behavior can be tested
/// without a database file.
pub trait PageStore {
    fn page_size(&self) -> usize;

    /// Returns the current contents of a page. For a writable store this is
    /// the transaction's dirty copy when one exists.
    fn read_page(&self, id: PageId) -> Result<Cow<'_, [u8]>>;

    /// Buffers a full page image. `buf` must be exactly `page_size` bytes.
    fn write_page(&mut self, id: PageId, buf: &[u8]) -> Result<()>;

    /// Allocates a page id, reusing a free page when one is available.
    fn alloc_page(&mut self) -> PageId;

    /// Schedules a page for reclamation. Meta pages are never freed.
    fn free_page(&mut self, id: PageId);
}
