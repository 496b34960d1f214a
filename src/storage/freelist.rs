//! # Freelist Management
//!
//! Pages freed by committed transactions are recycled rather than leaked,
//! but only once no live reader can still reach them. This module owns the
//! two halves of that story:
//!
//! - **Pending-free accounting.** Every page freed by a transaction is
//!   stamped with the committing TxID. An entry `(t, p)` is promoted to the
//!   reusable freelist only when `t` is below every active reader's
//!   snapshot TxID; until then the page keeps its old contents so readers
//!   bound to earlier metas stay consistent.
//! - **Freelist persistence.** The reusable set is stored inline in the
//!   meta page while it fits; past the inline capacity it spills into a
//!   chain of dedicated freelist pages linked by a next pointer.
//!
//! ## Freelist Page Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ----------------------------------------
//! 0       1     kind (4)
//! 1       2     entry_count (u16 LE)
//! 3       8     next freelist page id (0 = none)
//! 11      8*N   free page ids
//! ```
//!
//! ## Spill Planning
//!
//! Pages that will *hold* the chain are taken from the tail of the freelist
//! itself (they remove themselves from the stored set), falling back to
//! fresh allocations from the end of the file. The previous chain's pages
//! are excluded as hosts: they stay referenced by the old meta until the
//! flip, so overwriting them before the flip would break torn-commit
//! recovery.

use hashbrown::HashSet;
use zerocopy::little_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{PageId, PageKind, TxId};
use crate::error::{Error, Result};

pub const FREELIST_HEADER_SIZE: usize = 11;

/// Free page ids one freelist page can hold.
pub fn page_capacity(page_size: usize) -> usize {
    (page_size - FREELIST_HEADER_SIZE) / 8
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct FreelistHeader {
    kind: u8,
    entry_count: U16,
    next: U64,
}

const _: () = assert!(size_of::<FreelistHeader>() == FREELIST_HEADER_SIZE);

/// A page freed by the transaction that committed `txid`, not yet safe to
/// reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingFree {
    pub txid: TxId,
    pub page: PageId,
}

pub fn encode_page(page_size: usize, next: PageId, ids: &[PageId]) -> Result<Vec<u8>> {
    if ids.len() > page_capacity(page_size) {
        return Err(Error::Corruption("freelist page overflow"));
    }

    let mut buf = vec![0u8; page_size];
    let header = FreelistHeader {
        kind: PageKind::Freelist as u8,
        entry_count: U16::new(ids.len() as u16),
        next: U64::new(next),
    };
    buf[..FREELIST_HEADER_SIZE].copy_from_slice(header.as_bytes());

    let mut pos = FREELIST_HEADER_SIZE;
    for id in ids {
        buf[pos..pos + 8].copy_from_slice(&id.to_le_bytes());
        pos += 8;
    }
    Ok(buf)
}

/// Decodes one freelist page into its next pointer and free ids.
pub fn decode_page(buf: &[u8]) -> Result<(PageId, Vec<PageId>)> {
    if buf.len() < FREELIST_HEADER_SIZE {
        return Err(Error::Corruption("short freelist page"));
    }
    let header = FreelistHeader::ref_from_bytes(&buf[..FREELIST_HEADER_SIZE])
        .map_err(|_| Error::Corruption("unreadable freelist header"))?;
    if header.kind != PageKind::Freelist as u8 {
        return Err(Error::Corruption("page kind mismatch"));
    }

    let count = header.entry_count.get() as usize;
    if FREELIST_HEADER_SIZE + count * 8 > buf.len() {
        return Err(Error::Corruption("freelist page overflow"));
    }

    let mut ids = Vec::with_capacity(count);
    let mut pos = FREELIST_HEADER_SIZE;
    for _ in 0..count {
        ids.push(u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap()));
        pos += 8;
    }
    Ok((header.next.get(), ids))
}

/// Reuse threshold for a commit producing `new_txid`: with active readers
/// the threshold is the minimum reader TxID, otherwise everything pending
/// (including this commit's own frees) is reclaimable.
pub fn reuse_threshold(new_txid: TxId, min_read: Option<TxId>) -> TxId {
    match min_read {
        Some(min_read) => min_read,
        None => new_txid + 1,
    }
}

/// Splits pending entries into pages reusable now and entries that must
/// keep waiting for a reader to finish.
pub fn partition_reusable(
    pending: Vec<PendingFree>,
    min_read: Option<TxId>,
    threshold: TxId,
) -> (Vec<PageId>, Vec<PendingFree>) {
    let mut reusable = Vec::new();
    let mut remaining = Vec::new();
    for entry in pending {
        let reader_safe = match min_read {
            Some(min_read) => entry.txid < min_read,
            None => true,
        };
        if entry.txid < threshold && reader_safe {
            reusable.push(entry.page);
        } else {
            remaining.push(entry);
        }
    }
    (reusable, remaining)
}

/// How a commit's freelist is laid out on disk: an inline prefix in the
/// meta page and, when that overflows, chunks chained across host pages.
#[derive(Debug, PartialEq, Eq)]
pub struct SpillPlan {
    pub inline: Vec<PageId>,
    pub hosts: Vec<PageId>,
    pub chunks: Vec<Vec<PageId>>,
}

impl SpillPlan {
    /// Head of the overflow chain, 0 when everything fits inline.
    pub fn head(&self) -> PageId {
        self.hosts.first().copied().unwrap_or(0)
    }
}

/// Plans the on-disk layout of `free`. Host pages for the overflow chain
/// are consumed from the tail of `free` itself, skipping `protected` (the
/// old chain's pages); when the tail cannot supply enough hosts the
/// remainder comes from `alloc_from_end`.
pub fn plan_spill(
    mut free: Vec<PageId>,
    protected: &[PageId],
    page_size: usize,
    alloc_from_end: &mut dyn FnMut() -> PageId,
) -> SpillPlan {
    let inline_cap = super::meta::inline_capacity(page_size);
    if free.len() <= inline_cap {
        return SpillPlan {
            inline: free,
            hosts: Vec::new(),
            chunks: Vec::new(),
        };
    }

    let per_page = page_capacity(page_size);
    let overflow_count = free.len() - inline_cap;
    // Each host page both stores per_page ids and removes itself from the
    // stored set, hence the ceil over per_page + 1.
    let hosts_needed = (overflow_count + per_page) / (per_page + 1);

    let protected: HashSet<PageId> = protected.iter().copied().collect();
    let mut hosts = Vec::with_capacity(hosts_needed);
    let mut selected = HashSet::with_capacity(hosts_needed);
    for &id in free.iter().rev() {
        if hosts.len() == hosts_needed {
            break;
        }
        if protected.contains(&id) || selected.contains(&id) {
            continue;
        }
        hosts.push(id);
        selected.insert(id);
    }
    while hosts.len() < hosts_needed {
        hosts.push(alloc_from_end());
    }

    if !selected.is_empty() {
        free.retain(|id| !selected.contains(id));
    }

    let inline_len = inline_cap.min(free.len());
    let overflow: Vec<PageId> = free.split_off(inline_len);
    let mut chunks: Vec<Vec<PageId>> = overflow.chunks(per_page).map(|c| c.to_vec()).collect();

    // Hosts taken from the tail shrink the stored set, fresh hosts do not,
    // so the initial estimate can land on either side of the final chunk
    // count. Every host must be written as a chain page and every chunk
    // must have a host.
    while chunks.len() > hosts.len() {
        hosts.push(alloc_from_end());
    }
    while chunks.len() < hosts.len() {
        chunks.push(Vec::new());
    }

    SpillPlan {
        inline: free,
        hosts,
        chunks,
    }
}
