//! # Per-Transaction Pager
//!
//! Every transaction owns a `TxPager` bound to the meta snapshot it began
//! on. Reads resolve through the transaction's dirty map first, then copy
//! out of the shared mapping under a short shared acquisition of the
//! mapping latch. Writes never touch the mapping until commit: they land
//! in the dirty map, invisible to every reader.
//!
//! ## Commit Pipeline
//!
//! ```text
//! 1. Take the meta latch exclusively: reclamation and publish must not
//!    interleave with a reader registering on the old meta.
//! 2. Plan the freelist: partition pending frees against the minimum
//!    active reader TxID, merge in the snapshot's remaining inline ids,
//!    the old overflow chain's contents, and the old chain pages
//!    themselves, then lay the result out as inline prefix + chain. Chain
//!    pages are buffered through the dirty map like any other page.
//! 3. Under the exclusive mapping latch: grow the file to cover the
//!    highest touched page, copy every dirty page into the mapping, and
//!    msync, so all data precedes the meta flip on its way to the device.
//! 4. Write the new meta (TxID + 1) into the slot the old meta does not
//!    occupy, msync again, then fdatasync.
//! 5. Publish the new meta and the surviving pending entries, release the
//!    latches.
//! ```
//!
//! A failure anywhere before step 4 completes leaves the old meta intact
//! on disk; the transaction is reported failed and the database state is
//! unchanged.

use std::borrow::Cow;

use hashbrown::HashMap;

use crate::db::{load_chain, Db};
use crate::error::{Error, Result};
use crate::storage::freelist::{self, PendingFree};
use crate::storage::meta::Meta;
use crate::storage::{meta, PageId, PageStore, TxId, META_PAGE_0, META_PAGE_1};

pub(crate) struct TxPager<'db> {
    db: &'db Db,
    writable: bool,
    page_size: usize,
    /// Root of the top-level bucket index tree. Updated in place as the
    /// transaction rewrites it; published to meta at commit.
    pub(crate) root: PageId,
    /// Snapshot TxID this transaction reads at.
    pub(crate) txid: TxId,
    next_page: PageId,
    freelist: Vec<PageId>,
    pending: Vec<PageId>,
    dirty: HashMap<PageId, Vec<u8>>,
    max_page: PageId,
}

impl<'db> TxPager<'db> {
    pub fn new(db: &'db Db, writable: bool, meta: Meta) -> Self {
        let max_page = meta.next_page.saturating_sub(1);
        TxPager {
            db,
            writable,
            page_size: db.page_size,
            root: meta.root,
            txid: meta.txid,
            next_page: meta.next_page,
            freelist: meta.freelist,
            pending: Vec::new(),
            dirty: HashMap::new(),
            max_page,
        }
    }

    fn alloc_from_end(&mut self) -> PageId {
        let id = self.next_page;
        self.next_page += 1;
        self.max_page = self.max_page.max(id);
        id
    }

    pub fn commit(&mut self) -> Result<()> {
        debug_assert!(self.writable);
        let page_size = self.page_size;
        let mut meta_state = self.db.meta.write();

        let new_txid = self.txid + 1;
        let min_read = self.db.min_reader_txid();
        let threshold = freelist::reuse_threshold(new_txid, min_read);
        let own_frees = std::mem::take(&mut self.pending);
        let mut pending: Vec<PendingFree> = self.db.pending.lock().clone();
        pending.extend(own_frees.iter().map(|&page| PendingFree {
            txid: new_txid,
            page,
        }));
        let (reusable, remaining) = freelist::partition_reusable(pending, min_read, threshold);

        // The new freelist: snapshot inline remainder, newly reusable
        // pages, the old overflow chain's contents, and the chain pages
        // themselves (unreferenced once the meta flips).
        let (old_chain_pages, old_chain_ids) = {
            let map = self.db.mapping.read();
            load_chain(&map, meta_state.meta.freelist_page, page_size)?
        };
        let mut free = std::mem::take(&mut self.freelist);
        free.extend(reusable);
        free.extend(old_chain_ids);
        free.extend(old_chain_pages.iter().copied());

        // Pages the old meta still depends on must not host the new chain:
        // the old chain pages, and everything this transaction freed (a
        // page replaced by copy-on-write stays part of the old tree until
        // the flip). Overwriting either before the flip would break
        // torn-commit recovery.
        let mut protected = old_chain_pages.clone();
        protected.extend(own_frees);

        let plan = freelist::plan_spill(free, &protected, page_size, &mut || {
            let id = self.next_page;
            self.next_page += 1;
            self.max_page = self.max_page.max(id);
            id
        });
        let freelist_page = plan.head();
        for (i, &host) in plan.hosts.iter().enumerate() {
            let next = plan.hosts.get(i + 1).copied().unwrap_or(0);
            let buf = freelist::encode_page(page_size, next, &plan.chunks[i])?;
            self.write_page(host, &buf)?;
        }

        let new_meta = Meta {
            txid: new_txid,
            root: self.root,
            next_page: self.next_page,
            freelist_page,
            freelist: plan.inline,
        };

        {
            let mut map = self.db.mapping.write();
            let required = (self.max_page + 1) * page_size as u64;
            if required > map.len() {
                map.grow(required)?;
            }
            for (&id, buf) in &self.dirty {
                map.page_mut(id)?.copy_from_slice(buf);
            }
            map.sync()?;

            let slot = if meta_state.page == META_PAGE_0 {
                META_PAGE_1
            } else {
                META_PAGE_0
            };
            meta::encode(map.page_mut(slot)?, &new_meta, page_size)?;
            map.sync()?;
            map.sync_data()?;

            tracing::debug!(txid = new_txid, pages = self.dirty.len(), "commit");
            meta_state.meta = new_meta;
            meta_state.page = slot;
        }
        *self.db.pending.lock() = remaining;
        self.dirty.clear();
        Ok(())
    }

    /// Drops buffered pages and pending frees. Nothing reached the file,
    /// so there is nothing else to undo.
    pub fn rollback(&mut self) {
        self.dirty.clear();
        self.pending.clear();
    }
}

impl PageStore for TxPager<'_> {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, id: PageId) -> Result<Cow<'_, [u8]>> {
        if self.writable {
            if let Some(buf) = self.dirty.get(&id) {
                return Ok(Cow::Borrowed(buf.as_slice()));
            }
        }
        let map = self.db.mapping.read();
        Ok(Cow::Owned(map.page(id)?.to_vec()))
    }

    fn write_page(&mut self, id: PageId, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::TxReadOnly);
        }
        if buf.len() != self.page_size {
            return Err(Error::Corruption("page buffer size mismatch"));
        }
        self.dirty.insert(id, buf.to_vec());
        self.max_page = self.max_page.max(id);
        Ok(())
    }

    fn alloc_page(&mut self) -> PageId {
        if let Some(id) = self.freelist.pop() {
            self.max_page = self.max_page.max(id);
            return id;
        }
        self.alloc_from_end()
    }

    fn free_page(&mut self, id: PageId) {
        debug_assert!(
            id != META_PAGE_0 && id != META_PAGE_1,
            "attempted to free a meta page"
        );
        if id == META_PAGE_0 || id == META_PAGE_1 {
            return;
        }
        self.pending.push(id);
    }
}
