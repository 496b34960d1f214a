//! # Database Handle
//!
//! `Db` owns the file, the mapping, and the four pieces of shared state the
//! concurrency model is built from:
//!
//! - **Writer latch** (`Mutex<()>`): held by a writable transaction from
//!   begin through commit or rollback. Single writer, always.
//! - **Mapping latch** (`RwLock<MmapFile>`): page reads take short shared
//!   acquisitions and copy bytes out; growth and the commit flush take the
//!   exclusive side. No pointer into the mapping survives a lock scope, so
//!   remap can never invalidate a live reference.
//! - **Meta latch** (`RwLock<MetaState>`): publishes the live
//!   `(meta, slot)` pair atomically. Begin snapshots under the shared
//!   side; a committing writer holds the exclusive side from freelist
//!   planning through publish so reader registration and page reclamation
//!   cannot interleave.
//! - **Reader table** (`Mutex<BTreeMap<TxId, usize>>`): multiset of active
//!   reader snapshot TxIDs; its minimum bounds which pending frees may be
//!   recycled.
//!
//! ## Open and Recovery
//!
//! Opening an existing file reads both meta pages and adopts the valid one
//! with the higher TxID. A commit interrupted between writing data pages
//! and completing the meta flip leaves the newer slot torn; the older slot
//! still describes a complete, untouched tree, so recovery is selection,
//! not repair. A fresh file is sized to three pages: both meta slots plus
//! an empty top-level index leaf.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::storage::freelist::{self, PendingFree};
use crate::storage::meta::{self, Meta};
use crate::storage::mmap::MmapFile;
use crate::storage::{
    node, PageId, TxId, DEFAULT_PAGE_SIZE, META_PAGE_0, META_PAGE_1,
};
use crate::tx::Tx;

pub(crate) struct MetaState {
    pub meta: Meta,
    /// Slot the live meta occupies; the next commit writes the other one.
    pub page: PageId,
}

/// An open database. Cheap to share across threads; all mutation goes
/// through transactions.
pub struct Db {
    pub(crate) page_size: usize,
    pub(crate) mapping: RwLock<MmapFile>,
    pub(crate) writer: Mutex<()>,
    pub(crate) meta: RwLock<MetaState>,
    pub(crate) readers: Mutex<BTreeMap<TxId, usize>>,
    pub(crate) pending: Mutex<Vec<PendingFree>>,
}

impl Db {
    /// Opens the database at `path`, creating the file if it does not
    /// exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Db> {
        let path = path.as_ref();
        let page_size = DEFAULT_PAGE_SIZE;
        let (mut map, created) = MmapFile::open(path, page_size)?;

        let state = if created {
            let root: PageId = 2;
            let leaf = node::encode_leaf(page_size, 0, &[])?;
            map.page_mut(root)?.copy_from_slice(&leaf);

            let meta = Meta {
                txid: 0,
                root,
                next_page: 3,
                freelist_page: 0,
                freelist: Vec::new(),
            };
            meta::encode(map.page_mut(META_PAGE_0)?, &meta, page_size)?;
            meta::encode(map.page_mut(META_PAGE_1)?, &meta, page_size)?;
            map.sync()?;
            map.sync_data()?;
            tracing::debug!(path = %path.display(), "created database");
            MetaState {
                meta,
                page: META_PAGE_0,
            }
        } else {
            let (meta, page) = {
                let page0 = map.page(META_PAGE_0)?;
                let page1 = map.page(META_PAGE_1)?;
                meta::pick_live(page0, page1, page_size)?
            };
            tracing::debug!(path = %path.display(), txid = meta.txid, "opened database");
            MetaState { meta, page }
        };

        Ok(Db {
            page_size,
            mapping: RwLock::new(map),
            writer: Mutex::new(()),
            meta: RwLock::new(state),
            readers: Mutex::new(BTreeMap::new()),
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Begins a writable transaction, blocking until the writer latch is
    /// available.
    pub fn begin_write(&self) -> Result<Tx<'_>> {
        let guard = self.writer.lock();
        let meta = self.meta.read().meta.clone();
        Ok(Tx::new_write(self, guard, meta))
    }

    /// Begins a read-only transaction bound to the current snapshot.
    pub fn begin_read(&self) -> Result<Tx<'_>> {
        // Registration happens under the meta latch so a concurrent commit
        // either sees this reader before reclaiming pages or publishes
        // first and the reader snapshots the newer meta.
        let state = self.meta.read();
        let meta = state.meta.clone();
        *self.readers.lock().entry(meta.txid).or_insert(0) += 1;
        drop(state);
        Ok(Tx::new_read(self, meta))
    }

    /// Runs `f` inside a read-only transaction.
    pub fn read<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T>) -> Result<T> {
        let tx = self.begin_read()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback();
                Err(e)
            }
        }
    }

    /// Runs `f` inside a writable transaction, committing if it returns
    /// `Ok` and rolling back otherwise.
    pub fn write<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T>) -> Result<T> {
        let tx = self.begin_write()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback();
                Err(e)
            }
        }
    }

    /// Flushes the mapping and closes the database. Committed data is
    /// already durable; this is a final belt-and-braces sync before the
    /// file handle drops.
    pub fn close(self) -> Result<()> {
        let map = self.mapping.read();
        map.sync()?;
        map.sync_data()?;
        Ok(())
    }

    pub(crate) fn min_reader_txid(&self) -> Option<TxId> {
        self.readers.lock().keys().next().copied()
    }

    pub(crate) fn unregister_reader(&self, txid: TxId) {
        let mut readers = self.readers.lock();
        if let Some(count) = readers.get_mut(&txid) {
            *count -= 1;
            if *count == 0 {
                readers.remove(&txid);
            }
        }
    }
}

/// Walks a freelist chain in the mapping, returning the chain's own page
/// ids and the free ids stored across it.
pub(crate) fn load_chain(
    map: &MmapFile,
    head: PageId,
    page_size: usize,
) -> Result<(Vec<PageId>, Vec<PageId>)> {
    let mut chain_pages = Vec::new();
    let mut ids = Vec::new();
    let limit = map.len() / page_size as u64 + 1;
    let mut page_id = head;
    while page_id != 0 {
        if chain_pages.len() as u64 > limit {
            return Err(crate::error::Error::Corruption("freelist chain loop"));
        }
        let (next, chunk) = freelist::decode_page(map.page(page_id)?)?;
        chain_pages.push(page_id);
        ids.extend(chunk);
        page_id = next;
    }
    Ok((chain_pages, ids))
}
