//! # Transactions
//!
//! LeafDB follows a single-writer / multi-reader model. A writable
//! transaction holds the database's writer latch for its whole lifetime; a
//! read-only transaction registers its snapshot TxID in the reader table so
//! page reclamation never recycles pages its snapshot can still reach.
//!
//! ## Lifecycle
//!
//! ```text
//! begin ────> Open ────> commit() ────> Committed
//!               │
//!               └──────> rollback() / drop ────> RolledBack
//! ```
//!
//! Terminal states are final: any operation on a finalized transaction
//! fails with `TxClosed`. Dropping an open transaction rolls it back, so
//! the writer latch and reader registration are released on every exit
//! path.
//!
//! ## Handles and Interior Mutability
//!
//! Bucket and cursor handles borrow the transaction immutably; the pager
//! (dirty map, allocation state) lives in a `RefCell` and is borrowed for
//! the duration of a single operation. A transaction belongs to one thread
//! (`Tx` is not `Sync`); the database itself is freely shared.

mod pager;

pub(crate) use pager::TxPager;

use std::cell::{Cell, RefCell};

use parking_lot::MutexGuard;

use crate::btree::node::Node;
use crate::btree::Tree;
use crate::bucket::{self, Bucket, BucketMeta};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::storage::meta::Meta;
use crate::storage::{PageId, PageStore, TxId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Open,
    Committed,
    RolledBack,
}

/// A transaction over the database. Read-only transactions see the
/// snapshot current at begin for their entire lifetime; writable
/// transactions buffer every change privately until commit.
pub struct Tx<'db> {
    db: &'db Db,
    writable: bool,
    state: Cell<TxState>,
    pub(crate) pager: RefCell<TxPager<'db>>,
    writer_guard: RefCell<Option<MutexGuard<'db, ()>>>,
    reader_txid: Option<TxId>,
}

impl<'db> Tx<'db> {
    pub(crate) fn new_write(db: &'db Db, guard: MutexGuard<'db, ()>, meta: Meta) -> Tx<'db> {
        Tx {
            db,
            writable: true,
            state: Cell::new(TxState::Open),
            pager: RefCell::new(TxPager::new(db, true, meta)),
            writer_guard: RefCell::new(Some(guard)),
            reader_txid: None,
        }
    }

    pub(crate) fn new_read(db: &'db Db, meta: Meta) -> Tx<'db> {
        let txid = meta.txid;
        Tx {
            db,
            writable: false,
            state: Cell::new(TxState::Open),
            pager: RefCell::new(TxPager::new(db, false, meta)),
            writer_guard: RefCell::new(None),
            reader_txid: Some(txid),
        }
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.state.get() != TxState::Open {
            return Err(Error::TxClosed);
        }
        Ok(())
    }

    pub(crate) fn require_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(Error::TxReadOnly);
        }
        Ok(())
    }

    /// Looks up a top-level bucket by name.
    pub fn bucket<'tx>(&'tx self, name: &[u8]) -> Result<Option<Bucket<'tx, 'db>>> {
        self.check_open()?;
        if name.is_empty() {
            return Err(Error::NameRequired);
        }

        let found = {
            let pager = self.pager.borrow();
            let tree = Tree::new(pager.root);
            match tree.get(&*pager, name)? {
                None => None,
                Some(value) => {
                    let header = bucket::decode_page_id(&value)?;
                    Some((header, bucket::read_header(&*pager, header)?))
                }
            }
        };
        Ok(found.map(|(header, meta)| Bucket::new(self, None, name.to_vec(), header, meta)))
    }

    /// Creates a top-level bucket. Fails with `BucketExists` if the name is
    /// taken.
    pub fn create_bucket<'tx>(&'tx self, name: &[u8]) -> Result<Bucket<'tx, 'db>> {
        self.check_open()?;
        self.require_writable()?;
        if name.is_empty() {
            return Err(Error::NameRequired);
        }

        let (header, meta) = {
            let mut pager = self.pager.borrow_mut();
            let mut tree = Tree::new(pager.root);
            if tree.get(&*pager, name)?.is_some() {
                return Err(Error::BucketExists);
            }
            let (header, meta) = create_bucket_pages(&mut *pager)?;
            tree.set(&mut *pager, name, &bucket::encode_page_id(header))?;
            pager.root = tree.root;
            (header, meta)
        };
        Ok(Bucket::new(self, None, name.to_vec(), header, meta))
    }

    pub fn create_bucket_if_not_exists<'tx>(&'tx self, name: &[u8]) -> Result<Bucket<'tx, 'db>> {
        if let Some(bucket) = self.bucket(name)? {
            return Ok(bucket);
        }
        self.create_bucket(name)
    }

    /// Deletes a top-level bucket and releases every page reachable from
    /// it, nested buckets included.
    pub fn delete_bucket(&self, name: &[u8]) -> Result<()> {
        self.check_open()?;
        self.require_writable()?;
        if name.is_empty() {
            return Err(Error::NameRequired);
        }

        let mut pager = self.pager.borrow_mut();
        let mut tree = Tree::new(pager.root);
        let Some(value) = tree.get(&*pager, name)? else {
            return Err(Error::BucketNotFound);
        };
        let header = bucket::decode_page_id(&value)?;
        tree.delete(&mut *pager, name)?;
        release_bucket(&mut *pager, header)?;
        pager.root = tree.root;
        Ok(())
    }

    /// Commits the transaction. For a writable transaction this runs the
    /// full durability pipeline; a failure leaves the database state
    /// unchanged (the old meta page is still live) and finalizes the
    /// transaction.
    pub fn commit(&self) -> Result<()> {
        self.check_open()?;
        if !self.writable {
            self.finalize(TxState::Committed);
            return Ok(());
        }

        let result = self.pager.borrow_mut().commit();
        match result {
            Ok(()) => {
                self.finalize(TxState::Committed);
                Ok(())
            }
            Err(e) => {
                self.pager.borrow_mut().rollback();
                self.finalize(TxState::RolledBack);
                Err(e)
            }
        }
    }

    /// Discards all buffered changes. No file state is touched.
    pub fn rollback(&self) -> Result<()> {
        self.check_open()?;
        if self.writable {
            self.pager.borrow_mut().rollback();
        }
        self.finalize(TxState::RolledBack);
        Ok(())
    }

    fn finalize(&self, state: TxState) {
        self.state.set(state);
        if let Some(txid) = self.reader_txid {
            self.db.unregister_reader(txid);
        }
        *self.writer_guard.borrow_mut() = None;
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        if self.state.get() == TxState::Open {
            if self.writable {
                self.pager.borrow_mut().rollback();
            }
            self.finalize(TxState::RolledBack);
        }
    }
}

/// Allocates and writes the three pages of a fresh bucket: an empty KV
/// leaf, an empty child-bucket index leaf, and the header pointing at both.
pub(crate) fn create_bucket_pages<S: PageStore>(store: &mut S) -> Result<(PageId, BucketMeta)> {
    let header = store.alloc_page();
    let kv_tree = Tree::create(store)?;
    let index_tree = Tree::create(store)?;
    let meta = BucketMeta {
        kv_root: kv_tree.root,
        bucket_root: index_tree.root,
        sequence: 0,
    };
    bucket::write_header(store, header, &meta)?;
    Ok((header, meta))
}

/// Frees every page reachable from a bucket header: nested buckets first,
/// then both subtrees (including value overflow chains), then the header.
pub(crate) fn release_bucket<S: PageStore>(store: &mut S, header: PageId) -> Result<()> {
    let meta = bucket::read_header(store, header)?;
    release_child_buckets(store, meta.bucket_root)?;
    free_tree(store, meta.kv_root)?;
    free_tree(store, meta.bucket_root)?;
    store.free_page(header);
    Ok(())
}

fn release_child_buckets<S: PageStore>(store: &mut S, index_page: PageId) -> Result<()> {
    let node = Node::read(store, index_page)?;
    if node.is_leaf {
        for value in &node.values {
            release_bucket(store, bucket::decode_page_id(value)?)?;
        }
    } else {
        for &child in &node.children {
            release_child_buckets(store, child)?;
        }
    }
    Ok(())
}

fn free_tree<S: PageStore>(store: &mut S, root: PageId) -> Result<()> {
    if root == 0 {
        return Ok(());
    }
    let node = Node::read(store, root)?;
    if node.is_leaf {
        node.free_overflow(store)?;
    } else {
        for &child in &node.children {
            free_tree(store, child)?;
        }
    }
    store.free_page(root);
    Ok(())
}
