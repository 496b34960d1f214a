//! # Buckets
//!
//! A bucket is a named sub-namespace: a header page pointing at two trees,
//! one for the bucket's key/value pairs and one indexing its child buckets
//! by name. Buckets nest arbitrarily; the top level is the tree rooted at
//! the meta page's root field, whose values are header page ids.
//!
//! Headers follow the same copy-on-write rule as everything else: a
//! mutation that moves `kv_root`, `bucket_root`, or bumps the sequence
//! rewrites the header on a fresh page, frees the old one, and updates the
//! parent's name entry. That update moves the parent's own roots, so the
//! rewrite cascades to the top-level index tree and, at commit, the meta
//! root. Readers on the previous meta keep a fully intact bucket graph.

use std::cell::Cell;

use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::btree::Tree;
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::storage::{PageId, PageKind, PageStore};
use crate::tx::{release_bucket, Tx, TxPager};

pub(crate) const BUCKET_HEADER_SIZE: usize = 25;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct BucketHeader {
    kind: u8,
    kv_root: U64,
    bucket_root: U64,
    sequence: U64,
}

const _: () = assert!(size_of::<BucketHeader>() == BUCKET_HEADER_SIZE);

/// Decoded bucket header contents.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BucketMeta {
    pub kv_root: PageId,
    pub bucket_root: PageId,
    pub sequence: u64,
}

pub(crate) fn read_header<S: PageStore>(store: &S, id: PageId) -> Result<BucketMeta> {
    let buf = store.read_page(id)?;
    if buf.len() < BUCKET_HEADER_SIZE {
        return Err(Error::Corruption("short bucket header page"));
    }
    let header = BucketHeader::ref_from_bytes(&buf[..BUCKET_HEADER_SIZE])
        .map_err(|_| Error::Corruption("unreadable bucket header"))?;
    if header.kind != PageKind::Bucket as u8 {
        return Err(Error::Corruption("page kind mismatch"));
    }
    Ok(BucketMeta {
        kv_root: header.kv_root.get(),
        bucket_root: header.bucket_root.get(),
        sequence: header.sequence.get(),
    })
}

pub(crate) fn write_header<S: PageStore>(store: &mut S, id: PageId, meta: &BucketMeta) -> Result<()> {
    let mut buf = vec![0u8; store.page_size()];
    let header = BucketHeader {
        kind: PageKind::Bucket as u8,
        kv_root: U64::new(meta.kv_root),
        bucket_root: U64::new(meta.bucket_root),
        sequence: U64::new(meta.sequence),
    };
    buf[..BUCKET_HEADER_SIZE].copy_from_slice(header.as_bytes());
    store.write_page(id, &buf)
}

pub(crate) fn encode_page_id(id: PageId) -> [u8; 8] {
    id.to_le_bytes()
}

pub(crate) fn decode_page_id(value: &[u8]) -> Result<PageId> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| Error::Corruption("invalid bucket reference"))?;
    Ok(u64::from_le_bytes(bytes))
}

/// A handle on one bucket within a transaction. Handles borrow the
/// transaction immutably, so a parent and its children can be used side by
/// side; the roots they track move through interior cells as the
/// copy-on-write rewrites relocate pages.
pub struct Bucket<'tx, 'db: 'tx> {
    tx: &'tx Tx<'db>,
    parent: Option<&'tx Bucket<'tx, 'db>>,
    name: Vec<u8>,
    header: Cell<PageId>,
    kv_root: Cell<PageId>,
    bucket_root: Cell<PageId>,
    sequence: Cell<u64>,
}

impl<'tx, 'db> Bucket<'tx, 'db> {
    pub(crate) fn new(
        tx: &'tx Tx<'db>,
        parent: Option<&'tx Bucket<'tx, 'db>>,
        name: Vec<u8>,
        header: PageId,
        meta: BucketMeta,
    ) -> Bucket<'tx, 'db> {
        Bucket {
            tx,
            parent,
            name,
            header: Cell::new(header),
            kv_root: Cell::new(meta.kv_root),
            bucket_root: Cell::new(meta.bucket_root),
            sequence: Cell::new(meta.sequence),
        }
    }

    /// Returns a copy of the value stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tx.check_open()?;
        let pager = self.tx.pager.borrow();
        Tree::new(self.kv_root.get()).get(&*pager, key)
    }

    /// Inserts or replaces the value for `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tx.check_open()?;
        self.tx.require_writable()?;
        let mut pager = self.tx.pager.borrow_mut();
        let mut tree = Tree::new(self.kv_root.get());
        tree.set(&mut *pager, key, value)?;
        self.kv_root.set(tree.root);
        self.rewrite_header(&mut pager)
    }

    /// Removes `key` if present. Returns whether an entry was removed.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.tx.check_open()?;
        self.tx.require_writable()?;
        let mut pager = self.tx.pager.borrow_mut();
        let mut tree = Tree::new(self.kv_root.get());
        let deleted = tree.delete(&mut *pager, key)?;
        if deleted {
            self.kv_root.set(tree.root);
            self.rewrite_header(&mut pager)?;
        }
        Ok(deleted)
    }

    /// Looks up a child bucket by name.
    pub fn bucket<'a>(&'a self, name: &[u8]) -> Result<Option<Bucket<'a, 'db>>> {
        self.tx.check_open()?;
        if name.is_empty() {
            return Err(Error::NameRequired);
        }

        let found = {
            let pager = self.tx.pager.borrow();
            let tree = Tree::new(self.bucket_root.get());
            match tree.get(&*pager, name)? {
                None => None,
                Some(value) => {
                    let header = decode_page_id(&value)?;
                    Some((header, read_header(&*pager, header)?))
                }
            }
        };
        Ok(found.map(|(header, meta)| Bucket::new(self.tx, Some(self), name.to_vec(), header, meta)))
    }

    /// Creates a child bucket. Fails with `BucketExists` if the name is
    /// taken.
    pub fn create_bucket<'a>(&'a self, name: &[u8]) -> Result<Bucket<'a, 'db>> {
        self.tx.check_open()?;
        self.tx.require_writable()?;
        if name.is_empty() {
            return Err(Error::NameRequired);
        }

        let (header, meta) = {
            let mut pager = self.tx.pager.borrow_mut();
            let mut tree = Tree::new(self.bucket_root.get());
            if tree.get(&*pager, name)?.is_some() {
                return Err(Error::BucketExists);
            }
            let (header, meta) = crate::tx::create_bucket_pages(&mut *pager)?;
            tree.set(&mut *pager, name, &encode_page_id(header))?;
            self.bucket_root.set(tree.root);
            self.rewrite_header(&mut pager)?;
            (header, meta)
        };
        Ok(Bucket::new(self.tx, Some(self), name.to_vec(), header, meta))
    }

    pub fn create_bucket_if_not_exists<'a>(&'a self, name: &[u8]) -> Result<Bucket<'a, 'db>> {
        if let Some(bucket) = self.bucket(name)? {
            return Ok(bucket);
        }
        self.create_bucket(name)
    }

    /// Deletes a child bucket and releases every page reachable from it.
    pub fn delete_bucket(&self, name: &[u8]) -> Result<()> {
        self.tx.check_open()?;
        self.tx.require_writable()?;
        if name.is_empty() {
            return Err(Error::NameRequired);
        }

        let mut pager = self.tx.pager.borrow_mut();
        let mut tree = Tree::new(self.bucket_root.get());
        let Some(value) = tree.get(&*pager, name)? else {
            return Err(Error::BucketNotFound);
        };
        let header = decode_page_id(&value)?;
        tree.delete(&mut *pager, name)?;
        release_bucket(&mut *pager, header)?;
        self.bucket_root.set(tree.root);
        self.rewrite_header(&mut pager)
    }

    /// A forward cursor over this bucket's key/value pairs.
    pub fn cursor<'a>(&'a self) -> Cursor<'a, 'db> {
        Cursor::new(self.tx, self.kv_root.get())
    }

    /// Current value of the bucket's monotonic sequence counter.
    pub fn sequence(&self) -> u64 {
        self.sequence.get()
    }

    /// Increments and returns the sequence counter. The new value is
    /// durable once the transaction commits.
    pub fn next_sequence(&self) -> Result<u64> {
        self.tx.check_open()?;
        self.tx.require_writable()?;
        let mut pager = self.tx.pager.borrow_mut();
        let next = self.sequence.get() + 1;
        self.sequence.set(next);
        self.rewrite_header(&mut pager)?;
        Ok(next)
    }

    /// Rewrites this bucket's header on a fresh page and updates the
    /// parent's pointer to it, cascading up to the top-level index tree.
    fn rewrite_header(&self, pager: &mut TxPager<'db>) -> Result<()> {
        let old = self.header.get();
        let new_id = pager.alloc_page();
        write_header(
            &mut *pager,
            new_id,
            &BucketMeta {
                kv_root: self.kv_root.get(),
                bucket_root: self.bucket_root.get(),
                sequence: self.sequence.get(),
            },
        )?;
        pager.free_page(old);
        self.header.set(new_id);
        self.propagate(pager)
    }

    fn propagate(&self, pager: &mut TxPager<'db>) -> Result<()> {
        let value = encode_page_id(self.header.get());
        match self.parent {
            None => {
                let mut tree = Tree::new(pager.root);
                tree.set(&mut *pager, &self.name, &value)?;
                pager.root = tree.root;
                Ok(())
            }
            Some(parent) => {
                let mut tree = Tree::new(parent.bucket_root.get());
                tree.set(&mut *pager, &self.name, &value)?;
                parent.bucket_root.set(tree.root);
                parent.rewrite_header(pager)
            }
        }
    }
}
