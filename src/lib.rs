//! # LeafDB - Embedded Ordered Key/Value Store
//!
//! LeafDB is an embedded, single-file, ordered key/value store. It provides
//! durable, ACID single-writer / multi-reader transactions with snapshot
//! isolation over a memory-mapped, copy-on-write B+ tree organized into
//! fixed-size pages.
//!
//! ## Quick Start
//!
//! ```ignore
//! use leafdb::Db;
//!
//! let db = Db::open("./app.db")?;
//!
//! db.write(|tx| {
//!     let bucket = tx.create_bucket_if_not_exists(b"users")?;
//!     bucket.put(b"alice", b"{\"age\": 30}")
//! })?;
//!
//! db.read(|tx| {
//!     let bucket = tx.bucket(b"users")?.expect("bucket exists");
//!     assert!(bucket.get(b"alice")?.is_some());
//!     Ok(())
//! })?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Public API (Db / Tx / Bucket)      │
//! ├─────────────────────────────────────┤
//! │  Buckets (nested namespaces)         │
//! ├─────────────────────────────────────┤
//! │  Copy-on-Write B+ Tree               │
//! ├─────────────────────────────────────┤
//! │  Per-Tx Pager │ Freelist / Reclaim   │
//! ├─────────────────────────────────────┤
//! │  Page Codecs (meta/node/freelist)    │
//! ├─────────────────────────────────────┤
//! │  Memory-Mapped File I/O              │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Durability Model
//!
//! The file carries two alternating meta pages. A commit flushes its data
//! pages, msyncs, writes the next meta (TxID + 1) into the slot the live
//! meta does not occupy, msyncs again, and fdatasyncs. Opening the file
//! picks the valid meta with the higher TxID, so a commit torn at any
//! point falls back to the previous complete state. Committed pages are
//! never rewritten in place.
//!
//! ## Concurrency Model
//!
//! One writer, many readers. Readers are bound to the meta snapshot
//! current at begin and register their TxID; pages freed by later commits
//! are quarantined in a pending-free table until no reader can still reach
//! them, then recycled through the freelist.
//!
//! ## Module Overview
//!
//! - [`storage`]: memory-mapped file, page codecs, freelist, overflow chains
//! - `btree`: copy-on-write B+ tree over page ids
//! - `tx`: transaction lifecycle and the per-transaction pager
//! - `bucket` / `cursor`: nested namespaces and forward iteration
//! - `db`: the database handle, latches, and recovery

mod bucket;
mod cursor;
mod db;
mod error;
mod tx;

pub mod btree;
pub mod storage;

pub use bucket::Bucket;
pub use cursor::Cursor;
pub use db::Db;
pub use error::{Error, Result};
pub use tx::Tx;
