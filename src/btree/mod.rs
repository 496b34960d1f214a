//! # Copy-on-Write B+ Tree
//!
//! Ordered map over opaque byte keys and values, layered on the page store.
//! The tree is a DAG of page ids: branches hold separator keys and child
//! page ids, leaves hold the entries plus a next-leaf link. Nodes are
//! decoded on demand into transient [`node::Node`] values; no node survives
//! across commits.
//!
//! Every mutation writes the affected nodes to freshly allocated pages and
//! schedules the replaced pages for reclamation, so the previously
//! committed tree stays intact for concurrent readers.

pub mod node;
pub mod tree;

pub use tree::Tree;
